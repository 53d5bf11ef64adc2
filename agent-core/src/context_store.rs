//! [`ContextStore`]: append-only conversation history with a token counter,
//! numbered checkpoints, and revert-by-rotation (spec §4.2).
//!
//! The on-disk format is newline-delimited JSON, one record per line. Three
//! record kinds share the file: a normal [`Message`], a `_usage` marker, and
//! a `_checkpoint` marker — [`HistoryRecord`] is the tagged union over all
//! three.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{Content, Message};

#[derive(Error, Debug)]
pub enum ContextStoreError {
    #[error("checkpoint {0} does not exist")]
    UnknownCheckpoint(u64),
    #[error("storage failure: {0}")]
    StorageFailure(#[from] std::io::Error),
    #[error("restore called on a non-empty store")]
    NotEmpty,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "role")]
enum HistoryRecord {
    #[serde(rename = "_usage")]
    Usage { token_count: u32 },
    #[serde(rename = "_checkpoint")]
    Checkpoint { id: u64 },
    #[serde(untagged)]
    Entry(Message),
}

/// Durable, checkpointed conversation history backed by a single
/// append-only file, with state mirrored in memory for fast reads.
pub struct ContextStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    history: Vec<Message>,
    token_count: u32,
    next_checkpoint_id: u64,
}

impl ContextStore {
    /// Opens (without reading) the history file at `path`. Call
    /// [`ContextStore::restore`] to populate in-memory state from an
    /// existing file, or use a fresh path for a new session.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(Inner {
                history: Vec::new(),
                token_count: 0,
                next_checkpoint_id: 0,
            }),
        }
    }

    /// The history file this store is backed by. `Task`/`AsyncTask` derive
    /// a child's path from it (`<base>_sub_<i>`, spec §4.8).
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn history(&self) -> Vec<Message> {
        self.inner.lock().unwrap().history.clone()
    }

    pub fn token_count(&self) -> u32 {
        self.inner.lock().unwrap().token_count
    }

    pub fn next_checkpoint_id(&self) -> u64 {
        self.inner.lock().unwrap().next_checkpoint_id
    }

    /// Appends `messages` in order, fsyncing each line (spec §4.2: "atomic
    /// per line"). On failure the in-memory state is left unchanged.
    pub fn append(&self, messages: Vec<Message>) -> Result<(), ContextStoreError> {
        let mut file = open_append(&self.path)?;
        for message in &messages {
            write_record(&mut file, &HistoryRecord::Entry(message.clone()))?;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.history.extend(messages);
        Ok(())
    }

    /// Records a `_usage` line. The counter is read monotonically by the
    /// compaction trigger check.
    pub fn update_token_count(&self, n: u32) -> Result<(), ContextStoreError> {
        let mut file = open_append(&self.path)?;
        write_record(&mut file, &HistoryRecord::Usage { token_count: n })?;
        self.inner.lock().unwrap().token_count = n;
        Ok(())
    }

    /// Writes a `_checkpoint` line and returns its id. If `add_user_marker`,
    /// also appends a visible `<system>CHECKPOINT k</system>` user message
    /// so the marker stays in the LLM's own view of history.
    pub fn checkpoint(&self, add_user_marker: bool) -> Result<u64, ContextStoreError> {
        let id = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_checkpoint_id;
            inner.next_checkpoint_id += 1;
            id
        };
        let mut file = open_append(&self.path)?;
        write_record(&mut file, &HistoryRecord::Checkpoint { id })?;
        drop(file);

        if add_user_marker {
            let marker = Message::user(Content::Text(format!("<system>CHECKPOINT {id}</system>")));
            self.append(vec![marker])?;
        }
        Ok(id)
    }

    /// Rotates the current file to `<name>.<n>` (smallest unused n), creates
    /// a fresh file, and replays records up to (excluding) checkpoint `k`
    /// into it, rebuilding in-memory state to match.
    pub fn revert_to(&self, k: u64) -> Result<(), ContextStoreError> {
        {
            let inner = self.inner.lock().unwrap();
            if k >= inner.next_checkpoint_id {
                return Err(ContextStoreError::UnknownCheckpoint(k));
            }
        }

        let records = read_records(&self.path)?;
        let mut kept = Vec::new();
        for record in records {
            if let HistoryRecord::Checkpoint { id } = &record {
                if *id == k {
                    break;
                }
            }
            kept.push(record);
        }

        let rotated_path = next_rotation_path(&self.path)?;
        std::fs::rename(&self.path, &rotated_path)?;

        let mut file = open_append(&self.path)?;
        for record in &kept {
            write_record(&mut file, record)?;
        }
        drop(file);

        let mut history = Vec::new();
        let mut token_count = 0;
        let mut next_checkpoint_id = 0;
        for record in kept {
            match record {
                HistoryRecord::Entry(message) => history.push(message),
                HistoryRecord::Usage { token_count: n } => token_count = n,
                HistoryRecord::Checkpoint { id } => next_checkpoint_id = id + 1,
            }
        }

        let mut inner = self.inner.lock().unwrap();
        inner.history = history;
        inner.token_count = token_count;
        inner.next_checkpoint_id = next_checkpoint_id;
        Ok(())
    }

    /// Replays the file into memory. Fails if in-memory state is non-empty
    /// (spec §4.2: "idempotent-at-startup").
    pub fn restore(&self) -> Result<(), ContextStoreError> {
        {
            let inner = self.inner.lock().unwrap();
            if !inner.history.is_empty() || inner.token_count != 0 || inner.next_checkpoint_id != 0 {
                return Err(ContextStoreError::NotEmpty);
            }
        }

        if !self.path.exists() {
            return Ok(());
        }

        let records = read_records(&self.path)?;
        let mut history = Vec::new();
        let mut token_count = 0;
        let mut next_checkpoint_id = 0;
        for record in records {
            match record {
                HistoryRecord::Entry(message) => history.push(message),
                HistoryRecord::Usage { token_count: n } => token_count = n,
                HistoryRecord::Checkpoint { id } => next_checkpoint_id = id + 1,
            }
        }

        let mut inner = self.inner.lock().unwrap();
        inner.history = history;
        inner.token_count = token_count;
        inner.next_checkpoint_id = next_checkpoint_id;
        Ok(())
    }
}

fn open_append(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

fn write_record(file: &mut std::fs::File, record: &HistoryRecord) -> std::io::Result<()> {
    let line = serde_json::to_string(record).expect("history record always serializes");
    writeln!(file, "{line}")?;
    file.sync_data()
}

fn read_records(path: &Path) -> std::io::Result<Vec<HistoryRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}

/// Finds the smallest unused `<name>.<n>` suffix starting at 1 (spec §4.2:
/// "rotates current file to `<name>.<n>` (smallest free n)").
fn next_rotation_path(path: &Path) -> std::io::Result<PathBuf> {
    let mut n = 1u32;
    loop {
        let candidate = PathBuf::from(format!("{}.{n}", path.display()));
        if !candidate.exists() {
            return Ok(candidate);
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        std::mem::forget(dir);
        path
    }

    #[test]
    fn append_grows_in_memory_history_in_order() {
        let store = ContextStore::new(temp_path());
        store.append(vec![Message::user("hi")]).unwrap();
        store.append(vec![Message::assistant("ok")]).unwrap();
        assert_eq!(store.history().len(), 2);
        assert_eq!(store.history()[0].content.as_text(), "hi");
    }

    #[test]
    fn checkpoint_ids_are_strictly_monotonic() {
        let store = ContextStore::new(temp_path());
        let k0 = store.checkpoint(false).unwrap();
        let k1 = store.checkpoint(false).unwrap();
        assert_eq!(k0, 0);
        assert_eq!(k1, 1);
    }

    #[test]
    fn scenario_checkpoint_then_revert() {
        let store = ContextStore::new(temp_path());
        store.append(vec![Message::user("hi")]).unwrap();
        let k0 = store.checkpoint(false).unwrap();
        assert_eq!(k0, 0);
        store.append(vec![Message::assistant("ok")]).unwrap();
        let k1 = store.checkpoint(false).unwrap();
        assert_eq!(k1, 1);
        store.append(vec![Message::assistant("more")]).unwrap();

        store.revert_to(1).unwrap();

        let history = store.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content.as_text(), "hi");
        assert_eq!(history[1].content.as_text(), "ok");
        assert_eq!(store.next_checkpoint_id(), 1);
    }

    #[test]
    fn revert_to_unknown_checkpoint_fails() {
        let store = ContextStore::new(temp_path());
        store.checkpoint(false).unwrap();
        let err = store.revert_to(5).unwrap_err();
        assert!(matches!(err, ContextStoreError::UnknownCheckpoint(5)));
    }

    #[test]
    fn revert_is_idempotent() {
        let store = ContextStore::new(temp_path());
        store.append(vec![Message::user("hi")]).unwrap();
        store.checkpoint(false).unwrap();
        store.append(vec![Message::assistant("ok")]).unwrap();

        store.revert_to(0).unwrap();
        let first = (store.history(), store.token_count(), store.next_checkpoint_id());
        store.revert_to(0).unwrap();
        let second = (store.history(), store.token_count(), store.next_checkpoint_id());

        assert_eq!(first.0.len(), second.0.len());
        assert_eq!(first.1, second.1);
        assert_eq!(first.2, second.2);
    }

    #[test]
    fn restore_replays_file_into_memory() {
        let path = temp_path();
        {
            let store = ContextStore::new(&path);
            store.append(vec![Message::user("hi")]).unwrap();
            store.update_token_count(42).unwrap();
            store.checkpoint(false).unwrap();
        }

        let reloaded = ContextStore::new(&path);
        reloaded.restore().unwrap();
        assert_eq!(reloaded.history().len(), 1);
        assert_eq!(reloaded.token_count(), 42);
        assert_eq!(reloaded.next_checkpoint_id(), 1);
    }

    #[test]
    fn restore_fails_on_non_empty_store() {
        let store = ContextStore::new(temp_path());
        store.append(vec![Message::user("hi")]).unwrap();
        let err = store.restore().unwrap_err();
        assert!(matches!(err, ContextStoreError::NotEmpty));
    }

    #[test]
    fn checkpoint_with_user_marker_is_visible_in_history() {
        let store = ContextStore::new(temp_path());
        let id = store.checkpoint(true).unwrap();
        let history = store.history();
        assert_eq!(history.len(), 1);
        assert!(history[0].content.as_text().contains(&format!("CHECKPOINT {id}")));
    }
}
