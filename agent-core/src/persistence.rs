//! `AsyncSubagentPersistence` (spec §4.10): per-workdir index plus one file
//! per completed async subagent run, bounded to the most recent 100.
//!
//! Plain `tokio::fs` + `serde_json` under `<workDir>/.jimi/async_subagents/`,
//! as SPEC_FULL §4 calls for. Every failure here is logged and swallowed —
//! persistence must never crash a live run (spec §4.10).

use std::path::{Path, PathBuf};

use stream_event::{AsyncIndexEntry, AsyncSubagentRecord};

/// Upper bound on persisted records (spec §8: "persistence bound ... at
/// most 100 entries").
const MAX_PERSISTED: usize = 100;

pub struct AsyncSubagentPersistence;

impl AsyncSubagentPersistence {
    fn results_dir(work_dir: &Path) -> PathBuf {
        work_dir.join(".jimi").join("async_subagents").join("results")
    }

    fn index_path(work_dir: &Path) -> PathBuf {
        work_dir.join(".jimi").join("async_subagents").join("index.json")
    }

    /// Persists `record`: writes `results/<id>.json`, then rewrites
    /// `index.json` with this record moved to the front, truncated to
    /// [`MAX_PERSISTED`] entries with the overflowing result files deleted
    /// in the same update. `work_dir: None` is a safe no-op.
    pub async fn save(work_dir: Option<&Path>, record: &AsyncSubagentRecord) {
        let Some(work_dir) = work_dir else { return };
        if let Err(e) = Self::save_inner(work_dir, record).await {
            tracing::warn!(error = %e, id = %record.id, "failed to persist async subagent record");
        }
    }

    async fn save_inner(work_dir: &Path, record: &AsyncSubagentRecord) -> std::io::Result<()> {
        let results_dir = Self::results_dir(work_dir);
        tokio::fs::create_dir_all(&results_dir).await?;

        let record_path = results_dir.join(format!("{}.json", record.id));
        tokio::fs::write(&record_path, serde_json::to_vec_pretty(record)?).await?;

        let index_path = Self::index_path(work_dir);
        let mut index = Self::read_index(&index_path).await.unwrap_or_default();
        index.retain(|entry| entry.id != record.id);
        index.insert(0, AsyncIndexEntry::from(record));

        let overflow: Vec<AsyncIndexEntry> = if index.len() > MAX_PERSISTED {
            index.split_off(MAX_PERSISTED)
        } else {
            Vec::new()
        };
        for entry in &overflow {
            let _ = tokio::fs::remove_file(results_dir.join(format!("{}.json", entry.id))).await;
        }

        tokio::fs::write(&index_path, serde_json::to_vec_pretty(&index)?).await?;
        Ok(())
    }

    async fn read_index(index_path: &Path) -> std::io::Result<Vec<AsyncIndexEntry>> {
        match tokio::fs::read(index_path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Newest-first history, up to `limit` entries.
    pub async fn get_history(work_dir: Option<&Path>, limit: usize) -> Vec<AsyncIndexEntry> {
        let Some(work_dir) = work_dir else {
            return Vec::new();
        };
        let index = Self::read_index(&Self::index_path(work_dir))
            .await
            .unwrap_or_default();
        index.into_iter().take(limit).collect()
    }

    /// Loads the full record for one id, if it was ever persisted.
    pub async fn load_record(work_dir: Option<&Path>, id: &str) -> Option<AsyncSubagentRecord> {
        let work_dir = work_dir?;
        let path = Self::results_dir(work_dir).join(format!("{id}.json"));
        let bytes = tokio::fs::read(path).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Deletes every persisted record and the index file; returns the
    /// number of entries removed.
    pub async fn clear_history(work_dir: Option<&Path>) -> usize {
        let Some(work_dir) = work_dir else { return 0 };
        let index = Self::read_index(&Self::index_path(work_dir))
            .await
            .unwrap_or_default();
        let results_dir = Self::results_dir(work_dir);
        for entry in &index {
            let _ = tokio::fs::remove_file(results_dir.join(format!("{}.json", entry.id))).await;
        }
        let _ = tokio::fs::remove_file(Self::index_path(work_dir)).await;
        index.len()
    }

    pub async fn get_history_count(work_dir: Option<&Path>) -> usize {
        let Some(work_dir) = work_dir else { return 0 };
        Self::read_index(&Self::index_path(work_dir))
            .await
            .unwrap_or_default()
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stream_event::{AsyncMode, AsyncStatus};

    fn record(id: &str) -> AsyncSubagentRecord {
        AsyncSubagentRecord {
            id: id.to_string(),
            name: "researcher".to_string(),
            mode: AsyncMode::FireAndForget,
            status: AsyncStatus::Completed,
            start_time: Utc::now(),
            end_time: Some(Utc::now()),
            duration_ms: Some(1_000),
            prompt: "find X".to_string(),
            result: Some("done".to_string()),
            error: None,
            trigger_pattern: None,
        }
    }

    #[tokio::test]
    async fn none_work_dir_is_a_safe_noop() {
        AsyncSubagentPersistence::save(None, &record("a")).await;
        assert_eq!(AsyncSubagentPersistence::get_history(None, 10).await.len(), 0);
        assert_eq!(AsyncSubagentPersistence::get_history_count(None).await, 0);
        assert!(AsyncSubagentPersistence::load_record(None, "a").await.is_none());
        assert_eq!(AsyncSubagentPersistence::clear_history(None).await, 0);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let rec = record("abcd1234");
        AsyncSubagentPersistence::save(Some(dir.path()), &rec).await;

        let loaded = AsyncSubagentPersistence::load_record(Some(dir.path()), "abcd1234")
            .await
            .unwrap();
        assert_eq!(loaded.id, "abcd1234");
        assert_eq!(loaded.result.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            AsyncSubagentPersistence::save(Some(dir.path()), &record(&format!("id{i}"))).await;
        }
        let history = AsyncSubagentPersistence::get_history(Some(dir.path()), 10).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].id, "id2");
        assert_eq!(history[2].id, "id0");
    }

    #[tokio::test]
    async fn resaving_same_id_moves_it_to_front_without_duplicating() {
        let dir = tempfile::tempdir().unwrap();
        AsyncSubagentPersistence::save(Some(dir.path()), &record("a")).await;
        AsyncSubagentPersistence::save(Some(dir.path()), &record("b")).await;
        AsyncSubagentPersistence::save(Some(dir.path()), &record("a")).await;

        let history = AsyncSubagentPersistence::get_history(Some(dir.path()), 10).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, "a");
    }

    #[tokio::test]
    async fn index_is_bounded_and_overflow_files_are_deleted() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..105 {
            AsyncSubagentPersistence::save(Some(dir.path()), &record(&format!("id{i}"))).await;
        }
        let count = AsyncSubagentPersistence::get_history_count(Some(dir.path())).await;
        assert_eq!(count, 100);

        // The oldest 5 (id0..id4) should have had their result files deleted.
        for i in 0..5 {
            assert!(AsyncSubagentPersistence::load_record(Some(dir.path()), &format!("id{i}"))
                .await
                .is_none());
        }
        // The newest one is still there.
        assert!(AsyncSubagentPersistence::load_record(Some(dir.path()), "id104")
            .await
            .is_some());
    }

    #[tokio::test]
    async fn clear_history_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        AsyncSubagentPersistence::save(Some(dir.path()), &record("a")).await;
        AsyncSubagentPersistence::save(Some(dir.path()), &record("b")).await;

        let removed = AsyncSubagentPersistence::clear_history(Some(dir.path())).await;
        assert_eq!(removed, 2);
        assert_eq!(AsyncSubagentPersistence::get_history_count(Some(dir.path())).await, 0);
    }
}
