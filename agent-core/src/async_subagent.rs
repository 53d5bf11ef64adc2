//! The asynchronous subagent scheduler (spec §4.9): `AsyncTask` hands a
//! child `Engine` a background slot and returns immediately with an id; the
//! caller polls, watches for a trigger pattern, or cancels it later.
//!
//! Grounded on `tron-engine`'s `SubagentManager`: a `DashMap` of live
//! handles, one `CancellationToken` per child, a `broadcast`-backed bus for
//! progress events, and a bounded worker pool via `tokio::sync::Semaphore`.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use stream_event::{AsyncMode, AsyncStatus, AsyncSubagentRecord};

use crate::agent_config::AgentConfig;
use crate::approval::Approval;
use crate::bus::{MessageBus, WireEvent};
use crate::child::{self, ChildSpawnConfig};
use crate::message::Role;
use crate::persistence::AsyncSubagentPersistence;
use crate::tool::{Tool, ToolSpec};
use crate::toolcall::ToolResult;

/// Worker-pool size: how many async subagents may actually be running their
/// turn loop at once (spec §4.9: "bounded worker pool").
const MAX_CONCURRENT: usize = 10;

/// Total queue capacity (running + queued-but-not-yet-started). Beyond this
/// `start` rejects new work outright rather than queuing indefinitely.
const MAX_QUEUED: usize = 100;

/// Completed-run cache kept in memory for fast `list_completed`/`get` access,
/// independent of [`AsyncSubagentPersistence`]'s on-disk bound (spec's Open
/// Question: the two bounds are intentionally unsynchronized).
const COMPLETED_CACHE_SIZE: usize = 50;

struct LiveState {
    name: String,
    mode: AsyncMode,
    status: AsyncStatus,
    start_time: chrono::DateTime<Utc>,
    prompt: String,
    trigger_pattern: Option<String>,
}

struct LiveEntry {
    cancel: CancellationToken,
    state: Mutex<LiveState>,
}

struct Inner {
    agent: AgentConfig,
    spawn_config: ChildSpawnConfig,
    base_history_path: PathBuf,
    workdir: PathBuf,
    approval: Arc<Approval>,
    bus: MessageBus,
    live: dashmap::DashMap<String, Arc<LiveEntry>>,
    completed: Mutex<VecDeque<AsyncSubagentRecord>>,
    semaphore: Arc<Semaphore>,
}

/// Runs background subagents outside the turn loop that spawned them.
#[derive(Clone)]
pub struct AsyncSubagentManager {
    inner: Arc<Inner>,
}

impl AsyncSubagentManager {
    pub fn new(
        agent: AgentConfig,
        spawn_config: ChildSpawnConfig,
        base_history_path: PathBuf,
        workdir: PathBuf,
        approval: Arc<Approval>,
        bus: MessageBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                agent,
                spawn_config,
                base_history_path,
                workdir,
                approval,
                bus,
                live: dashmap::DashMap::new(),
                completed: Mutex::new(VecDeque::new()),
                semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT)),
            }),
        }
    }

    /// Dispatches a subagent run in the background and returns its id
    /// immediately. `wait_complete` is rejected (spec's recorded Open
    /// Question decision: use the synchronous `Task` tool for that case).
    pub async fn start(
        &self,
        subagent_name: &str,
        prompt: &str,
        mode: AsyncMode,
        trigger_pattern: Option<String>,
        on_trigger: Option<String>,
        continue_after_trigger: bool,
        timeout: Option<std::time::Duration>,
    ) -> Result<String, String> {
        if mode == AsyncMode::WaitComplete {
            return Err(
                "wait_complete is not supported by AsyncTask; use the Task tool instead".to_string(),
            );
        }

        if self.inner.live.len() >= MAX_QUEUED {
            return Err(format!(
                "too many queued async subagents (capacity {MAX_QUEUED})"
            ));
        }

        let Some(child_agent) = self.inner.agent.subagent(subagent_name) else {
            return Err(format!("no subagent named '{subagent_name}'"));
        };
        let child_agent = child_agent.clone();

        let compiled_pattern = match (&mode, &trigger_pattern) {
            (AsyncMode::Watch, Some(pattern)) => match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => return Err(format!("invalid trigger_pattern: {e}")),
            },
            (AsyncMode::Watch, None) => {
                return Err("watch mode requires a trigger_pattern".to_string())
            }
            _ => None,
        };

        let id = short_id();
        let history_path =
            PathBuf::from(format!("{}_async_{id}", self.inner.base_history_path.display()));

        let built = child::build_child_engine(
            child_agent,
            history_path,
            &self.inner.workdir,
            &self.inner.approval,
            &self.inner.spawn_config,
        )
        .map_err(|e| e.to_string())?;

        let run_prompt = match (&mode, &trigger_pattern, &on_trigger) {
            (AsyncMode::Watch, Some(pattern), Some(on_trigger)) => format!(
                "{prompt}\n\nWatch your own output for a line matching the pattern `{pattern}`. \
                 When you find one, do this: {on_trigger}"
            ),
            _ => prompt.to_string(),
        };

        let now = Utc::now();
        let entry = Arc::new(LiveEntry {
            cancel: CancellationToken::new(),
            state: Mutex::new(LiveState {
                name: subagent_name.to_string(),
                mode,
                status: AsyncStatus::Pending,
                start_time: now,
                prompt: prompt.to_string(),
                trigger_pattern: trigger_pattern.clone(),
            }),
        });
        self.inner.live.insert(id.clone(), Arc::clone(&entry));

        let inner = Arc::clone(&self.inner);
        let id_for_task = id.clone();
        tokio::spawn(async move {
            run_child(
                inner,
                id_for_task,
                entry,
                built,
                run_prompt,
                compiled_pattern,
                continue_after_trigger,
                timeout,
            )
            .await;
        });

        Ok(id)
    }

    /// Live (non-terminal) subagents, newest-start-first.
    pub fn list(&self) -> Vec<AsyncSubagentRecord> {
        let mut records: Vec<AsyncSubagentRecord> = self
            .inner
            .live
            .iter()
            .map(|kv| {
                let state = kv.value().state.lock().unwrap();
                AsyncSubagentRecord {
                    id: kv.key().clone(),
                    name: state.name.clone(),
                    mode: state.mode,
                    status: state.status,
                    start_time: state.start_time,
                    end_time: None,
                    duration_ms: None,
                    prompt: state.prompt.clone(),
                    result: None,
                    error: None,
                    trigger_pattern: state.trigger_pattern.clone(),
                }
            })
            .collect();
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        records
    }

    /// One subagent's current record, live or from the in-memory completed
    /// cache. Does not consult on-disk persistence.
    pub fn get(&self, id: &str) -> Option<AsyncSubagentRecord> {
        if let Some(entry) = self.inner.live.get(id) {
            let state = entry.state.lock().unwrap();
            return Some(AsyncSubagentRecord {
                id: id.to_string(),
                name: state.name.clone(),
                mode: state.mode,
                status: state.status,
                start_time: state.start_time,
                end_time: None,
                duration_ms: None,
                prompt: state.prompt.clone(),
                result: None,
                error: None,
                trigger_pattern: state.trigger_pattern.clone(),
            });
        }
        self.inner
            .completed
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn list_completed(&self) -> Vec<AsyncSubagentRecord> {
        self.inner.completed.lock().unwrap().iter().cloned().collect()
    }

    /// Cancels a live subagent: signals cooperative cancellation, sets
    /// `Cancelled` with `end_time` now, moves it to the completed cache and
    /// persists it, all before returning. Returns `false` if `id` isn't live.
    pub async fn cancel(&self, id: &str) -> bool {
        let Some((_, entry)) = self.inner.live.remove(id) else {
            return false;
        };
        entry.cancel.cancel();

        let now = Utc::now();
        let (name, mode, start_time, prompt, trigger_pattern) = {
            let mut state = entry.state.lock().unwrap();
            state.status = AsyncStatus::Cancelled;
            (
                state.name.clone(),
                state.mode,
                state.start_time,
                state.prompt.clone(),
                state.trigger_pattern.clone(),
            )
        };

        let record = AsyncSubagentRecord {
            id: id.to_string(),
            name,
            mode,
            status: AsyncStatus::Cancelled,
            start_time,
            end_time: Some(now),
            duration_ms: Some((now - start_time).num_milliseconds()),
            prompt,
            result: None,
            error: Some("cancelled".to_string()),
            trigger_pattern,
        };

        push_completed(&self.inner, record.clone());
        self.inner.bus.publish(WireEvent::AsyncCompleted {
            id: id.to_string(),
            result: None,
            success: false,
            duration_ms: record.duration_ms.unwrap_or(0),
        });
        AsyncSubagentPersistence::save(Some(&self.inner.workdir), &record).await;
        true
    }

    /// Disposes every live subagent without waiting for them to notice.
    /// Intended for process shutdown; does not persist or emit events.
    pub fn shutdown_all(&self) {
        for entry in self.inner.live.iter() {
            entry.value().cancel.cancel();
        }
        self.inner.live.clear();
    }

    pub fn active_count(&self) -> usize {
        self.inner.live.len()
    }
}

fn push_completed(inner: &Inner, record: AsyncSubagentRecord) {
    let mut completed = inner.completed.lock().unwrap();
    completed.push_front(record);
    completed.truncate(COMPLETED_CACHE_SIZE);
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

enum Outcome {
    Completed,
    Failed(String),
    Timeout,
}

#[allow(clippy::too_many_arguments)]
async fn run_child(
    inner: Arc<Inner>,
    id: String,
    entry: Arc<LiveEntry>,
    built: child::ChildEngine,
    prompt: String,
    trigger: Option<Regex>,
    continue_after_trigger: bool,
    timeout: Option<std::time::Duration>,
) {
    let permit = tokio::select! {
        permit = inner.semaphore.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
        _ = entry.cancel.cancelled() => return,
    };

    {
        let mut state = entry.state.lock().unwrap();
        state.status = AsyncStatus::Running;
    }
    let (name, mode, start_time) = {
        let state = entry.state.lock().unwrap();
        (state.name.clone(), state.mode, state.start_time)
    };
    inner.bus.publish(WireEvent::AsyncStarted {
        id: id.clone(),
        name,
        mode,
        start_time,
    });

    let child_bus = built.bus.clone();
    let child_cancel = entry.cancel.clone();
    let parent_bus = inner.bus.clone();
    let forward_id = id.clone();
    let watch_context = Arc::clone(&built.engine.runtime().context);
    let forwarder = tokio::spawn(async move {
        let mut sub = child_bus.subscribe();
        loop {
            tokio::select! {
                _ = child_cancel.cancelled() => break,
                event = sub.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        WireEvent::StepBegin { step, .. } => {
                            parent_bus.publish(WireEvent::AsyncProgress {
                                id: forward_id.clone(),
                                info: format!("step {step}"),
                                step,
                            });
                            if let Some(re) = &trigger {
                                let history = watch_context.history();
                                if let Some(matched_line) = find_trigger_match(&history, re) {
                                    parent_bus.publish(WireEvent::AsyncTrigger {
                                        id: forward_id.clone(),
                                        pattern: re.as_str().to_string(),
                                        matched_line,
                                        time: Utc::now(),
                                    });
                                    if !continue_after_trigger {
                                        child_cancel.cancel();
                                    }
                                }
                            }
                        }
                        WireEvent::ApprovalRequest { .. } | WireEvent::HumanInputRequest { .. } => {
                            parent_bus.publish(event);
                        }
                        _ => {}
                    }
                }
            }
        }
    });

    let run_fut = built.engine.on_run(prompt);
    let outcome = tokio::select! {
        _ = entry.cancel.cancelled() => {
            forwarder.abort();
            drop(permit);
            return;
        }
        result = run_with_optional_timeout(run_fut, timeout) => result,
    };
    forwarder.abort();
    drop(permit);

    let history = built.engine.runtime().context.history();
    let (status, result, error) = match outcome {
        Outcome::Completed => {
            let text = child::last_assistant_text(&history).unwrap_or_default();
            (AsyncStatus::Completed, Some(text), None)
        }
        Outcome::Failed(message) => (AsyncStatus::Failed, None, Some(message)),
        Outcome::Timeout => (AsyncStatus::Timeout, None, Some("timed out".to_string())),
    };

    let now = Utc::now();
    let (name, mode, prompt, trigger_pattern) = {
        let mut state = entry.state.lock().unwrap();
        state.status = status;
        (
            state.name.clone(),
            state.mode,
            state.prompt.clone(),
            state.trigger_pattern.clone(),
        )
    };

    // A racing `cancel()` may already have removed and finalized this id;
    // only the side that wins the removal does the terminal bookkeeping.
    if inner.live.remove(&id).is_some() {
        let duration_ms = (now - start_time).num_milliseconds();
        let record = AsyncSubagentRecord {
            id: id.clone(),
            name,
            mode,
            status,
            start_time,
            end_time: Some(now),
            duration_ms: Some(duration_ms),
            prompt,
            result: result.clone(),
            error,
            trigger_pattern,
        };
        push_completed(&inner, record.clone());
        inner.bus.publish(WireEvent::AsyncCompleted {
            id,
            result,
            success: matches!(status, AsyncStatus::Completed),
            duration_ms,
        });
        AsyncSubagentPersistence::save(Some(&inner.workdir), &record).await;
    }
}

async fn run_with_optional_timeout(
    run_fut: impl std::future::Future<Output = Result<(), crate::error::EngineError>>,
    timeout: Option<std::time::Duration>,
) -> Outcome {
    match timeout {
        Some(duration) => match tokio::time::timeout(duration, run_fut).await {
            Ok(Ok(())) => Outcome::Completed,
            Ok(Err(e)) => Outcome::Failed(e.to_string()),
            Err(_) => Outcome::Timeout,
        },
        None => match run_fut.await {
            Ok(()) => Outcome::Completed,
            Err(e) => Outcome::Failed(e.to_string()),
        },
    }
}

/// Finds the first line of the most recent tool-role message that matches
/// `pattern` (spec §4.9: watch mode matches "against child tool-role
/// message lines").
fn find_trigger_match(history: &[crate::message::Message], pattern: &Regex) -> Option<String> {
    history
        .iter()
        .rev()
        .find(|m| m.role == Role::Tool)
        .and_then(|m| {
            m.content
                .as_text()
                .lines()
                .find(|line| pattern.is_match(line))
                .map(str::to_string)
        })
}

/// The `AsyncTask` tool: wraps [`AsyncSubagentManager::start`].
pub struct AsyncTaskTool {
    manager: OnceLock<AsyncSubagentManager>,
}

impl AsyncTaskTool {
    pub fn new() -> Self {
        Self {
            manager: OnceLock::new(),
        }
    }

    pub fn with_manager(manager: AsyncSubagentManager) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(manager);
        Self { manager: cell }
    }
}

impl Default for AsyncTaskTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for AsyncTaskTool {
    fn name(&self) -> &str {
        "AsyncTask"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "AsyncTask".to_string(),
            description: "Dispatches a sub-task to a named subagent in the background and \
                          returns immediately with an id."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "subagent_name": { "type": "string" },
                    "prompt": { "type": "string" },
                    "mode": { "type": "string", "enum": ["fire_and_forget", "watch"] },
                    "trigger_pattern": { "type": "string" },
                    "on_trigger": { "type": "string" },
                    "continue_after_trigger": { "type": "boolean" },
                    "timeout_seconds": { "type": "integer" },
                },
                "required": ["subagent_name", "prompt", "mode"],
            }),
        }
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(manager) = self.manager.get() else {
            return ToolResult::error("AsyncTask tool not fully initialized", "");
        };
        let Some(subagent_name) = args.get("subagent_name").and_then(Value::as_str) else {
            return ToolResult::error("invalid arguments", "missing subagent_name");
        };
        let Some(prompt) = args.get("prompt").and_then(Value::as_str) else {
            return ToolResult::error("invalid arguments", "missing prompt");
        };
        let mode = match args.get("mode").and_then(Value::as_str) {
            Some("fire_and_forget") => AsyncMode::FireAndForget,
            Some("watch") => AsyncMode::Watch,
            Some("wait_complete") => AsyncMode::WaitComplete,
            _ => return ToolResult::error("invalid arguments", "mode must be fire_and_forget or watch"),
        };
        let trigger_pattern = args
            .get("trigger_pattern")
            .and_then(Value::as_str)
            .map(str::to_string);
        let on_trigger = args
            .get("on_trigger")
            .and_then(Value::as_str)
            .map(str::to_string);
        let continue_after_trigger = args
            .get("continue_after_trigger")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let timeout = args
            .get("timeout_seconds")
            .and_then(Value::as_u64)
            .map(std::time::Duration::from_secs);

        match manager
            .start(
                subagent_name,
                prompt,
                mode,
                trigger_pattern,
                on_trigger,
                continue_after_trigger,
                timeout,
            )
            .await
        {
            Ok(id) => ToolResult::ok(
                json!({ "id": id }).to_string(),
                format!("started async subagent {id}"),
            ),
            Err(e) => ToolResult::error("failed to start async subagent", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::Approval;
    use crate::chat_provider::MockChatProvider;
    use crate::compaction::Compactor;
    use crate::message::Message;
    use std::sync::Arc;

    struct PassthroughCompactor;
    #[async_trait::async_trait]
    impl Compactor for PassthroughCompactor {
        async fn compact(&self, history: &[Message], _budget: u32) -> Vec<Message> {
            history.to_vec()
        }
    }

    fn manager(provider: Arc<dyn crate::chat_provider::ChatProvider>) -> (AsyncSubagentManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let researcher = AgentConfig::new("researcher", "You are a careful researcher.");
        let agent = AgentConfig::new("main", "You are Jimi.").with_subagent("researcher", researcher);
        let spawn_config = ChildSpawnConfig {
            tool_factory: Arc::new(|| Vec::<Arc<dyn Tool>>::new()),
            provider,
            compactor: Arc::new(PassthroughCompactor),
            max_context_size: 128_000,
            max_steps: 10,
        };
        let manager = AsyncSubagentManager::new(
            agent,
            spawn_config,
            dir.path().join("history.jsonl"),
            dir.path().to_path_buf(),
            Arc::new(Approval::new(true)),
            MessageBus::new(),
        );
        (manager, dir)
    }

    #[tokio::test]
    async fn unknown_subagent_is_rejected() {
        let (manager, _dir) = manager(Arc::new(MockChatProvider::with_no_tool_calls("done")));
        let result = manager
            .start("nope", "find stuff", AsyncMode::FireAndForget, None, None, false, None)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn wait_complete_is_rejected() {
        let (manager, _dir) = manager(Arc::new(MockChatProvider::with_no_tool_calls("done")));
        let result = manager
            .start(
                "researcher",
                "find stuff",
                AsyncMode::WaitComplete,
                None,
                None,
                false,
                None,
            )
            .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Task tool"));
    }

    #[tokio::test]
    async fn watch_without_trigger_pattern_is_rejected() {
        let (manager, _dir) = manager(Arc::new(MockChatProvider::with_no_tool_calls("done")));
        let result = manager
            .start("researcher", "find stuff", AsyncMode::Watch, None, None, false, None)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fire_and_forget_completes_and_moves_to_completed_cache() {
        let (manager, _dir) = manager(Arc::new(MockChatProvider::with_no_tool_calls(
            "research finding",
        )));
        let id = manager
            .start(
                "researcher",
                "find stuff",
                AsyncMode::FireAndForget,
                None,
                None,
                false,
                None,
            )
            .await
            .unwrap();

        // Give the background task a chance to run to completion.
        for _ in 0..50 {
            if manager.get(&id).map(|r| r.status) == Some(AsyncStatus::Completed) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let record = manager.get(&id).unwrap();
        assert_eq!(record.status, AsyncStatus::Completed);
        assert_eq!(record.result.as_deref(), Some("research finding"));
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn cancel_unknown_id_returns_false() {
        let (manager, _dir) = manager(Arc::new(MockChatProvider::with_no_tool_calls("done")));
        assert!(!manager.cancel("nope").await);
    }

    #[tokio::test]
    async fn queue_capacity_is_enforced() {
        let (manager, _dir) = manager(Arc::new(MockChatProvider::with_no_tool_calls("done")));
        for i in 0..MAX_QUEUED {
            manager.inner.live.insert(
                format!("filler-{i}"),
                Arc::new(LiveEntry {
                    cancel: CancellationToken::new(),
                    state: Mutex::new(LiveState {
                        name: "researcher".to_string(),
                        mode: AsyncMode::FireAndForget,
                        status: AsyncStatus::Running,
                        start_time: Utc::now(),
                        prompt: "p".to_string(),
                        trigger_pattern: None,
                    }),
                }),
            );
        }
        let result = manager
            .start(
                "researcher",
                "one more",
                AsyncMode::FireAndForget,
                None,
                None,
                false,
                None,
            )
            .await;
        assert!(result.is_err());
    }
}
