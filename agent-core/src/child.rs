//! Shared plumbing for building a child [`Engine`]: both the synchronous
//! `Task` dispatcher (§4.8) and the asynchronous subagent manager (§4.9)
//! spin up a fresh `Runtime` the same way — fresh `ContextStore`, fresh
//! `ToolRegistry` built by the parent's tool factory (recursive tools
//! omitted), and an independent `MessageBus`.
//!
//! This mirrors the teacher's "build fresh runner from config" factory-
//! function shape (`loom::agent::react::build::build_react_run_context`)
//! rather than cloning a live registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use crate::agent_config::AgentConfig;
use crate::approval::Approval;
use crate::bus::MessageBus;
use crate::chat_provider::ChatProvider;
use crate::compaction::Compactor;
use crate::context_store::ContextStore;
use crate::engine::Engine;
use crate::registry::{RegisterError, ToolRegistry};
use crate::runtime::{PromptVars, Runtime};
use crate::tool::Tool;

/// Builds the base tool set for a fresh child registry. Never includes
/// `Task`/`AsyncTask` themselves — recursion is broken by construction,
/// not by a runtime check (spec §4.8: "omitting recursive Task/AsyncTask
/// providers").
pub type ToolFactory = Arc<dyn Fn() -> Vec<Arc<dyn Tool>> + Send + Sync>;

/// Settings shared by every child `Task`/`AsyncTask` spawns, fixed at the
/// point the parent's registry is assembled.
#[derive(Clone)]
pub struct ChildSpawnConfig {
    pub tool_factory: ToolFactory,
    pub provider: Arc<dyn ChatProvider>,
    pub compactor: Arc<dyn Compactor>,
    pub max_context_size: u32,
    pub max_steps: u32,
}

/// Finds the smallest-unused `<parent>_<label>_<n>` path, starting at 0
/// (spec §4.8: "`<base>_sub_<i>` with smallest free i").
pub fn allocate_child_path(parent_path: &Path, label: &str) -> PathBuf {
    let mut i: u64 = 0;
    loop {
        let candidate = PathBuf::from(format!("{}_{label}_{i}", parent_path.display()));
        if !candidate.exists() {
            return candidate;
        }
        i += 1;
    }
}

/// One freshly built child: its `Engine` plus the independent `MessageBus`
/// it publishes on, so a caller can subscribe before running it.
pub struct ChildEngine {
    pub engine: Engine,
    pub bus: MessageBus,
}

/// Builds a child `Engine` at `history_path`, registering every tool
/// `spawn_config.tool_factory` produces (and only those) into a brand new
/// registry, bus, and context store.
pub fn build_child_engine(
    child_agent: AgentConfig,
    history_path: PathBuf,
    workdir: &Path,
    approval: &Arc<Approval>,
    spawn_config: &ChildSpawnConfig,
) -> Result<ChildEngine, RegisterError> {
    let bus = MessageBus::new();
    let registry = ToolRegistry::new();
    for tool in (spawn_config.tool_factory)() {
        registry.register(tool, &bus, workdir, approval)?;
    }

    let context = Arc::new(ContextStore::new(history_path));
    let runtime = Runtime {
        provider: Arc::clone(&spawn_config.provider),
        context,
        bus: bus.clone(),
        approval: Arc::clone(approval),
        registry: Arc::new(registry),
        prompt_vars: PromptVars::build(workdir.to_path_buf(), Utc::now()),
        config: child_agent,
    };
    let agent_name = runtime.config.name.clone();
    let engine = Engine::new(
        runtime,
        Arc::clone(&spawn_config.compactor),
        spawn_config.max_context_size,
        spawn_config.max_steps,
    )
    .as_subagent(agent_name);

    Ok(ChildEngine { engine, bus })
}

/// Forwards `ApprovalRequest`/`HumanInputRequest` events from a child bus to
/// the parent bus so the user approves through one UI (spec §4.8). Runs
/// until the child bus closes; intended to be spawned alongside the child
/// run and left to end on its own once the child's `Engine` is dropped.
pub async fn forward_approval_requests(mut child: crate::bus::WireSubscription, parent: MessageBus) {
    while let Some(event) = child.recv().await {
        if matches!(
            event,
            crate::bus::WireEvent::ApprovalRequest { .. } | crate::bus::WireEvent::HumanInputRequest { .. }
        ) {
            parent.publish(event);
        }
    }
}

/// The last assistant-role message's text, only if history is non-empty and
/// its last entry is in fact an assistant message (spec §4.8: "Empty
/// history or non-assistant last message -> Error").
pub fn last_assistant_text(history: &[crate::message::Message]) -> Option<String> {
    match history.last() {
        Some(message) if message.role == crate::message::Role::Assistant => {
            Some(message.content.as_text())
        }
        _ => None,
    }
}
