//! The `Task` tool: the synchronous subagent dispatcher (spec §4.8). Spawns
//! a child `Engine` with a fresh context, runs it to completion, and
//! returns its final assistant text — recursion is broken because the
//! child's registry never includes `Task`/`AsyncTask`.

use std::path::PathBuf;
use std::sync::OnceLock;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent_config::AgentConfig;
use crate::approval::Approval;
use crate::bus::MessageBus;
use crate::child::{self, ChildSpawnConfig};
use crate::tool::{Tool, ToolSpec};
use crate::toolcall::ToolResult;

/// The response length, in characters, below which `Task` asks the child
/// for one more, more comprehensive pass before giving up (spec §4.8).
const MIN_RESPONSE_LEN: usize = 200;

/// Builds and runs one child `Engine` per invocation.
pub struct TaskTool {
    parent_agent: AgentConfig,
    spawn_config: ChildSpawnConfig,
    base_history_path: PathBuf,
    workdir: OnceLock<PathBuf>,
    approval: OnceLock<std::sync::Arc<Approval>>,
    bus: OnceLock<MessageBus>,
}

impl TaskTool {
    pub fn new(parent_agent: AgentConfig, spawn_config: ChildSpawnConfig, base_history_path: PathBuf) -> Self {
        Self {
            parent_agent,
            spawn_config,
            base_history_path,
            workdir: OnceLock::new(),
            approval: OnceLock::new(),
            bus: OnceLock::new(),
        }
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "Task"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "Task".to_string(),
            description: "Dispatches a sub-task to a named subagent and waits for its result."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "description": { "type": "string" },
                    "subagent_name": { "type": "string" },
                    "prompt": { "type": "string" },
                },
                "required": ["description", "subagent_name", "prompt"],
            }),
        }
    }

    fn inject_bus(&self, bus: MessageBus) {
        let _ = self.bus.set(bus);
    }

    fn inject_workdir(&self, workdir: PathBuf) {
        let _ = self.workdir.set(workdir);
    }

    fn inject_approval(&self, approval: std::sync::Arc<Approval>) {
        let _ = self.approval.set(approval);
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(subagent_name) = args.get("subagent_name").and_then(Value::as_str) else {
            return ToolResult::error("invalid arguments", "missing subagent_name");
        };
        let Some(prompt) = args.get("prompt").and_then(Value::as_str) else {
            return ToolResult::error("invalid arguments", "missing prompt");
        };

        let Some(child_agent) = self.parent_agent.subagent(subagent_name) else {
            return ToolResult::error(
                "unknown subagent",
                format!("no subagent named '{subagent_name}'"),
            );
        };

        let (Some(workdir), Some(approval), Some(parent_bus)) =
            (self.workdir.get(), self.approval.get(), self.bus.get())
        else {
            return ToolResult::error("Task tool not fully initialized", "");
        };

        let history_path = child::allocate_child_path(&self.base_history_path, "sub");
        let built = match child::build_child_engine(
            child_agent.clone(),
            history_path,
            workdir,
            approval,
            &self.spawn_config,
        ) {
            Ok(built) => built,
            Err(e) => return ToolResult::error("failed to build subagent", e.to_string()),
        };

        let forwarder = tokio::spawn(child::forward_approval_requests(
            built.bus.subscribe(),
            parent_bus.clone(),
        ));

        if let Err(e) = built.engine.on_run(prompt).await {
            forwarder.abort();
            return ToolResult::error("subagent failed", e.to_string());
        }

        let history = built.engine.runtime().context.history();
        let Some(mut text) = child::last_assistant_text(&history) else {
            forwarder.abort();
            return ToolResult::error("subagent did not run", "");
        };

        if text.trim().is_empty() || text.chars().count() < MIN_RESPONSE_LEN {
            if built
                .engine
                .on_run("Please respond more comprehensively.")
                .await
                .is_ok()
            {
                let history = built.engine.runtime().context.history();
                if let Some(retried) = child::last_assistant_text(&history) {
                    text = retried;
                }
            }
        }

        forwarder.abort();
        ToolResult::ok(text, "Subagent task completed")
    }
}
