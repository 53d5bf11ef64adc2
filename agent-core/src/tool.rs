//! The `Tool` contract (spec §4.4): a single interface plus optional
//! capability injection, rather than the deep tool-class hierarchies the
//! source uses.

use async_trait::async_trait;
use serde_json::Value;

use crate::approval::Approval;
use crate::bus::MessageBus;
use crate::toolcall::ToolResult;

/// JSON-Schema description of one tool, as sent to the LLM.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A tool the LLM can invoke.
///
/// Capability injection (spec §4.4: "the registry injects it at
/// registration time") is modeled as default no-op methods on the trait
/// itself rather than separate marker interfaces — a tool that needs the
/// bus, working directory, or approval gate overrides the matching
/// `inject_*` method; every other tool ignores the call entirely.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn spec(&self) -> ToolSpec;

    /// Executes the tool body against already-schema-validated arguments.
    async fn execute(&self, args: Value) -> ToolResult;

    /// Called once at registration if this tool needs to publish events.
    fn inject_bus(&self, _bus: MessageBus) {}

    /// Called once at registration if this tool needs the session's working directory.
    fn inject_workdir(&self, _workdir: std::path::PathBuf) {}

    /// Called once at registration if this tool needs to gate on user approval.
    fn inject_approval(&self, _approval: std::sync::Arc<Approval>) {}
}
