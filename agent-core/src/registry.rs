//! [`ToolRegistry`]: holds registered [`Tool`]s, performs capability
//! injection at registration, and is the only place argument normalization,
//! schema validation, and tool dispatch happen (spec §4.4).

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;

use crate::approval::Approval;
use crate::bus::MessageBus;
use crate::normalizer;
use crate::tool::{Tool, ToolSpec};
use crate::toolcall::{ToolCall, ToolResult};

#[derive(Error, Debug)]
pub enum RegisterError {
    #[error("tool already registered: {0}")]
    DuplicateName(String),
}

/// Holds every tool available to one agent's turn loop.
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, running capability injection immediately.
    pub fn register(
        &self,
        tool: Arc<dyn Tool>,
        bus: &MessageBus,
        workdir: &std::path::Path,
        approval: &Arc<Approval>,
    ) -> Result<(), RegisterError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegisterError::DuplicateName(name));
        }
        tool.inject_bus(bus.clone());
        tool.inject_workdir(workdir.to_path_buf());
        tool.inject_approval(Arc::clone(approval));
        self.tools.insert(name, tool);
        Ok(())
    }

    /// JSON-Schema descriptions for the given tool names, in the LLM-facing
    /// wire shape, skipping any name not registered.
    pub fn schemas(&self, allowed_names: &[String]) -> Vec<ToolSpec> {
        allowed_names
            .iter()
            .filter_map(|name| self.tools.get(name).map(|t| t.spec()))
            .collect()
    }

    /// Normalizes, locates, validates, and runs one tool call.
    pub async fn execute(&self, name: &str, args_string: &str) -> ToolResult {
        let normalized = normalizer::normalize(args_string);

        let Some(tool) = self.tools.get(name).map(|t| Arc::clone(t.value())) else {
            return ToolResult::error("unknown tool", name.to_string());
        };

        let args: Value = match serde_json::from_str(&normalized) {
            Ok(v) => v,
            Err(e) => return ToolResult::error("invalid arguments", e.to_string()),
        };

        if let Err(e) = validate_against_schema(&args, &tool.spec().input_schema) {
            return ToolResult::error("invalid arguments", e);
        }

        tool.execute(args).await
    }

    /// Filters a raw LLM tool-call batch down to the calls that can be
    /// executed (spec §4.3): drop entries lacking id or name, drop
    /// duplicate ids, drop entries whose arguments don't normalize to valid
    /// JSON.
    pub fn validate_batch(&self, calls: Vec<ToolCall>) -> Vec<ToolCall> {
        let mut seen_ids = std::collections::HashSet::new();
        let mut surviving = Vec::with_capacity(calls.len());
        for call in calls {
            if call.id.is_empty() || call.name.is_empty() {
                tracing::warn!("dropping tool call missing id or name");
                continue;
            }
            if !seen_ids.insert(call.id.clone()) {
                tracing::warn!(id = %call.id, "dropping duplicate tool call id");
                continue;
            }
            let normalized = normalizer::normalize(&call.arguments);
            if serde_json::from_str::<Value>(&normalized).is_err() {
                tracing::warn!(id = %call.id, "dropping tool call with unparsable arguments");
                continue;
            }
            surviving.push(call);
        }
        surviving
    }

    /// Executes every call in `calls` concurrently, returning results in the
    /// same order as `calls` regardless of completion order (spec §8:
    /// tool-call batch ordering).
    pub async fn execute_batch(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let futures = calls
            .iter()
            .map(|call| self.execute(&call.name, &call.arguments));
        futures::future::join_all(futures).await
    }
}

/// A minimal structural check: every schema-declared required property is
/// present and the top-level value is an object when the schema is.
fn validate_against_schema(args: &Value, schema: &Value) -> Result<(), String> {
    if schema.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
        return Err("expected a JSON object".to_string());
    }
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required {
            let Some(field_name) = field.as_str() else {
                continue;
            };
            if args.get(field_name).is_none() {
                return Err(format!("missing required field: {field_name}"));
            }
        }
    }
    Ok(())
}
