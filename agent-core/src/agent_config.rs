//! [`AgentConfig`]: the external, immutable input that names an agent
//! (spec §3). YAML parsing and filesystem layout of agents/skills/hooks are
//! explicitly out of scope (spec §1) — this module is just the in-memory
//! shape callers construct however they load it.

use std::collections::HashMap;

/// A named agent: system prompt template, tool whitelist, and named
/// subagent specs it may dispatch `Task`/`AsyncTask` calls to.
///
/// Immutable once loaded; safe to share (via `Arc`) across sessions.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub name: String,
    pub system_prompt_template: String,
    pub allowed_tool_names: Vec<String>,
    pub subagents: HashMap<String, AgentConfig>,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, system_prompt_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt_template: system_prompt_template.into(),
            allowed_tool_names: Vec::new(),
            subagents: HashMap::new(),
        }
    }

    pub fn with_allowed_tools(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_tool_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_subagent(mut self, name: impl Into<String>, spec: AgentConfig) -> Self {
        self.subagents.insert(name.into(), spec);
        self
    }

    pub fn subagent(&self, name: &str) -> Option<&AgentConfig> {
        self.subagents.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_tools_and_subagents() {
        let reviewer = AgentConfig::new("reviewer", "You review code.");
        let config = AgentConfig::new("main", "You are Jimi.")
            .with_allowed_tools(["Task", "AsyncTask"])
            .with_subagent("reviewer", reviewer);

        assert_eq!(config.allowed_tool_names, vec!["Task", "AsyncTask"]);
        assert!(config.subagent("reviewer").is_some());
        assert!(config.subagent("missing").is_none());
    }
}
