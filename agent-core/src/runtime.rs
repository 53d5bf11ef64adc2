//! [`Runtime`]: the per-session bundle an [`crate::engine::Engine`] is built
//! from (spec §3). Lifecycle is exactly one session; `Task`/`AsyncTask`
//! construct a fresh `Runtime` per child rather than sharing one.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::agent_config::AgentConfig;
use crate::approval::Approval;
use crate::bus::MessageBus;
use crate::chat_provider::ChatProvider;
use crate::context_store::ContextStore;
use crate::registry::ToolRegistry;

/// Prompt variables the system-prompt template may interpolate, built fresh
/// at the start of each turn (spec §3: "now, workDir, workDirListing, AGENTS.md content").
#[derive(Clone, Debug)]
pub struct PromptVars {
    pub now: DateTime<Utc>,
    pub work_dir: PathBuf,
    pub work_dir_listing: String,
    pub agents_md: Option<String>,
}

impl PromptVars {
    /// Builds prompt variables by listing `work_dir`'s immediate entries and
    /// reading `AGENTS.md` from it if present. `now` is supplied by the
    /// caller rather than sampled here, keeping this function pure and
    /// deterministic for tests.
    pub fn build(work_dir: PathBuf, now: DateTime<Utc>) -> Self {
        let work_dir_listing = std::fs::read_dir(&work_dir)
            .map(|entries| {
                let mut names: Vec<String> = entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect();
                names.sort();
                names.join("\n")
            })
            .unwrap_or_default();
        let agents_md = std::fs::read_to_string(work_dir.join("AGENTS.md")).ok();
        Self {
            now,
            work_dir,
            work_dir_listing,
            agents_md,
        }
    }
}

/// Everything one agent turn loop needs, owned exclusively by its
/// [`crate::engine::Engine`] (spec §3: "Engine exclusively owns its
/// ContextStore, MessageBus, ToolRegistry").
pub struct Runtime {
    pub provider: Arc<dyn ChatProvider>,
    pub context: Arc<ContextStore>,
    pub bus: MessageBus,
    pub approval: Arc<Approval>,
    pub registry: Arc<ToolRegistry>,
    pub config: AgentConfig,
    pub prompt_vars: PromptVars,
}

impl Runtime {
    /// Renders the system prompt by substituting `{{now}}`, `{{workDir}}`,
    /// `{{workDirListing}}`, and `{{agentsMd}}` placeholders in the agent's
    /// template.
    pub fn render_system_prompt(&self) -> String {
        self.config
            .system_prompt_template
            .replace("{{now}}", &self.prompt_vars.now.to_rfc3339())
            .replace("{{workDir}}", &self.prompt_vars.work_dir.display().to_string())
            .replace("{{workDirListing}}", &self.prompt_vars.work_dir_listing)
            .replace(
                "{{agentsMd}}",
                self.prompt_vars.agents_md.as_deref().unwrap_or(""),
            )
    }
}
