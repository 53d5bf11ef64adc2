//! Jimi CLI: a thin REPL consumer of the agent execution core.
//!
//! Wires a real [`OpenAiChatProvider`] and a small file-backed `AgentConfig`
//! into an [`Engine`] and an [`AsyncSubagentManager`], then hands control to
//! the REPL. This crate owns none of the turn-loop semantics; it exists to
//! prove the core's external interface is reachable end to end.

mod log_format;
mod logging;
mod provider;
mod repl;

use std::path::PathBuf;
use std::sync::Arc;

use agent_core::{
    AgentConfig, Approval, AsyncSubagentManager, AsyncTaskTool, ChatProvider, ChildSpawnConfig,
    Compactor, ContextStore, Engine, LlmCompactor, MessageBus, PromptVars, Runtime, TaskTool, Tool,
    ToolRegistry,
};
use chrono::Utc;
use clap::Parser;

use provider::OpenAiChatProvider;

const DEFAULT_MAX_CONTEXT: u32 = 128_000;
const DEFAULT_MAX_STEPS: u32 = 50;
const KEEP_RECENT_MESSAGES: usize = 20;

#[derive(Parser, Debug)]
#[command(name = "jimi")]
#[command(about = "Jimi — interactive REPL over the agent execution core")]
struct Args {
    /// Working directory for tools, history, and async persistence. Defaults to the current directory.
    #[arg(short, long, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// One-shot message: run a single turn and exit instead of entering the REPL.
    #[arg(short, long, value_name = "TEXT")]
    message: Option<String>,

    /// Require interactive approval for gated actions instead of auto-approving everything.
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    config::load_and_apply("jimi", None::<&std::path::Path>).ok();
    logging::init()?;

    let args = Args::parse();
    let work_dir = args.work_dir.unwrap_or(std::env::current_dir()?);
    std::fs::create_dir_all(&work_dir)?;

    let provider_env = config::load_provider_env();
    let provider: Arc<dyn ChatProvider> = Arc::new(OpenAiChatProvider::new(
        provider_env.api_key,
        provider_env.base_url,
        provider_env.model,
    ));

    let bus = MessageBus::new();
    let approval = Arc::new(Approval::new(!args.strict));

    let jimi_dir = work_dir.join(".jimi");
    std::fs::create_dir_all(&jimi_dir)?;
    let history_path = jimi_dir.join("history.jsonl");
    let context = Arc::new(ContextStore::new(history_path.clone()));
    context.restore().ok();

    // Subagents started via Task/AsyncTask get a fresh registry with no
    // tools of their own and no further Task/AsyncTask access (child::
    // breaks the recursion structurally) — this CLI's job is proving the
    // wiring, not shipping a productized tool set.
    let spawn_config = ChildSpawnConfig {
        tool_factory: Arc::new(|| Vec::<Arc<dyn Tool>>::new()),
        provider: Arc::clone(&provider),
        compactor: Arc::new(LlmCompactor::new(Arc::clone(&provider), KEEP_RECENT_MESSAGES)),
        max_context_size: DEFAULT_MAX_CONTEXT,
        max_steps: DEFAULT_MAX_STEPS,
    };

    let agent_config = AgentConfig::new(
        "jimi",
        "You are Jimi, an interactive coding agent working in {{workDir}}. \
         The current time is {{now}}.\n\nFiles here:\n{{workDirListing}}\n\n{{agentsMd}}",
    )
    .with_allowed_tools(["Task", "AsyncTask"]);

    let registry = ToolRegistry::new();
    let task_tool = Arc::new(TaskTool::new(
        agent_config.clone(),
        spawn_config.clone(),
        history_path.clone(),
    ));
    registry.register(task_tool, &bus, &work_dir, &approval)?;

    let async_manager = AsyncSubagentManager::new(
        agent_config.clone(),
        spawn_config.clone(),
        history_path.clone(),
        work_dir.clone(),
        Arc::clone(&approval),
        bus.clone(),
    );
    let async_tool = Arc::new(AsyncTaskTool::with_manager(async_manager.clone()));
    registry.register(async_tool, &bus, &work_dir, &approval)?;

    let runtime = Runtime {
        provider: Arc::clone(&provider),
        context,
        bus,
        approval,
        registry: Arc::new(registry),
        config: agent_config,
        prompt_vars: PromptVars::build(work_dir.clone(), Utc::now()),
    };
    let compactor: Arc<dyn Compactor> =
        Arc::new(LlmCompactor::new(Arc::clone(&provider), KEEP_RECENT_MESSAGES));
    let engine = Engine::new(runtime, compactor, DEFAULT_MAX_CONTEXT, DEFAULT_MAX_STEPS);

    if let Some(message) = args.message {
        let mut sub = engine.runtime().bus.subscribe();
        let renderer = tokio::spawn(async move {
            while let Some(event) = sub.recv().await {
                repl::render_event(event).await;
            }
        });
        let result = engine.on_run(message).await;
        renderer.abort();
        println!();
        result?;
        return Ok(());
    }

    repl::run(engine, async_manager, work_dir).await
}
