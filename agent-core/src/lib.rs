//! The agent execution core: turn loop, context store, tool registry and
//! approval gate, and the synchronous/asynchronous subagent dispatchers.
//!
//! Wire-protocol plumbing (HTTP to an actual LLM, the CLI's own rendering)
//! lives outside this crate; `agent-core` owns only the loop that drives one
//! session's turns and the subagent machinery built on top of it.

pub mod agent_config;
pub mod approval;
pub mod async_subagent;
pub mod bus;
pub mod chat_provider;
pub mod child;
pub mod compaction;
pub mod context_store;
pub mod engine;
pub mod error;
pub mod message;
pub mod normalizer;
pub mod persistence;
pub mod registry;
pub mod runtime;
pub mod task;
pub mod tool;
pub mod toolcall;

pub use agent_config::AgentConfig;
pub use approval::{Approval, ApprovalDecision};
pub use async_subagent::{AsyncSubagentManager, AsyncTaskTool};
pub use bus::{MessageBus, ResolveHandle, WireEvent, WireSubscription};
pub use chat_provider::{ChatProvider, ChatResponse, ProviderError, Usage};
pub use child::{ChildEngine, ChildSpawnConfig, ToolFactory};
pub use compaction::{Compactor, LlmCompactor};
pub use context_store::{ContextStore, ContextStoreError};
pub use engine::Engine;
pub use error::EngineError;
pub use message::{Content, ContentPart, Message, Role};
pub use persistence::AsyncSubagentPersistence;
pub use registry::{RegisterError, ToolRegistry};
pub use runtime::{PromptVars, Runtime};
pub use task::TaskTool;
pub use tool::{Tool, ToolSpec};
pub use toolcall::{ToolCall, ToolResult};
