//! The `ChatProvider` contract: the only seam between the core and an
//! actual LLM HTTP/JSON wire format, which is explicitly out of scope
//! (spec §1). [`MockChatProvider`] is the test double every other module's
//! tests are built against.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{Content, Message};
use crate::toolcall::ToolCall;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    RequestFailed(String),
    #[error("provider returned an unparsable response: {0}")]
    UnparsableResponse(String),
}

/// Token usage for one completion call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One LLM completion: assistant content, optional tool calls, optional usage.
#[derive(Clone, Debug)]
pub struct ChatResponse {
    pub content: Content,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
}

impl ChatResponse {
    pub fn into_message(self) -> Message {
        Message {
            role: crate::message::Role::Assistant,
            content: self.content,
            reasoning: self.reasoning,
            tool_calls: if self.tool_calls.is_empty() {
                None
            } else {
                Some(self.tool_calls)
            },
            tool_call_id: None,
            name: None,
        }
    }
}

/// Generates the next assistant turn given the rendered system prompt, full
/// history, and the tool schemas currently allowed for this agent (spec
/// §6: `generate(systemPrompt, history, schemas)`).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tool_schemas: &[serde_json::Value],
    ) -> Result<ChatResponse, ProviderError>;
}

/// Fixed or stateful fake provider for tests: returns one assistant message
/// and optional tool_calls on the first call, and a second fixed response on
/// every subsequent call (mirrors the ReAct-loop termination test pattern).
pub struct MockChatProvider {
    first: ChatResponse,
    second: Option<ChatResponse>,
    call_count: Mutex<AtomicUsize>,
}

impl MockChatProvider {
    /// A provider whose only response has no tool calls — ends the turn loop immediately.
    pub fn with_no_tool_calls(content: impl Into<String>) -> Self {
        Self {
            first: ChatResponse {
                content: Content::Text(content.into()),
                reasoning: None,
                tool_calls: Vec::new(),
                usage: None,
            },
            second: None,
            call_count: Mutex::new(AtomicUsize::new(0)),
        }
    }

    /// A provider whose first response requests `tool_calls`; every later
    /// call returns `second_content` with no tool calls.
    pub fn stateful(
        first_content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
        second_content: impl Into<String>,
    ) -> Self {
        Self {
            first: ChatResponse {
                content: Content::Text(first_content.into()),
                reasoning: None,
                tool_calls,
                usage: None,
            },
            second: Some(ChatResponse {
                content: Content::Text(second_content.into()),
                reasoning: None,
                tool_calls: Vec::new(),
                usage: None,
            }),
            call_count: Mutex::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    async fn generate(
        &self,
        _system_prompt: &str,
        _messages: &[Message],
        _tool_schemas: &[serde_json::Value],
    ) -> Result<ChatResponse, ProviderError> {
        let count = {
            let counter = self.call_count.lock().unwrap();
            counter.fetch_add(1, Ordering::SeqCst)
        };
        if count == 0 || self.second.is_none() {
            Ok(self.first.clone())
        } else {
            Ok(self.second.clone().unwrap())
        }
    }
}

impl Clone for ChatResponse {
    fn clone(&self) -> Self {
        Self {
            content: self.content.clone(),
            reasoning: self.reasoning.clone(),
            tool_calls: self.tool_calls.clone(),
            usage: self.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_tool_calls_response_ends_immediately() {
        let provider = MockChatProvider::with_no_tool_calls("done");
        let response = provider.generate("you are jimi", &[], &[]).await.unwrap();
        assert!(response.tool_calls.is_empty());
        assert_eq!(response.content.as_text(), "done");
    }

    #[tokio::test]
    async fn stateful_provider_switches_after_first_call() {
        let provider = MockChatProvider::stateful(
            "calling a tool",
            vec![ToolCall {
                id: "call_1".into(),
                name: "Task".into(),
                arguments: "{}".into(),
            }],
            "finished",
        );
        let first = provider.generate("you are jimi", &[], &[]).await.unwrap();
        assert_eq!(first.tool_calls.len(), 1);
        let second = provider.generate("you are jimi", &[], &[]).await.unwrap();
        assert!(second.tool_calls.is_empty());
        assert_eq!(second.content.as_text(), "finished");
    }
}
