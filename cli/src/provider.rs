//! A production [`ChatProvider`] speaking the OpenAI-compatible chat
//! completions wire format over HTTP.
//!
//! The core's only seam to an actual LLM is deliberately out of its scope
//! (`ChatProvider` is a plain trait `agent-core` never implements against a
//! real endpoint); this is that implementation, kept at the CLI layer.
//! Grounded in the teacher's `loom::llm::ChatOpenAI` client — same endpoint
//! shape, same reliance on `reqwest` — but written directly against the wire
//! format instead of through an SDK, since `ChatProvider::generate`'s
//! contract (system prompt, history, schemas in, one response out) already
//! sits a level above any particular request builder.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use agent_core::chat_provider::{ChatProvider, ChatResponse, ProviderError, Usage};
use agent_core::message::{Content, Message, Role};
use agent_core::toolcall::ToolCall;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Talks to an OpenAI-compatible `/chat/completions` endpoint. Any
/// self-hosted or proxy server that mirrors that shape (the common case for
/// this corpus) works unchanged by pointing `base_url` at it.
pub struct OpenAiChatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiChatProvider {
    pub fn new(api_key: Option<String>, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize, Clone)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: Value,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// OpenAI allows (and for assistant tool-call turns, expects) a null
/// `content` alongside `tool_calls` rather than an empty string.
fn to_wire_message(message: &Message) -> WireMessage {
    let tool_calls: Option<Vec<WireToolCall>> = message.tool_calls.as_ref().map(|calls| {
        calls
            .iter()
            .map(|c| WireToolCall {
                id: c.id.clone(),
                kind: "function".to_string(),
                function: WireFunctionCall {
                    name: c.name.clone(),
                    arguments: c.arguments.clone(),
                },
            })
            .collect()
    });
    let text = message.content.as_text();
    let content = if tool_calls.is_some() && text.is_empty() {
        None
    } else {
        Some(text)
    };
    WireMessage {
        role: role_str(message.role),
        content,
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

#[async_trait]
impl ChatProvider for OpenAiChatProvider {
    async fn generate(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tool_schemas: &[Value],
    ) -> Result<ChatResponse, ProviderError> {
        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        wire_messages.push(WireMessage {
            role: "system",
            content: Some(system_prompt.to_string()),
            tool_calls: None,
            tool_call_id: None,
        });
        wire_messages.extend(messages.iter().map(to_wire_message));

        let tools = tool_schemas
            .iter()
            .map(|schema| WireTool {
                kind: "function",
                function: schema.clone(),
            })
            .collect();

        let request = ChatRequest {
            model: self.model.clone(),
            messages: wire_messages,
            tools,
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut req = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed(format!("{status}: {body}")));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| ProviderError::UnparsableResponse(e.to_string()))?;

        let choice = completion.choices.into_iter().next().ok_or_else(|| {
            ProviderError::UnparsableResponse("response had no choices".to_string())
        })?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|c| ToolCall {
                id: c.id,
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect();

        Ok(ChatResponse {
            content: Content::Text(choice.message.content.unwrap_or_default()),
            reasoning: None,
            tool_calls,
            usage: completion.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::toolcall::ToolCall;

    #[test]
    fn plain_message_keeps_its_text_as_content() {
        let message = Message::user("hello");
        let wire = to_wire_message(&message);
        assert_eq!(wire.role, "user");
        assert_eq!(wire.content.as_deref(), Some("hello"));
        assert!(wire.tool_calls.is_none());
    }

    #[test]
    fn assistant_tool_call_turn_has_null_content_not_empty_string() {
        let message = Message::assistant_with_tool_calls(
            "",
            vec![ToolCall {
                id: "call_1".into(),
                name: "Task".into(),
                arguments: "{}".into(),
            }],
        );
        let wire = to_wire_message(&message);
        assert!(wire.content.is_none());
        assert_eq!(wire.tool_calls.unwrap().len(), 1);
    }

    #[test]
    fn tool_result_message_carries_its_call_id() {
        let message = Message::tool_result("call_1", "done");
        let wire = to_wire_message(&message);
        assert_eq!(wire.role, "tool");
        assert_eq!(wire.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn new_falls_back_to_default_endpoint_and_model() {
        let provider = OpenAiChatProvider::new(None, None, None);
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
        assert_eq!(provider.model, DEFAULT_MODEL);
    }
}
