//! History entries: [`Message`], its [`Role`], and the tagged [`ContentPart`] variants.
//!
//! These mirror the history-file wire shape bit-for-bit (external interface
//! §6): a normal message record serializes to exactly the JSON object shape
//! documented there, with absent optional fields omitted rather than written
//! as `null`.

use serde::{Deserialize, Serialize};

use crate::toolcall::ToolCall;

/// Role of a [`Message`] in conversation history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One part of a multi-part message body. Extensible for future media parts;
/// `Text` is the only variant the core itself produces or consumes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
}

/// Message content: either a plain string or an ordered list of parts.
///
/// Most history entries use `Text`; `Parts` exists for future multi-modal
/// content without changing the wire shape of plain-text messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Renders this content as plain text, concatenating part text with no separator.
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.as_str(),
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

/// One entry of conversation history.
///
/// Invariant (spec §3): every `tool`-role message's `tool_call_id` must refer
/// to a tool call present in the immediately-preceding assistant message.
/// The core enforces this by construction — tool-role messages are only ever
/// produced by [`crate::registry::ToolRegistry::execute_batch`] from the
/// assistant message's own `tool_calls` — never accepted as free-form input.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<Content>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<Content>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<Content>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Builds an assistant message carrying tool calls instead of (necessarily) prose.
    pub fn assistant_with_tool_calls(content: impl Into<Content>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            reasoning: None,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<Content>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            reasoning: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: None,
        }
    }

    fn plain(role: Role, content: impl Into<Content>) -> Self {
        Self {
            role,
            content: content.into(),
            reasoning: None,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Tool calls this assistant message requested, if any.
    pub fn requested_tool_calls(&self) -> &[ToolCall] {
        match &self.tool_calls {
            Some(calls) => calls,
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_role_message_serializes_with_tool_call_id() {
        let msg = Message::tool_result("call_1", "ok");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_1");
        assert!(value.get("tool_calls").is_none());
    }

    #[test]
    fn plain_message_omits_optional_fields() {
        let msg = Message::user("hi");
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("reasoning").is_none());
        assert!(value.get("tool_calls").is_none());
        assert!(value.get("tool_call_id").is_none());
    }

    #[test]
    fn content_as_text_joins_parts() {
        let content = Content::Parts(vec![
            ContentPart::Text { text: "a".into() },
            ContentPart::Text { text: "b".into() },
        ]);
        assert_eq!(content.as_text(), "ab");
    }

    #[test]
    fn round_trips_through_json() {
        let msg = Message::assistant_with_tool_calls(
            "calling a tool",
            vec![ToolCall {
                id: "call_1".into(),
                name: "Task".into(),
                arguments: "{}".into(),
            }],
        );
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.requested_tool_calls().len(), 1);
        assert_eq!(back.requested_tool_calls()[0].name, "Task");
    }
}
