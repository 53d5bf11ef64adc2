//! [`ToolCall`] (an LLM-requested invocation) and [`ToolResult`] (its outcome).

use serde::{Deserialize, Serialize};

/// One tool-call request from the assistant. `arguments` is a JSON-encoded
/// string (not a parsed `Value`) until [`crate::normalizer`] and the
/// registry's schema validation have run on it — this mirrors the wire shape
/// the LLM actually returns (§6: `function: {name, arguments: string}`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Outcome of executing one [`ToolCall`].
///
/// `Ok`/`Error`/`Rejected` all eventually become the content of a tool-role
/// [`crate::message::Message`] fed back to the LLM — `Error` and `Rejected`
/// are recoverable by design (spec §7): the LLM sees them and may retry or
/// change course, rather than the turn aborting.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolResult {
    Ok { output: String, brief: String },
    Error { message: String, detail: String },
    Rejected { reason: String },
}

impl ToolResult {
    pub fn ok(output: impl Into<String>, brief: impl Into<String>) -> Self {
        ToolResult::Ok {
            output: output.into(),
            brief: brief.into(),
        }
    }

    pub fn error(message: impl Into<String>, detail: impl Into<String>) -> Self {
        ToolResult::Error {
            message: message.into(),
            detail: detail.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        ToolResult::Rejected {
            reason: reason.into(),
        }
    }

    /// The body fed back to the LLM as the tool-role message content.
    pub fn as_llm_output(&self) -> String {
        match self {
            ToolResult::Ok { output, .. } => output.clone(),
            ToolResult::Error { message, detail } => {
                if detail.is_empty() {
                    format!("Error: {message}")
                } else {
                    format!("Error: {message}\n{detail}")
                }
            }
            ToolResult::Rejected { reason } => format!("Rejected: {reason}"),
        }
    }

    /// Short human summary, for UI / log lines.
    pub fn brief(&self) -> String {
        match self {
            ToolResult::Ok { brief, .. } => brief.clone(),
            ToolResult::Error { message, .. } => format!("error: {message}"),
            ToolResult::Rejected { reason } => format!("rejected: {reason}"),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ToolResult::Ok { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_output_is_fed_back_verbatim() {
        let result = ToolResult::ok("42", "computed 42");
        assert_eq!(result.as_llm_output(), "42");
        assert_eq!(result.brief(), "computed 42");
    }

    #[test]
    fn error_output_includes_detail_when_present() {
        let result = ToolResult::error("bad args", "expected integer");
        assert_eq!(result.as_llm_output(), "Error: bad args\nexpected integer");
    }

    #[test]
    fn error_output_omits_empty_detail() {
        let result = ToolResult::error("bad args", "");
        assert_eq!(result.as_llm_output(), "Error: bad args");
    }

    #[test]
    fn rejected_reports_reason() {
        let result = ToolResult::rejected("user declined");
        assert_eq!(result.as_llm_output(), "Rejected: user declined");
        assert!(!result.is_ok());
    }
}
