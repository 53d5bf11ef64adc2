//! Compaction (spec §4.6): when the conversation nears the model's context
//! budget, summarize discarded history into a seed, revert to checkpoint 0,
//! and append the summary in its place.

use std::sync::Arc;

use async_trait::async_trait;

use crate::chat_provider::ChatProvider;
use crate::message::Message;

/// Tokens subtracted from the model's max context to leave headroom for the
/// next generation (spec §4.6).
pub const RESERVED_TOKENS: u32 = 50_000;

/// Whether the Engine should trigger compaction before the next step.
pub fn should_compact(token_count: u32, max_context_size: u32) -> bool {
    token_count > max_context_size.saturating_sub(RESERVED_TOKENS)
}

/// Summarizes history into a replacement that fits well within budget.
#[async_trait]
pub trait Compactor: Send + Sync {
    async fn compact(&self, history: &[Message], token_budget: u32) -> Vec<Message>;
}

/// Production compactor: summarizes everything but the most recent
/// `keep_recent` messages via the `ChatProvider`, per spec §4.6 — the
/// replacement preserves a summary of discarded content as a single
/// assistant/user pair plus the most recent messages verbatim.
pub struct LlmCompactor {
    provider: Arc<dyn ChatProvider>,
    keep_recent: usize,
}

impl LlmCompactor {
    pub fn new(provider: Arc<dyn ChatProvider>, keep_recent: usize) -> Self {
        Self { provider, keep_recent }
    }
}

#[async_trait]
impl Compactor for LlmCompactor {
    async fn compact(&self, history: &[Message], _token_budget: u32) -> Vec<Message> {
        if history.len() <= self.keep_recent {
            return history.to_vec();
        }

        let split_at = history.len() - self.keep_recent;
        let (discarded, recent) = history.split_at(split_at);

        let summarization_prompt = Message::user(format!(
            "Summarize the following conversation history concisely, preserving any \
             decisions, open tasks, and file paths mentioned:\n\n{}",
            render_for_summary(discarded)
        ));

        let summary = match self
            .provider
            .generate(
                "Summarize conversation history concisely.",
                std::slice::from_ref(&summarization_prompt),
                &[],
            )
            .await
        {
            Ok(response) => response.content.as_text(),
            // Failure leaves history intact (spec §4.6).
            Err(_) => return history.to_vec(),
        };

        let mut replacement = vec![
            Message::user("The conversation so far has been summarized to save space."),
            Message::assistant(summary),
        ];
        replacement.extend_from_slice(recent);
        replacement
    }
}

fn render_for_summary(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{:?}: {}", m.role, m.content.as_text()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_provider::MockChatProvider;

    #[test]
    fn should_compact_triggers_past_reserved_headroom() {
        assert!(should_compact(100_000, 120_000));
        assert!(!should_compact(50_000, 120_000));
    }

    #[tokio::test]
    async fn short_history_passes_through_unchanged() {
        let provider = Arc::new(MockChatProvider::with_no_tool_calls("summary"));
        let compactor = LlmCompactor::new(provider, 20);
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let result = compactor.compact(&history, 1000).await;
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn long_history_is_summarized_with_recent_tail_kept() {
        let provider = Arc::new(MockChatProvider::with_no_tool_calls("summary of the past"));
        let compactor = LlmCompactor::new(provider, 2);
        let history: Vec<Message> = (0..10).map(|i| Message::user(format!("msg {i}"))).collect();
        let result = compactor.compact(&history, 1000).await;
        // 2 summary messages + 2 recent kept verbatim
        assert_eq!(result.len(), 4);
        assert_eq!(result[1].content.as_text(), "summary of the past");
        assert_eq!(result[2].content.as_text(), "msg 8");
        assert_eq!(result[3].content.as_text(), "msg 9");
    }
}
