//! The turn loop (spec §4.7): reason → tool-call → resume, parameterized by
//! a per-run `max_steps`.

use std::sync::Arc;

use crate::bus::WireEvent;
use crate::compaction::{self, Compactor};
use crate::error::EngineError;
use crate::message::Message;
use crate::registry::ToolRegistry;
use crate::runtime::Runtime;
use crate::toolcall::ToolResult;

/// Drives one session's turns against a [`Runtime`].
pub struct Engine {
    runtime: Runtime,
    compactor: Arc<dyn Compactor>,
    max_context_size: u32,
    max_steps: u32,
    is_sub: bool,
    agent_name: Option<String>,
}

impl Engine {
    pub fn new(
        runtime: Runtime,
        compactor: Arc<dyn Compactor>,
        max_context_size: u32,
        max_steps: u32,
    ) -> Self {
        Self {
            runtime,
            compactor,
            max_context_size,
            max_steps,
            is_sub: false,
            agent_name: None,
        }
    }

    /// Marks this Engine as driving a subagent, for `StepBegin.isSub`/`agentName`.
    pub fn as_subagent(mut self, agent_name: impl Into<String>) -> Self {
        self.is_sub = true;
        self.agent_name = Some(agent_name.into());
        self
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Runs a full turn for `user_input`: checkpoints before and after each
    /// step, compacts when over budget, and repeats `doStep` until the
    /// assistant stops requesting tool calls or `max_steps` is exceeded.
    pub async fn on_run(&self, user_input: impl Into<String>) -> Result<(), EngineError> {
        self.runtime.context.checkpoint(false)?; // id 0
        self.runtime
            .context
            .append(vec![Message::user(user_input.into())])?;

        let mut step: u32 = 1;
        loop {
            if step > self.max_steps {
                return Err(EngineError::MaxStepsReached);
            }

            self.runtime.bus.publish(WireEvent::StepBegin {
                step,
                is_sub: self.is_sub,
                agent_name: self.agent_name.clone(),
            });

            self.maybe_compact().await?;
            self.runtime.context.checkpoint(true)?;

            let result = self.do_step().await;
            let finished = match result {
                Ok(finished) => finished,
                Err(err) => {
                    self.runtime.bus.publish(WireEvent::StepInterrupted);
                    return Err(err);
                }
            };
            if finished {
                return Ok(());
            }
            step += 1;
        }
    }

    async fn maybe_compact(&self) -> Result<(), EngineError> {
        let token_count = self.runtime.context.token_count();
        if !compaction::should_compact(token_count, self.max_context_size) {
            return Ok(());
        }
        self.run_compaction().await
    }

    /// Compacts history now, regardless of `tokenCount`. The `/compact`
    /// slash command dispatches straight to this rather than waiting for
    /// the engine to notice the budget is exceeded.
    pub async fn compact_now(&self) -> Result<(), EngineError> {
        self.run_compaction().await
    }

    async fn run_compaction(&self) -> Result<(), EngineError> {
        self.runtime.bus.publish(WireEvent::CompactionBegin);
        let history = self.runtime.context.history();
        let replacement = self
            .compactor
            .compact(&history, self.max_context_size - compaction::RESERVED_TOKENS)
            .await;
        self.runtime.context.revert_to(0)?;
        self.runtime.context.append(replacement)?;
        self.runtime.bus.publish(WireEvent::CompactionEnd);
        Ok(())
    }

    /// Runs one reason/act step. Returns `Ok(true)` when the turn is
    /// finished (no tool calls requested, or the provider failed and we
    /// degraded gracefully).
    async fn do_step(&self) -> Result<bool, EngineError> {
        let schemas: Vec<serde_json::Value> = self
            .runtime
            .registry
            .schemas(&self.runtime.config.allowed_tool_names)
            .into_iter()
            .map(|s| {
                serde_json::json!({
                    "name": s.name,
                    "description": s.description,
                    "parameters": s.input_schema,
                })
            })
            .collect();

        let system_prompt = self.runtime.render_system_prompt();
        let history = self.runtime.context.history();
        let response = match self
            .runtime
            .provider
            .generate(&system_prompt, &history, &schemas)
            .await
        {
            Ok(response) => response,
            Err(_) => {
                self.runtime.context.append(vec![Message::assistant(
                    "I hit an error talking to the model and am stopping here.",
                )])?;
                return Ok(true);
            }
        };

        if let Some(reasoning) = response.reasoning.clone() {
            if !reasoning.is_empty() {
                self.runtime.bus.publish(WireEvent::ContentDelta {
                    kind: stream_event::ContentKind::Reasoning,
                    text: reasoning,
                });
            }
        }
        let content_text = response.content.as_text();
        if !content_text.is_empty() {
            self.runtime.bus.publish(WireEvent::ContentDelta {
                kind: stream_event::ContentKind::Content,
                text: content_text,
            });
        }

        if let Some(usage) = response.usage {
            self.runtime.bus.publish(WireEvent::TokenUsage {
                prompt: usage.prompt_tokens,
                completion: usage.completion_tokens,
                total: usage.total_tokens,
            });
            self.runtime.context.update_token_count(usage.total_tokens)?;
        }

        let assistant_message = response.into_message();
        self.runtime.context.append(vec![assistant_message.clone()])?;

        let requested = assistant_message.requested_tool_calls().to_vec();
        if requested.is_empty() {
            return Ok(true);
        }

        let surviving = self.runtime.registry.validate_batch(requested);
        if surviving.is_empty() {
            return Ok(true);
        }

        for call in &surviving {
            self.runtime.bus.publish(WireEvent::ToolCallBegin {
                tool_call: call.clone(),
            });
        }

        let results = self.runtime.registry.execute_batch(&surviving).await;

        let mut tool_messages = Vec::with_capacity(surviving.len());
        for (call, result) in surviving.iter().zip(results.into_iter()) {
            self.runtime.bus.publish(WireEvent::ToolResultEvent {
                tool_call_id: call.id.clone(),
                result: result.clone(),
            });
            tool_messages.push(message_for_result(call, &result));
        }

        self.runtime.context.append(tool_messages)?;
        Ok(false)
    }
}

fn message_for_result(call: &crate::toolcall::ToolCall, result: &ToolResult) -> Message {
    Message::tool_result(call.id.clone(), result.as_llm_output())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_config::AgentConfig;
    use crate::approval::Approval;
    use crate::bus::MessageBus;
    use crate::chat_provider::MockChatProvider;
    use crate::context_store::ContextStore;
    use crate::runtime::PromptVars;
    use chrono::Utc;

    struct NoopCompactor;

    #[async_trait::async_trait]
    impl Compactor for NoopCompactor {
        async fn compact(&self, history: &[Message], _budget: u32) -> Vec<Message> {
            history.to_vec()
        }
    }

    fn fixture_engine(provider: Arc<dyn crate::chat_provider::ChatProvider>) -> Engine {
        let dir = tempfile::tempdir().unwrap();
        let context = Arc::new(ContextStore::new(dir.path().join("history.jsonl")));
        std::mem::forget(dir);
        let runtime = Runtime {
            provider,
            context,
            bus: MessageBus::new(),
            approval: Arc::new(Approval::new(true)),
            registry: Arc::new(ToolRegistry::new()),
            config: AgentConfig::new("main", "You are Jimi."),
            prompt_vars: PromptVars::build(dir.path().to_path_buf(), Utc::now()),
        };
        Engine::new(runtime, Arc::new(NoopCompactor), 128_000, 10)
    }

    #[tokio::test]
    async fn scenario_turn_termination_without_tool_calls() {
        let provider = Arc::new(MockChatProvider::with_no_tool_calls("done"));
        let engine = fixture_engine(provider);
        let mut sub = engine.runtime().bus.subscribe();

        engine.on_run("hello").await.unwrap();

        assert!(matches!(
            sub.recv().await,
            Some(WireEvent::StepBegin { step: 1, .. })
        ));
        let history = engine.runtime().context.history();
        // user input + assistant reply
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content.as_text(), "done");
    }

    #[tokio::test]
    async fn max_steps_is_enforced() {
        // A provider that always requests a tool call, so the loop never
        // terminates on its own and must hit the step cap.
        struct AlwaysCalling;
        #[async_trait::async_trait]
        impl crate::chat_provider::ChatProvider for AlwaysCalling {
            async fn generate(
                &self,
                _system_prompt: &str,
                _messages: &[Message],
                _schemas: &[serde_json::Value],
            ) -> Result<crate::chat_provider::ChatResponse, crate::chat_provider::ProviderError> {
                Ok(crate::chat_provider::ChatResponse {
                    content: crate::message::Content::Text("working".into()),
                    reasoning: None,
                    tool_calls: vec![crate::toolcall::ToolCall {
                        id: "c1".into(),
                        name: "unknown_tool".into(),
                        arguments: "{}".into(),
                    }],
                    usage: None,
                })
            }
        }
        let mut engine = fixture_engine(Arc::new(AlwaysCalling));
        engine.max_steps = 2;
        let err = engine.on_run("hello").await.unwrap_err();
        assert!(matches!(err, EngineError::MaxStepsReached));
    }

    #[tokio::test]
    async fn content_delta_is_published_with_the_full_reply() {
        let provider = Arc::new(MockChatProvider::with_no_tool_calls("hello there"));
        let engine = fixture_engine(provider);
        let mut sub = engine.runtime().bus.subscribe();

        engine.on_run("hi").await.unwrap();

        let mut saw_delta = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_millis(50), sub.recv()).await
        {
            if let WireEvent::ContentDelta { kind, text } = event {
                assert_eq!(kind, stream_event::ContentKind::Content);
                assert_eq!(text, "hello there");
                saw_delta = true;
            }
        }
        assert!(saw_delta, "expected a ContentDelta event carrying the reply text");
    }

    #[tokio::test]
    async fn compact_now_runs_regardless_of_token_budget() {
        let provider = Arc::new(MockChatProvider::with_no_tool_calls("done"));
        let engine = fixture_engine(Arc::clone(&provider) as Arc<dyn crate::chat_provider::ChatProvider>);
        engine.on_run("hello").await.unwrap();
        assert_eq!(engine.runtime().context.history().len(), 2);

        let mut sub = engine.runtime().bus.subscribe();
        engine.compact_now().await.unwrap();
        assert!(matches!(sub.recv().await, Some(WireEvent::CompactionBegin)));
        assert!(matches!(sub.recv().await, Some(WireEvent::CompactionEnd)));
    }
}
