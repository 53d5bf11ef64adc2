//! Shared error kinds for the turn loop (spec §7). Tool-level failures stay
//! out of this enum entirely — they're recoverable by design and travel as
//! [`crate::toolcall::ToolResult`] values fed back to the LLM, never as a
//! `Result::Err` the Engine has to unwind.

use thiserror::Error;

use crate::context_store::ContextStoreError;

/// Fatal errors that abort a turn (or, for `ConfigError`, startup itself).
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Context(#[from] ContextStoreError),
    #[error("maximum steps reached")]
    MaxStepsReached,
    #[error("provider error: {0}")]
    Provider(#[from] crate::chat_provider::ProviderError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_steps_reached_message() {
        assert_eq!(EngineError::MaxStepsReached.to_string(), "maximum steps reached");
    }

    #[test]
    fn context_error_is_transparent() {
        let err = EngineError::from(ContextStoreError::UnknownCheckpoint(3));
        assert!(err.to_string().contains('3'));
    }
}
