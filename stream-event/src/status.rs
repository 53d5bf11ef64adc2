//! Async-subagent status and execution mode.

use serde::{Deserialize, Serialize};

/// Execution mode for an `AsyncTask` invocation.
///
/// `WaitComplete` is accepted on the wire but rejected by the manager at
/// dispatch time (the synchronous `Task` tool covers that case instead).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncMode {
    FireAndForget,
    Watch,
    WaitComplete,
}

/// Lifecycle status of an async subagent.
///
/// `Completed`, `Failed`, `Cancelled`, and `Timeout` are terminal: once a
/// subagent reaches one of them it never transitions again, and `end_time`
/// is set in the same update that sets the status (§3 invariant).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl AsyncStatus {
    /// Whether this status is terminal (no further transitions, `end_time` set).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AsyncStatus::Completed
                | AsyncStatus::Failed
                | AsyncStatus::Cancelled
                | AsyncStatus::Timeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_and_running_are_not_terminal() {
        assert!(!AsyncStatus::Pending.is_terminal());
        assert!(!AsyncStatus::Running.is_terminal());
    }

    #[test]
    fn completed_failed_cancelled_timeout_are_terminal() {
        assert!(AsyncStatus::Completed.is_terminal());
        assert!(AsyncStatus::Failed.is_terminal());
        assert!(AsyncStatus::Cancelled.is_terminal());
        assert!(AsyncStatus::Timeout.is_terminal());
    }

    #[test]
    fn mode_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AsyncMode::FireAndForget).unwrap(),
            "\"fire_and_forget\""
        );
        assert_eq!(
            serde_json::to_string(&AsyncMode::WaitComplete).unwrap(),
            "\"wait_complete\""
        );
    }
}
