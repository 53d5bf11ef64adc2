//! The `Wire`: an in-process, multi-subscriber, non-blocking event bus
//! (spec §4.1), plus the one-shot resolution handle `ApprovalRequest` and
//! `HumanInputRequest` carry.
//!
//! Backed by `tokio::sync::broadcast`, the same primitive
//! `TokioBroadcastBus`-style event buses in this corpus use for fan-out to an
//! arbitrary number of subscribers without back-pressuring the publisher.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, oneshot, Mutex};

use stream_event::{AsyncMode, ContentKind};

use crate::approval::ApprovalDecision;
use crate::toolcall::{ToolCall, ToolResult};

/// Default channel capacity; lagging subscribers drop the oldest events
/// first rather than blocking the publisher (spec: "publish never blocks").
const DEFAULT_CAPACITY: usize = 1024;

/// A one-shot handle the publisher awaits and exactly one subscriber
/// resolves. Cloning shares the same underlying slot: whichever clone
/// resolves first wins, later resolutions are silently dropped.
pub struct ResolveHandle<T> {
    sender: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for ResolveHandle<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T> fmt::Debug for ResolveHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResolveHandle(..)")
    }
}

impl<T: Send + 'static> ResolveHandle<T> {
    /// Creates a linked (handle, waiter) pair. The waiter resolves to `None`
    /// if every handle clone is dropped without resolving (e.g. turn
    /// cancellation — spec: "cancellation ... resolves as Reject").
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Resolves the handle with `value`. A no-op if already resolved.
    pub async fn resolve(&self, value: T) {
        let mut guard = self.sender.lock().await;
        if let Some(tx) = guard.take() {
            let _ = tx.send(value);
        }
    }
}

/// Lifecycle and streaming events published on the [`MessageBus`].
///
/// `ApprovalRequest` and `HumanInputRequest` carry the only mutable state in
/// this enum (a resolution handle); every other variant is a plain
/// snapshot, safe to clone to every subscriber.
#[derive(Clone, Debug)]
pub enum WireEvent {
    StepBegin {
        step: u32,
        is_sub: bool,
        agent_name: Option<String>,
    },
    StepInterrupted,
    CompactionBegin,
    CompactionEnd,
    ContentDelta {
        kind: ContentKind,
        text: String,
    },
    ToolCallBegin {
        tool_call: ToolCall,
    },
    ToolResultEvent {
        tool_call_id: String,
        result: ToolResult,
    },
    TokenUsage {
        prompt: u32,
        completion: u32,
        total: u32,
    },
    ApprovalRequest {
        action: String,
        description: String,
        resolve: ResolveHandle<ApprovalDecision>,
    },
    HumanInputRequest {
        kind: String,
        question: String,
        choices: Option<Vec<String>>,
        default: Option<String>,
        resolve: ResolveHandle<String>,
    },
    AsyncStarted {
        id: String,
        name: String,
        mode: AsyncMode,
        start_time: DateTime<Utc>,
    },
    AsyncProgress {
        id: String,
        info: String,
        step: u32,
    },
    AsyncTrigger {
        id: String,
        pattern: String,
        matched_line: String,
        time: DateTime<Utc>,
    },
    AsyncCompleted {
        id: String,
        result: Option<String>,
        success: bool,
        duration_ms: i64,
    },
}

/// A subscription to a [`MessageBus`]; wraps `broadcast::Receiver` so callers
/// never have to name the `tokio` type directly.
pub struct WireSubscription {
    receiver: broadcast::Receiver<WireEvent>,
}

impl WireSubscription {
    /// Waits for the next event. Returns `None` once the bus is closed and
    /// drained, or if this subscriber lagged so far behind that events were
    /// overwritten (events, not errors, are what callers care about here —
    /// a lagged subscriber simply resumes from the next live event).
    pub async fn recv(&mut self) -> Option<WireEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// The `Wire`: broadcast publisher with zero or more subscribers.
///
/// `publish` never blocks and never fails the caller — with zero
/// subscribers the event is simply dropped (spec §4.1).
#[derive(Clone)]
pub struct MessageBus {
    sender: broadcast::Sender<WireEvent>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to every current subscriber. Never blocks; a
    /// "send failed" (zero receivers) result is intentionally discarded.
    pub fn publish(&self, event: WireEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribes to events from this point forward (a hot stream — no
    /// replay of events published before this call).
    pub fn subscribe(&self) -> WireSubscription {
        WireSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Drops the sender's outstanding reference, which lets every open
    /// subscription observe `Closed` once drained.
    pub fn close(self) {
        drop(self.sender);
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = MessageBus::new();
        bus.publish(WireEvent::StepInterrupted);
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = MessageBus::new();
        let mut sub = bus.subscribe();
        bus.publish(WireEvent::StepBegin {
            step: 1,
            is_sub: false,
            agent_name: None,
        });
        let event = sub.recv().await.unwrap();
        assert!(matches!(event, WireEvent::StepBegin { step: 1, .. }));
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive_in_order() {
        let bus = MessageBus::new();
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();
        bus.publish(WireEvent::CompactionBegin);
        bus.publish(WireEvent::CompactionEnd);

        assert!(matches!(sub1.recv().await, Some(WireEvent::CompactionBegin)));
        assert!(matches!(sub1.recv().await, Some(WireEvent::CompactionEnd)));
        assert!(matches!(sub2.recv().await, Some(WireEvent::CompactionBegin)));
        assert!(matches!(sub2.recv().await, Some(WireEvent::CompactionEnd)));
    }

    #[tokio::test]
    async fn late_subscriber_does_not_see_earlier_events() {
        let bus = MessageBus::new();
        bus.publish(WireEvent::CompactionBegin);
        let mut late_sub = bus.subscribe();
        bus.publish(WireEvent::CompactionEnd);
        let event = late_sub.recv().await.unwrap();
        assert!(matches!(event, WireEvent::CompactionEnd));
    }

    #[tokio::test]
    async fn resolve_handle_delivers_value_once() {
        let (handle, rx) = ResolveHandle::new();
        handle.resolve(ApprovalDecision::Approve).await;
        assert_eq!(rx.await.unwrap(), ApprovalDecision::Approve);
    }

    #[tokio::test]
    async fn resolve_handle_second_resolve_is_noop() {
        let (handle, rx) = ResolveHandle::new();
        handle.resolve(ApprovalDecision::Approve).await;
        handle.resolve(ApprovalDecision::Reject).await;
        assert_eq!(rx.await.unwrap(), ApprovalDecision::Approve);
    }

    #[tokio::test]
    async fn dropping_every_handle_clone_closes_the_waiter() {
        let (handle, rx) = ResolveHandle::<ApprovalDecision>::new();
        drop(handle);
        assert!(rx.await.is_err());
    }
}
