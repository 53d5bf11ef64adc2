//! The approval gate (spec §4.5): every mutating tool call is confirmed by
//! the external UI before it runs, unless `yolo` is set or the identical
//! `(scope, action)` pair was already approved for the rest of the session.

use dashmap::DashSet;

use crate::bus::{MessageBus, ResolveHandle, WireEvent};

/// Resolution of one `requestApproval` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    ApproveForSession,
    Reject,
}

impl ApprovalDecision {
    /// Whether the caller should proceed with the gated action.
    pub fn allows(self) -> bool {
        !matches!(self, ApprovalDecision::Reject)
    }
}

/// Approval gate for one session.
///
/// The session-approved set is a `DashSet` so concurrently executing tool
/// calls from the same assistant batch (spec §4.4: "executed concurrently")
/// can all check and memoize approvals without a shared `&mut`.
pub struct Approval {
    yolo: bool,
    session_approved: DashSet<(String, String)>,
}

impl Approval {
    pub fn new(yolo: bool) -> Self {
        Self {
            yolo,
            session_approved: DashSet::new(),
        }
    }

    /// Requests approval for `action` within `scope` (spec §4.5).
    ///
    /// Short-circuits to `Approve` when `yolo` is set or when this
    /// `(scope, action)` pair was previously resolved as
    /// `ApproveForSession` — in both cases no `ApprovalRequest` event is
    /// published, per the session-approval memoization property (spec §8).
    pub async fn request_approval(
        &self,
        bus: &MessageBus,
        scope: &str,
        action: &str,
        description: &str,
    ) -> ApprovalDecision {
        if self.yolo {
            return ApprovalDecision::Approve;
        }

        let key = (scope.to_string(), action.to_string());
        if self.session_approved.contains(&key) {
            return ApprovalDecision::Approve;
        }

        let (resolve, waiter) = ResolveHandle::new();
        bus.publish(WireEvent::ApprovalRequest {
            action: action.to_string(),
            description: description.to_string(),
            resolve,
        });

        // A dropped handle (turn cancellation) resolves as Reject (spec §4.5).
        let decision = waiter.await.unwrap_or(ApprovalDecision::Reject);
        if decision == ApprovalDecision::ApproveForSession {
            self.session_approved.insert(key);
        }
        decision
    }
}
