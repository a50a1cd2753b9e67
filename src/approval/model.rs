//! Pending-action data model.

use chrono::{DateTime, Utc};

use crate::pipeline::types::OutboundMessage;

/// Status of a pending action. Everything except `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    /// Waiting for the operator.
    Pending,
    /// Approved and sent.
    Approved,
    /// Denied by the operator.
    Denied,
    /// Timed out without a decision.
    Expired,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A drafted outbound message waiting for operator approval.
#[derive(Debug, Clone)]
pub struct PendingAction {
    /// Short id the operator types in `APPROVE`/`DENY`.
    pub id: String,
    /// What the action does, e.g. `reply_email`.
    pub action_type: String,
    pub description: String,
    pub outbound: OutboundMessage,
    pub created_at: DateTime<Utc>,
    pub status: ActionStatus,
    pub approved_at: Option<DateTime<Utc>>,
}

impl PendingAction {
    /// Whole minutes since creation, never negative.
    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_minutes().max(0)
    }
}
