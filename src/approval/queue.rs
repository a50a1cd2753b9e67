//! Approval queue: drafted replies waiting for the operator.
//!
//! pending → approved | denied | expired. Terminal states are never left,
//! except that `deny` overwrites unconditionally. A failed send on approve
//! keeps the action pending so the operator can retry.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::model::{ActionStatus, PendingAction};
use crate::channels::ChannelRegistry;
use crate::pipeline::types::{InboundMessage, OutboundMessage};

/// Result of `approve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApproveOutcome {
    NotFound,
    AlreadyFinal(ActionStatus),
    Sent,
    /// Send failed or no adapter for the channel; still pending.
    SendFailed,
}

/// Result of `deny`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyOutcome {
    NotFound,
    Denied,
}

/// In-memory approval queue, owned by the orchestrator.
#[derive(Debug, Default)]
pub struct ApprovalQueue {
    actions: HashMap<String, PendingAction>,
}

fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

impl ApprovalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply to `original` with `draft` as body. Returns the action id.
    pub fn enqueue(&mut self, original: &InboundMessage, draft: &str) -> String {
        self.enqueue_at(original, draft, Utc::now())
    }

    pub fn enqueue_at(
        &mut self,
        original: &InboundMessage,
        draft: &str,
        now: DateTime<Utc>,
    ) -> String {
        let id = self.fresh_id();
        let action = PendingAction {
            id: id.clone(),
            action_type: format!("reply_{}", original.channel),
            description: format!("Reply to {}: {}", original.sender, original.subject),
            outbound: OutboundMessage::reply_to(original, draft),
            created_at: now,
            status: ActionStatus::Pending,
            approved_at: None,
        };
        info!(action_id = %id, channel = %original.channel, recipient = %original.sender, "Action queued");
        self.actions.insert(id.clone(), action);
        id
    }

    /// 8 hex chars from a v4 UUID, redrawn until unused.
    fn fresh_id(&self) -> String {
        loop {
            let id = Uuid::new_v4().simple().to_string()[..8].to_string();
            if !self.actions.contains_key(&id) {
                return id;
            }
        }
    }

    /// Send a pending action through its channel's adapter.
    pub async fn approve(&mut self, id: &str, channels: &ChannelRegistry) -> ApproveOutcome {
        let Some(action) = self.actions.get_mut(id) else {
            return ApproveOutcome::NotFound;
        };
        if action.status.is_terminal() {
            return ApproveOutcome::AlreadyFinal(action.status);
        }

        let Some(adapter) = channels.get(action.outbound.channel) else {
            warn!(action_id = %id, channel = %action.outbound.channel, "No adapter registered for action");
            return ApproveOutcome::SendFailed;
        };

        if adapter.send(&action.outbound).await {
            action.status = ActionStatus::Approved;
            action.approved_at = Some(Utc::now());
            info!(action_id = %id, "Action approved and sent");
            ApproveOutcome::Sent
        } else {
            warn!(action_id = %id, "Approved action failed to send, left pending");
            ApproveOutcome::SendFailed
        }
    }

    /// Mark an action denied, whatever its current status.
    pub fn deny(&mut self, id: &str) -> DenyOutcome {
        let Some(action) = self.actions.get_mut(id) else {
            return DenyOutcome::NotFound;
        };
        if action.status.is_terminal() {
            warn!(action_id = %id, previous = %action.status, "Denying an action that was already final");
        }
        action.status = ActionStatus::Denied;
        info!(action_id = %id, "Action denied");
        DenyOutcome::Denied
    }

    /// Expire pending actions older than `timeout`. Returns each newly expired
    /// action exactly once.
    pub fn expire(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<PendingAction> {
        let timeout = to_delta(timeout);
        let mut expired: Vec<PendingAction> = self
            .actions
            .values_mut()
            .filter(|a| a.status == ActionStatus::Pending && now - a.created_at > timeout)
            .map(|a| {
                a.status = ActionStatus::Expired;
                info!(action_id = %a.id, "Action expired");
                a.clone()
            })
            .collect();
        expired.sort_by_key(|a| a.created_at);
        expired
    }

    /// Drop terminal actions created more than `retention` ago. Returns the
    /// number removed.
    pub fn sweep(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let retention = to_delta(retention);
        let before = self.actions.len();
        self.actions
            .retain(|_, a| !(a.status.is_terminal() && now - a.created_at > retention));
        before - self.actions.len()
    }

    pub fn get(&self, id: &str) -> Option<&PendingAction> {
        self.actions.get(id)
    }

    /// Pending actions, oldest first.
    pub fn pending(&self) -> Vec<&PendingAction> {
        let mut pending: Vec<&PendingAction> = self
            .actions
            .values()
            .filter(|a| a.status == ActionStatus::Pending)
            .collect();
        pending.sort_by_key(|a| a.created_at);
        pending
    }

    pub fn pending_count(&self) -> usize {
        self.actions
            .values()
            .filter(|a| a.status == ActionStatus::Pending)
            .count()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
