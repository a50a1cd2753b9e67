//! Operator command handlers. Every reply goes back over the control channel.

use chrono::Utc;
use tracing::{info, warn};

use super::Orchestrator;
use crate::approval::{ApproveOutcome, DenyOutcome};
use crate::commands::Command;
use crate::contacts::{Direction, Importance};

impl Orchestrator {
    pub(super) async fn execute(&mut self, command: Command) {
        info!(?command, "Operator command");
        match command {
            Command::Approve(id) => self.approve(&id).await,
            Command::Deny(id) => self.deny(&id).await,
            Command::Status => self.send_status().await,
            Command::Tasks => self.send_tasks().await,
            Command::Swap(key) => self.swap_model(&key).await,
            Command::Help => {
                let help = self.parser.help_text(&self.models.catalog().keys());
                self.notify_operator(&help).await;
            }
            Command::Unknown(verb) => {
                let reply = format!(
                    "Unknown command: {}\nSend {} for available commands.",
                    verb,
                    self.parser.with_prefix("HELP")
                );
                self.notify_operator(&reply).await;
            }
        }
    }

    async fn approve(&mut self, id: &str) {
        let outcome = self.queue.approve(id, &self.channels).await;
        let action = match (&outcome, self.queue.get(id)) {
            (ApproveOutcome::Sent | ApproveOutcome::SendFailed, Some(action)) => action.clone(),
            (ApproveOutcome::AlreadyFinal(status), _) => {
                self.notify_operator(&format!("Action {id} is already {status}"))
                    .await;
                return;
            }
            _ => {
                self.notify_operator(&format!("No pending action with ID: {id}"))
                    .await;
                return;
            }
        };

        let reply = match outcome {
            ApproveOutcome::Sent => {
                let outbound = &action.outbound;
                self.contacts
                    .interaction(
                        &outbound.recipient,
                        outbound.channel,
                        Direction::Outbound,
                        &outbound.subject,
                        &outbound.body,
                    )
                    .await;
                self.contacts
                    .event(
                        &format!(
                            "Approved and sent {} to {}: {}",
                            action.action_type, outbound.recipient, outbound.subject
                        ),
                        Importance::Normal,
                        &["approval"],
                    )
                    .await;
                format!("Action {id} sent successfully.")
            }
            _ => {
                self.contacts
                    .event(
                        &format!(
                            "Send FAILED for {} to {}",
                            action.action_type, action.outbound.recipient
                        ),
                        Importance::High,
                        &["error"],
                    )
                    .await;
                format!("Action {id} send FAILED.")
            }
        };
        self.notify_operator(&reply).await;
    }

    async fn deny(&mut self, id: &str) {
        let reply = match self.queue.deny(id) {
            DenyOutcome::NotFound => format!("No pending action with ID: {id}"),
            DenyOutcome::Denied => {
                if let Some(action) = self.queue.get(id) {
                    let event = format!(
                        "Denied {} to {}: {}",
                        action.action_type, action.outbound.recipient, action.description
                    );
                    self.contacts
                        .event(&event, Importance::Normal, &["denial"])
                        .await;
                }
                format!("Action {id} denied.")
            }
        };
        self.notify_operator(&reply).await;
    }

    async fn send_status(&mut self) {
        let model = self.models.status().await;

        let mut channels = Vec::new();
        for adapter in self.channels.adapters() {
            let state = if adapter.available().await {
                "online"
            } else {
                "OFFLINE"
            };
            channels.push(format!("{} {}", adapter.kind(), state));
        }

        let reply = format!(
            "Model: {} ({})\nChannels: {}\nPending actions: {}",
            model.active.as_deref().unwrap_or("none"),
            if model.endpoint_online { "online" } else { "OFFLINE" },
            if channels.is_empty() {
                "none".to_string()
            } else {
                channels.join(", ")
            },
            self.queue.pending_count(),
        );
        self.notify_operator(&reply).await;
    }

    async fn send_tasks(&mut self) {
        let now = Utc::now();
        let pending = self.queue.pending();
        let reply = if pending.is_empty() {
            "No pending actions.".to_string()
        } else {
            let lines: Vec<String> = pending
                .iter()
                .map(|a| format!("  {}: {} ({}m ago)", a.id, a.description, a.age_minutes(now)))
                .collect();
            format!("Pending actions:\n{}", lines.join("\n"))
        };
        self.notify_operator(&reply).await;
    }

    async fn swap_model(&mut self, key: &str) {
        if !self.models.catalog().contains(key) {
            let reply = format!(
                "Unknown model: {}. Available: {}",
                key,
                self.models.catalog().keys().join(", ")
            );
            self.notify_operator(&reply).await;
            return;
        }

        self.notify_operator(&format!("Swapping to {key}...")).await;
        match self.models.ensure(key).await {
            Ok(()) => {
                self.contacts
                    .event(&format!("Model swapped to {key}"), Importance::Normal, &["model"])
                    .await;
                self.notify_operator(&format!("Model {key} is ready.")).await;
            }
            Err(e) => {
                warn!(model = key, error = %e, "Operator swap failed");
                self.contacts
                    .event(
                        &format!("Model swap to {key} FAILED"),
                        Importance::High,
                        &["model", "error"],
                    )
                    .await;
                self.notify_operator(&format!("FAILED to start {key}: {e}"))
                    .await;
            }
        }
    }
}
