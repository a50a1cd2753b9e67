//! The daemon's main loop.
//!
//! One task owns every piece of mutable state (approval queue, active model
//! record) and drives them through `&mut self`:
//!
//! ```text
//! poll channels ─▶ classify ─▶ draft ─▶ queue ─▶ notify operator
//!        │
//!        └─ operator commands ─▶ approve / deny / status / swap
//! ```
//!
//! After each cycle stale approvals are expired and old terminal ones swept.

mod handlers;
pub mod shutdown;

pub use shutdown::{Shutdown, ShutdownHandle};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::approval::ApprovalQueue;
use crate::channels::ChannelRegistry;
use crate::commands::CommandParser;
use crate::config::{ControlConfig, DEFAULT_CONTROL_PREFIX, DaemonConfig};
use crate::contacts::{ContactLog, ContactStore, Direction, Importance};
use crate::error::Error;
use crate::pipeline::truncate_chars;
use crate::pipeline::types::{ChannelKind, InboundMessage, OutboundMessage};
use crate::pipeline::{Classifier, Drafter};
use crate::swap::ModelSwapController;

/// Draft characters shown in the operator notification.
const DRAFT_PREVIEW_CHARS: usize = 500;

/// Body characters recorded with the inbound interaction.
const INBOUND_LOG_BODY_CHARS: usize = 1000;

/// Loop timing and operator routing.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub poll_interval: Duration,
    pub approval_timeout: Duration,
    pub approval_retention: Duration,
    pub control: ControlConfig,
}

impl OrchestratorSettings {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            approval_timeout: config.approval_timeout,
            approval_retention: config.approval_retention,
            control: config.control.clone(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            approval_timeout: Duration::from_secs(3600),
            approval_retention: Duration::from_secs(86_400),
            control: ControlConfig {
                channel: ChannelKind::Signal,
                operator: String::new(),
                prefix: Some(DEFAULT_CONTROL_PREFIX.to_string()),
            },
        }
    }
}

/// Triage and approval orchestrator.
pub struct Orchestrator {
    settings: OrchestratorSettings,
    channels: ChannelRegistry,
    models: ModelSwapController,
    classifier: Classifier,
    drafter: Drafter,
    queue: ApprovalQueue,
    contacts: ContactLog,
    parser: CommandParser,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        channels: ChannelRegistry,
        models: ModelSwapController,
        classifier: Classifier,
        drafter: Drafter,
    ) -> Self {
        let parser = CommandParser::new(settings.control.prefix.as_deref());
        Self {
            settings,
            channels,
            models,
            classifier,
            drafter,
            queue: ApprovalQueue::new(),
            contacts: ContactLog::noop(),
            parser,
        }
    }

    /// Wire a contact store. Without one, contact logging is a no-op.
    pub fn with_contacts(mut self, store: Arc<dyn ContactStore>) -> Self {
        self.contacts = ContactLog::new(store);
        self
    }

    pub fn queue(&self) -> &ApprovalQueue {
        &self.queue
    }

    pub fn models(&self) -> &ModelSwapController {
        &self.models
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Bring up the default model and announce the daemon. A model that
    /// never becomes ready is the only fatal error.
    pub async fn startup(&mut self) -> Result<(), Error> {
        info!(
            channels = ?self.channels.kinds(),
            supervised = self.models.is_supervised(),
            "Triage daemon starting"
        );

        if let Err(e) = self.models.ensure_default().await {
            error!(error = %e, "Failed to start default model");
            return Err(e.into());
        }

        info!("Default model ready, entering poll loop");
        self.contacts
            .event(
                "triage daemon started, default model ready",
                Importance::Normal,
                &["daemon"],
            )
            .await;
        self.notify_operator("triage daemon started. Default model ready.")
            .await;
        Ok(())
    }

    /// Start up, then poll until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: Shutdown) -> Result<(), Error> {
        self.startup().await?;

        while !shutdown.is_triggered() {
            self.poll_cycle().await;
            self.maintain(Utc::now()).await;

            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        self.stop().await;
        Ok(())
    }

    /// Announce shutdown.
    pub async fn stop(&mut self) {
        info!("Triage daemon stopping");
        self.contacts
            .event("triage daemon stopped", Importance::Normal, &["daemon"])
            .await;
        self.notify_operator("triage daemon stopped.").await;
    }

    // ── Polling ─────────────────────────────────────────────────────

    /// Poll every available channel once and handle what arrived.
    pub async fn poll_cycle(&mut self) {
        for adapter in self.channels.adapters() {
            let kind = adapter.kind();
            if !adapter.available().await {
                debug!(channel = %kind, "Channel unavailable, skipping");
                continue;
            }

            let messages = match adapter.poll().await {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(channel = %kind, error = %e, "Poll failed");
                    continue;
                }
            };

            if !messages.is_empty() {
                debug!(channel = %kind, count = messages.len(), "Polled messages");
            }
            for msg in messages {
                self.handle_message(msg).await;
            }
        }
    }

    /// Expire stale approvals and sweep old terminal ones.
    pub async fn maintain(&mut self, now: DateTime<Utc>) {
        for action in self.queue.expire(now, self.settings.approval_timeout) {
            let text = format!("Action {} expired: {}", action.id, action.description);
            self.contacts
                .event(&text, Importance::Low, &["expiry"])
                .await;
            self.notify_operator(&text).await;
        }

        let swept = self.queue.sweep(now, self.settings.approval_retention);
        if swept > 0 {
            debug!(swept, "Swept finished actions");
        }
    }

    fn is_operator_message(&self, msg: &InboundMessage) -> bool {
        let control = &self.settings.control;
        msg.channel == control.channel
            && !control.operator.is_empty()
            && msg.sender == control.operator
    }

    /// Route one inbound message: operator command, or triage.
    pub async fn handle_message(&mut self, mut msg: InboundMessage) {
        info!(
            channel = %msg.channel,
            sender = %msg.sender,
            subject = %msg.display_subject(),
            "Inbound message"
        );

        if self.is_operator_message(&msg) {
            if self.parser.is_command(&msg.body) {
                let command = self.parser.parse(&msg.body);
                self.execute(command).await;
            } else {
                debug!("Operator message without command prefix, ignoring");
            }
            return;
        }

        let Some(verdict) = self.classifier.classify(&mut msg).await else {
            warn!(message_id = %msg.message_id, "Classification failed, message dropped");
            return;
        };

        let classification = msg.classification.as_deref().unwrap_or("unknown");
        self.contacts
            .interaction(
                &msg.sender,
                msg.channel,
                Direction::Inbound,
                &msg.subject,
                &format!(
                    "[{}] {}\n\n{}",
                    classification,
                    verdict.summary,
                    truncate_chars(&msg.body, INBOUND_LOG_BODY_CHARS)
                ),
            )
            .await;

        let mut text = format!(
            "[{}] {}\nSubject: {}\nUrgency: {}\nType: {}\nSummary: {}",
            msg.channel,
            msg.sender,
            msg.display_subject(),
            msg.urgency,
            classification,
            verdict.summary,
        );

        if verdict.needs_response {
            match self.drafter.draft(&msg).await {
                Some(draft) => {
                    let id = self.queue.enqueue(&msg, &draft);
                    if msg.channel == ChannelKind::Email {
                        self.save_email_draft(&id).await;
                    }
                    text.push_str(&format!(
                        "\n\nDraft response queued ({id}):\n---\n{}\n---",
                        truncate_chars(&draft, DRAFT_PREVIEW_CHARS)
                    ));
                    text.push_str(&format!(
                        "\n\nReply {} {id} or {} {id}",
                        self.parser.with_prefix("APPROVE"),
                        self.parser.with_prefix("DENY"),
                    ));
                }
                None => text.push_str("\n\n(Draft generation failed)"),
            }
        }

        self.notify_operator(&text).await;
    }

    /// Mirror a queued email reply into the mailbox drafts folder.
    async fn save_email_draft(&self, action_id: &str) {
        let Some(action) = self.queue.get(action_id) else {
            return;
        };
        let Some(email) = self.channels.get(ChannelKind::Email) else {
            return;
        };
        if email.save_draft(&action.outbound).await {
            info!(action_id, recipient = %action.outbound.recipient, "Draft saved to mailbox");
        } else {
            warn!(action_id, "Failed to save draft to mailbox");
        }
    }

    // ── Operator ────────────────────────────────────────────────────

    /// Send `text` to the operator over the control channel.
    pub async fn notify_operator(&self, text: &str) -> bool {
        let control = &self.settings.control;
        if control.operator.is_empty() {
            debug!("No operator configured, notification dropped");
            return false;
        }
        let Some(adapter) = self.channels.get(control.channel) else {
            warn!(channel = %control.channel, "Control channel not registered, notification dropped");
            return false;
        };

        let sent = adapter
            .send(&OutboundMessage::text(control.channel, &control.operator, text))
            .await;
        if !sent {
            warn!(channel = %control.channel, "Failed to notify operator");
        }
        sent
    }
}
