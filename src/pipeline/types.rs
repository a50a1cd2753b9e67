//! Shared types for the message processing pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

// ── Channel kind ────────────────────────────────────────────────────

/// Which adapter handles a message.
///
/// The derived ordering is the order the orchestrator visits channels in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Mail-like channel (IMAP/SMTP).
    Email,
    /// Relay-like channel (signal-cli REST API).
    Signal,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Signal => "signal",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "signal" => Ok(Self::Signal),
            other => Err(format!("Unknown channel kind: {}", other)),
        }
    }
}

// ── Urgency ─────────────────────────────────────────────────────────

/// Classification urgency levels, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// Informational, no action needed.
    Low,
    /// Needs attention, not time-sensitive.
    #[default]
    Normal,
    /// Needs a prompt response.
    High,
    /// Requires immediate action.
    Critical,
}

impl Urgency {
    /// Parse a model-supplied urgency label. Anything unrecognised is `Normal`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => Self::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Inbound message ─────────────────────────────────────────────────

/// A message received from any channel.
///
/// Created by an adapter's `poll()` and consumed within the same loop
/// iteration. The classifier fills in `urgency`, `classification` and
/// `suggested_action`.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel: ChannelKind,
    /// Sender identifier (email address, phone number).
    pub sender: String,
    /// Subject line; empty for channels without subjects.
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    /// Channel-scoped unique ID.
    pub message_id: String,
    /// ID of the message this one replies to.
    pub reply_to: Option<String>,
    pub thread_id: Option<String>,
    /// Full native payload for channel-specific handling.
    pub raw: Option<serde_json::Value>,

    pub urgency: Urgency,
    pub classification: Option<String>,
    pub suggested_action: Option<String>,
}

impl InboundMessage {
    /// Create an unclassified message received now.
    pub fn new(
        channel: ChannelKind,
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            received_at: Utc::now(),
            message_id: message_id.into(),
            reply_to: None,
            thread_id: None,
            raw: None,
            urgency: Urgency::Normal,
            classification: None,
            suggested_action: None,
        }
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Subject for display, `(none)` when empty.
    pub fn display_subject(&self) -> &str {
        if self.subject.is_empty() {
            "(none)"
        } else {
            &self.subject
        }
    }
}

// ── Outbound message ────────────────────────────────────────────────

/// A message to send via any channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel: ChannelKind,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    /// Channel-specific ID to reply to.
    pub reply_to: Option<String>,
    pub thread_id: Option<String>,
}

impl OutboundMessage {
    /// A subject-less message, as used for operator notifications.
    pub fn text(channel: ChannelKind, recipient: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            channel,
            recipient: recipient.into(),
            subject: String::new(),
            body: body.into(),
            reply_to: None,
            thread_id: None,
        }
    }

    /// A reply mirroring `original`: sender becomes recipient, subject gets a
    /// `Re:` prefix, threading identifiers are carried over.
    pub fn reply_to(original: &InboundMessage, body: impl Into<String>) -> Self {
        let subject = if original.subject.is_empty() {
            String::new()
        } else {
            format!("Re: {}", original.subject)
        };
        Self {
            channel: original.channel,
            recipient: original.sender.clone(),
            subject,
            body: body.into(),
            reply_to: Some(original.message_id.clone()),
            thread_id: original.thread_id.clone(),
        }
    }
}

// ── Channel adapter trait ───────────────────────────────────────────

/// Trait for channel adapters. Pure I/O, no business logic.
///
/// Classification, drafting and approval live in the orchestrator.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Which channel this adapter serves.
    fn kind(&self) -> ChannelKind;

    /// Fetch messages not returned by any previous call.
    ///
    /// The adapter alone is responsible for not redelivering a message
    /// (server-side seen flags, fetch-and-clear queues). The core never
    /// deduplicates.
    async fn poll(&self) -> Result<Vec<InboundMessage>, ChannelError>;

    /// Send a message. Transport failures are logged and reported as `false`.
    async fn send(&self, message: &OutboundMessage) -> bool;

    /// Cheap liveness probe, used only to skip a channel for one cycle.
    async fn available(&self) -> bool;

    /// Store a reply as an unsent draft in the channel backend, if supported.
    async fn save_draft(&self, _message: &OutboundMessage) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_kind_display_and_fromstr() {
        assert_eq!(ChannelKind::Email.to_string(), "email");
        assert_eq!("SIGNAL".parse::<ChannelKind>().unwrap(), ChannelKind::Signal);
        assert!("reddit".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn channel_kind_order_is_stable() {
        assert!(ChannelKind::Email < ChannelKind::Signal);
    }

    #[test]
    fn urgency_is_ordered() {
        assert!(Urgency::Low < Urgency::Normal);
        assert!(Urgency::Normal < Urgency::High);
        assert!(Urgency::High < Urgency::Critical);
    }

    #[test]
    fn urgency_unknown_label_is_normal() {
        assert_eq!(Urgency::parse_lenient("HIGH"), Urgency::High);
        assert_eq!(Urgency::parse_lenient("urgent!!"), Urgency::Normal);
        assert_eq!(Urgency::parse_lenient(""), Urgency::Normal);
    }

    #[test]
    fn reply_mirrors_original() {
        let original = InboundMessage::new(
            ChannelKind::Email,
            "alice@example.com",
            "Policy question",
            "Hello",
            "<msg-1@example.com>",
        )
        .with_thread_id("<thread-1@example.com>");

        let reply = OutboundMessage::reply_to(&original, "Thanks");
        assert_eq!(reply.channel, ChannelKind::Email);
        assert_eq!(reply.recipient, "alice@example.com");
        assert_eq!(reply.subject, "Re: Policy question");
        assert_eq!(reply.reply_to.as_deref(), Some("<msg-1@example.com>"));
        assert_eq!(reply.thread_id.as_deref(), Some("<thread-1@example.com>"));
        assert_eq!(reply.body, "Thanks");
    }

    #[test]
    fn reply_to_subjectless_message_has_empty_subject() {
        let original = InboundMessage::new(ChannelKind::Signal, "+447000000002", "", "hi", "signal-1");
        let reply = OutboundMessage::reply_to(&original, "hello");
        assert_eq!(reply.subject, "");
        assert_eq!(original.display_subject(), "(none)");
    }
}
