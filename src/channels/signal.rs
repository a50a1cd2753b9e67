//! Signal channel via a signal-cli REST relay.
//!
//! `GET /v1/receive/<account>` drains the relay's queue, so every poll only
//! ever sees new envelopes.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::EnvVars;
use crate::error::ChannelError;
use crate::pipeline::types::{ChannelAdapter, ChannelKind, InboundMessage, OutboundMessage};

const NAME: &str = "signal";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Signal relay configuration.
#[derive(Debug, Clone)]
pub struct SignalConfig {
    pub api_url: String,
    /// Phone number the relay is registered as.
    pub account: String,
    pub owner_number: Option<String>,
}

impl SignalConfig {
    /// Returns `None` if `SIGNAL_ACCOUNT` is not set (channel disabled).
    pub fn from_vars(vars: &EnvVars) -> Option<Self> {
        let account = vars.get("SIGNAL_ACCOUNT")?.to_string();
        Some(Self {
            api_url: vars
                .get_or("SIGNAL_API_URL", "http://localhost:8082")
                .trim_end_matches('/')
                .to_string(),
            account,
            owner_number: vars.get("SIGNAL_OWNER_NUMBER").map(str::to_string),
        })
    }
}

// ── Envelope shapes ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EnvelopeWrapper {
    #[serde(default)]
    envelope: Option<Envelope>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    source_number: Option<String>,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    data_message: Option<DataMessage>,
    #[serde(default)]
    sync_message: Option<SyncMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataMessage {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    group_info: Option<GroupInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncMessage {
    #[serde(default)]
    sent_message: Option<DataMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupInfo {
    #[serde(default)]
    group_id: Option<String>,
}

/// Turn one relay envelope into a message. Receipts, typing indicators and
/// empty bodies yield `None`.
pub fn parse_envelope(raw: serde_json::Value) -> Option<InboundMessage> {
    let wrapper: EnvelopeWrapper = serde_json::from_value(raw.clone()).ok()?;
    let envelope = wrapper.envelope?;

    // Messages typed on the operator's own linked device arrive as sync messages.
    let data = envelope
        .data_message
        .or_else(|| envelope.sync_message.and_then(|s| s.sent_message))?;
    let body = data.message.filter(|m| !m.trim().is_empty())?;

    let sender = envelope
        .source_number
        .or(envelope.source)
        .unwrap_or_default();
    let received_at = DateTime::<Utc>::from_timestamp_millis(envelope.timestamp)
        .filter(|_| envelope.timestamp > 0)
        .unwrap_or_else(Utc::now);

    let mut msg = InboundMessage::new(
        ChannelKind::Signal,
        sender,
        "",
        body,
        format!("signal-{}", envelope.timestamp),
    )
    .with_received_at(received_at);
    if let Some(group_id) = data
        .group_info
        .and_then(|g| g.group_id)
        .filter(|g| !g.is_empty())
    {
        msg = msg.with_thread_id(group_id);
    }
    Some(msg.with_raw(raw))
}

// ── Channel ─────────────────────────────────────────────────────────

/// Signal adapter.
pub struct SignalChannel {
    config: SignalConfig,
    client: reqwest::Client,
}

impl SignalChannel {
    pub fn new(config: SignalConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url, path)
    }

    async fn post_send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        let payload = serde_json::json!({
            "message": message.body,
            "number": self.config.account,
            "recipients": [message.recipient],
        });

        let resp = self
            .client
            .post(self.url("/v2/send"))
            .timeout(HTTP_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: NAME.into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: NAME.into(),
                reason: format!("HTTP {}: {}", status, body),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelAdapter for SignalChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Signal
    }

    async fn poll(&self) -> Result<Vec<InboundMessage>, ChannelError> {
        let resp = self
            .client
            .get(self.url(&format!("/v1/receive/{}", self.config.account)))
            .header("Accept", "application/json")
            .timeout(HTTP_TIMEOUT)
            .send()
            .await
            .map_err(|e| ChannelError::PollFailed {
                name: NAME.into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(ChannelError::Http(format!(
                "Signal receive returned {}",
                resp.status()
            )));
        }

        let text = resp.text().await.map_err(|e| ChannelError::PollFailed {
            name: NAME.into(),
            reason: e.to_string(),
        })?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let envelopes: Vec<serde_json::Value> = serde_json::from_str(&text)
            .map_err(|e| ChannelError::InvalidMessage(format!("Signal receive payload: {e}")))?;

        let messages: Vec<InboundMessage> =
            envelopes.into_iter().filter_map(parse_envelope).collect();
        if !messages.is_empty() {
            tracing::info!(count = messages.len(), "Received Signal messages");
        }
        Ok(messages)
    }

    async fn send(&self, message: &OutboundMessage) -> bool {
        match self.post_send(message).await {
            Ok(()) => {
                tracing::info!(recipient = %message.recipient, "Signal message sent");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Signal send failed");
                false
            }
        }
    }

    async fn available(&self) -> bool {
        if self.config.account.is_empty() {
            return false;
        }
        self.client
            .get(self.url("/v1/about"))
            .timeout(HTTP_TIMEOUT)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn data_message_is_parsed() {
        let msg = parse_envelope(json!({
            "envelope": {
                "source": "+447000000002",
                "sourceNumber": "+447000000002",
                "timestamp": 1_700_000_000_000_i64,
                "dataMessage": {"message": "Hi there"}
            },
            "account": "+447000000000"
        }))
        .unwrap();
        assert_eq!(msg.channel, ChannelKind::Signal);
        assert_eq!(msg.sender, "+447000000002");
        assert_eq!(msg.subject, "");
        assert_eq!(msg.body, "Hi there");
        assert_eq!(msg.message_id, "signal-1700000000000");
        assert_eq!(msg.received_at.timestamp(), 1_700_000_000);
        assert!(msg.thread_id.is_none());
        assert!(msg.raw.is_some());
    }

    #[test]
    fn group_id_becomes_thread() {
        let msg = parse_envelope(json!({
            "envelope": {
                "source": "+441",
                "timestamp": 5,
                "dataMessage": {"message": "hello group", "groupInfo": {"groupId": "grp=="}}
            }
        }))
        .unwrap();
        assert_eq!(msg.thread_id.as_deref(), Some("grp=="));
    }

    #[test]
    fn sync_sent_message_is_parsed() {
        let msg = parse_envelope(json!({
            "envelope": {
                "source": "+447000000001",
                "timestamp": 9,
                "syncMessage": {"sentMessage": {"message": "/triage STATUS"}}
            }
        }))
        .unwrap();
        assert_eq!(msg.sender, "+447000000001");
        assert_eq!(msg.body, "/triage STATUS");
    }

    #[test]
    fn receipts_and_empty_bodies_are_skipped() {
        assert!(parse_envelope(json!({"envelope": {"source": "+1", "receiptMessage": {}}})).is_none());
        assert!(parse_envelope(json!({"envelope": {"source": "+1", "typingMessage": {}}})).is_none());
        assert!(
            parse_envelope(json!({"envelope": {"source": "+1", "dataMessage": {"message": "  "}}}))
                .is_none()
        );
        assert!(parse_envelope(json!({"something": "else"})).is_none());
    }

    #[test]
    fn config_requires_account() {
        assert!(SignalConfig::from_vars(&EnvVars::default()).is_none());
        let vars: EnvVars = [("SIGNAL_ACCOUNT", "+440"), ("SIGNAL_API_URL", "http://relay:8080/")]
            .into_iter()
            .collect();
        let config = SignalConfig::from_vars(&vars).unwrap();
        assert_eq!(config.api_url, "http://relay:8080");
        assert!(config.owner_number.is_none());
    }

    #[tokio::test]
    async fn unreachable_relay() {
        let channel = SignalChannel::new(SignalConfig {
            api_url: "http://127.0.0.1:1".into(),
            account: "+440".into(),
            owner_number: None,
        });
        assert!(!channel.available().await);
        assert!(channel.poll().await.is_err());
        let out = OutboundMessage::text(ChannelKind::Signal, "+441", "hi");
        assert!(!channel.send(&out).await);
    }
}
