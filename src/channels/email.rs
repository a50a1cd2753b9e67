//! Email channel. IMAP for inbound, SMTP via lettre for outbound.
//!
//! One authenticated IMAP session is kept between polls and reused while it
//! answers `NOOP`. Unseen messages are fetched from each watched folder and
//! flagged `\Seen` on the server, which is what keeps `poll()` from returning
//! the same message twice.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::{HeaderValue, MessageParser, MimeHeaders};
use secrecy::{ExposeSecret, SecretString};

use crate::channels::imap::{ImapError, ImapSession, ImapTarget, TlsMode};
use crate::config::EnvVars;
use crate::error::{ChannelError, ConfigError};
use crate::pipeline::types::{ChannelAdapter, ChannelKind, InboundMessage, OutboundMessage};

const NAME: &str = "email";

// ── Configuration ───────────────────────────────────────────────────

/// Email channel configuration.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    /// `From:` address on outgoing mail.
    pub sender_address: String,
    pub watch_folders: Vec<String>,
    pub tls: TlsMode,
    /// Accept self-signed certificates (local bridges).
    pub accept_invalid_certs: bool,
    pub drafts_folder: String,
    pub save_drafts: bool,
}

impl EmailConfig {
    /// Returns `None` unless both `EMAIL_USERNAME` and `EMAIL_PASSWORD` are
    /// set (channel disabled).
    pub fn from_vars(vars: &EnvVars) -> Result<Option<Self>, ConfigError> {
        let (Some(username), Some(password)) = (vars.get("EMAIL_USERNAME"), vars.get("EMAIL_PASSWORD"))
        else {
            return Ok(None);
        };

        let imap_host = vars.get_or("EMAIL_IMAP_HOST", "127.0.0.1");
        let tls = match vars.get("EMAIL_TLS").map(str::to_ascii_lowercase).as_deref() {
            None | Some("starttls") => TlsMode::StartTls,
            Some("implicit" | "tls" | "ssl") => TlsMode::Implicit,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "EMAIL_TLS".into(),
                    message: format!("'{}' (expected starttls or implicit)", other),
                });
            }
        };

        let mut watch_folders = vars.list("EMAIL_WATCH_FOLDERS");
        if watch_folders.is_empty() {
            watch_folders.push("INBOX".into());
        }

        Ok(Some(Self {
            smtp_host: vars.get_or("EMAIL_SMTP_HOST", &imap_host),
            imap_host,
            imap_port: vars.parse_or("EMAIL_IMAP_PORT", 1143)?,
            smtp_port: vars.parse_or("EMAIL_SMTP_PORT", 1025)?,
            sender_address: vars.get_or("EMAIL_SENDER", username),
            username: username.to_string(),
            password: SecretString::from(password.to_string()),
            watch_folders,
            tls,
            accept_invalid_certs: vars.bool_or("EMAIL_ACCEPT_INVALID_CERTS", true)?,
            drafts_folder: vars.get_or("EMAIL_DRAFTS_FOLDER", "Drafts"),
            save_drafts: vars.bool_or("EMAIL_SAVE_DRAFTS", true)?,
        }))
    }

    fn imap_target(&self) -> ImapTarget {
        ImapTarget {
            host: self.imap_host.clone(),
            port: self.imap_port,
            tls: self.tls,
            accept_invalid_certs: self.accept_invalid_certs,
        }
    }
}

// ── Channel ─────────────────────────────────────────────────────────

/// Email adapter holding a reusable IMAP session.
pub struct EmailChannel {
    config: Arc<EmailConfig>,
    session: Arc<Mutex<Option<ImapSession>>>,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config: Arc::new(config),
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `op` against a live session on the blocking pool.
    async fn with_session<T, F>(&self, op: F) -> Result<T, ChannelError>
    where
        T: Send + 'static,
        F: FnOnce(&EmailConfig, &mut ImapSession) -> Result<T, ImapError> + Send + 'static,
    {
        let config = Arc::clone(&self.config);
        let session = Arc::clone(&self.session);

        tokio::task::spawn_blocking(move || {
            let mut guard = session.lock().map_err(|_| ChannelError::ConnectFailed {
                name: NAME.into(),
                reason: "IMAP session lock poisoned".into(),
            })?;

            let reusable = guard.as_mut().is_some_and(|s| s.noop());
            if !reusable {
                if guard.take().is_some() {
                    tracing::debug!("IMAP session stale, reconnecting");
                }
                let fresh = ImapSession::connect(
                    &config.imap_target(),
                    &config.username,
                    config.password.expose_secret(),
                )
                .map_err(|e| ChannelError::ConnectFailed {
                    name: NAME.into(),
                    reason: e.to_string(),
                })?;
                *guard = Some(fresh);
            }

            let Some(live) = guard.as_mut() else {
                return Err(ChannelError::ConnectFailed {
                    name: NAME.into(),
                    reason: "no IMAP session".into(),
                });
            };
            match op(&config, live) {
                Ok(value) => Ok(value),
                Err(e) => {
                    // Drop the session so the next call reconnects.
                    *guard = None;
                    Err(ChannelError::PollFailed {
                        name: NAME.into(),
                        reason: e.to_string(),
                    })
                }
            }
        })
        .await
        .map_err(|e| ChannelError::PollFailed {
            name: NAME.into(),
            reason: format!("IMAP task panicked: {e}"),
        })?
    }
}

/// The IMAP operations a poll needs, split out so the folder walk can run
/// against a scripted mailbox in tests.
trait UnseenSource {
    fn select(&mut self, folder: &str) -> Result<(), ImapError>;
    fn search_unseen(&mut self) -> Result<Vec<u32>, ImapError>;
    fn fetch_rfc822(&mut self, seq: u32) -> Result<Option<Vec<u8>>, ImapError>;
    fn mark_seen(&mut self, seq: u32) -> Result<(), ImapError>;
}

impl UnseenSource for ImapSession {
    fn select(&mut self, folder: &str) -> Result<(), ImapError> {
        ImapSession::select(self, folder)
    }

    fn search_unseen(&mut self) -> Result<Vec<u32>, ImapError> {
        ImapSession::search_unseen(self)
    }

    fn fetch_rfc822(&mut self, seq: u32) -> Result<Option<Vec<u8>>, ImapError> {
        ImapSession::fetch_rfc822(self, seq)
    }

    fn mark_seen(&mut self, seq: u32) -> Result<(), ImapError> {
        ImapSession::mark_seen(self, seq)
    }
}

/// Fetch and flag every unseen message across `folders`.
///
/// A folder that cannot be selected or searched is skipped, so messages
/// already fetched (and flagged `\Seen`) from earlier folders are still
/// returned.
fn collect_unseen(source: &mut impl UnseenSource, folders: &[String]) -> Vec<InboundMessage> {
    let mut messages = Vec::new();
    for folder in folders {
        if let Err(e) = source.select(folder) {
            tracing::warn!(folder = %folder, error = %e, "Skipping folder");
            continue;
        }
        let unseen = match source.search_unseen() {
            Ok(unseen) => unseen,
            Err(e) => {
                tracing::warn!(folder = %folder, error = %e, "SEARCH failed, skipping folder");
                continue;
            }
        };
        for seq in unseen {
            match source.fetch_rfc822(seq) {
                Ok(Some(raw)) => match parse_email(&raw, seq) {
                    Some(msg) => messages.push(msg),
                    None => tracing::warn!(seq, "Unparseable email skipped"),
                },
                Ok(None) => tracing::warn!(seq, "FETCH returned no body"),
                Err(e) => {
                    tracing::warn!(seq, error = %e, "FETCH failed");
                    continue;
                }
            }
            if let Err(e) = source.mark_seen(seq) {
                tracing::warn!(seq, error = %e, "Failed to mark seen");
            }
        }
    }
    messages
}

fn send_failed(reason: String) -> ChannelError {
    ChannelError::SendFailed {
        name: NAME.into(),
        reason,
    }
}

fn smtp_transport(config: &EmailConfig) -> Result<SmtpTransport, ChannelError> {
    let tls_params = TlsParameters::builder(config.smtp_host.clone())
        .dangerous_accept_invalid_certs(config.accept_invalid_certs)
        .build_rustls()
        .map_err(|e| send_failed(format!("SMTP TLS setup failed: {e}")))?;
    let tls = match config.tls {
        TlsMode::StartTls => Tls::Required(tls_params),
        TlsMode::Implicit => Tls::Wrapper(tls_params),
    };
    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );
    Ok(SmtpTransport::builder_dangerous(&config.smtp_host)
        .port(config.smtp_port)
        .tls(tls)
        .credentials(creds)
        .build())
}

/// Send an email via SMTP (blocking; run in spawn_blocking).
fn send_email(config: &EmailConfig, outbound: &OutboundMessage) -> Result<(), ChannelError> {
    let email = build_message(&config.sender_address, outbound)?;
    smtp_transport(config)?
        .send(&email)
        .map_err(|e| send_failed(format!("SMTP send failed: {e}")))?;
    tracing::info!(recipient = %outbound.recipient, "Email sent");
    Ok(())
}

fn build_message(from: &str, outbound: &OutboundMessage) -> Result<Message, ChannelError> {
    let from: Mailbox = from
        .parse()
        .map_err(|e| send_failed(format!("Invalid from address: {e}")))?;
    let to: Mailbox = outbound
        .recipient
        .parse()
        .map_err(|e| send_failed(format!("Invalid to address: {e}")))?;

    let mut builder = Message::builder()
        .from(from)
        .to(to)
        .subject(outbound.subject.clone());
    if let Some(reply_to) = &outbound.reply_to {
        builder = builder
            .in_reply_to(reply_to.clone())
            .references(outbound.thread_id.clone().unwrap_or_else(|| reply_to.clone()));
    }
    builder
        .body(outbound.body.clone())
        .map_err(|e| send_failed(format!("Failed to build email: {e}")))
}

// ── Adapter trait ───────────────────────────────────────────────────

#[async_trait]
impl ChannelAdapter for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn poll(&self) -> Result<Vec<InboundMessage>, ChannelError> {
        self.with_session(|config, session| Ok(collect_unseen(session, &config.watch_folders)))
            .await
    }

    async fn send(&self, message: &OutboundMessage) -> bool {
        let config = Arc::clone(&self.config);
        let message = message.clone();
        match tokio::task::spawn_blocking(move || send_email(&config, &message)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Email send failed");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "Email send task panicked");
                false
            }
        }
    }

    async fn available(&self) -> bool {
        self.with_session(|_, _| Ok(())).await.is_ok()
    }

    async fn save_draft(&self, message: &OutboundMessage) -> bool {
        if !self.config.save_drafts {
            return false;
        }
        let email = match build_message(&self.config.sender_address, message) {
            Ok(email) => email,
            Err(e) => {
                tracing::warn!(error = %e, "Could not build draft");
                return false;
            }
        };
        let bytes = email.formatted();
        let result = self
            .with_session(move |config, session| {
                session.append(&config.drafts_folder, "\\Draft \\Seen", &bytes)
            })
            .await;
        match result {
            Ok(()) => {
                tracing::info!(folder = %self.config.drafts_folder, "Draft saved");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to save draft");
                false
            }
        }
    }
}

// ── Parsing helpers (public for testing) ────────────────────────────

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract readable text, preferring text/plain over stripped HTML.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.trim().to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            let name = MimeHeaders::attachment_name(part).unwrap_or("file");
            return format!("[Attachment: {name}]\n{text}");
        }
    }
    String::new()
}

/// First message id in a header that may hold one id or a list.
fn first_id(value: &HeaderValue) -> Option<String> {
    match value {
        HeaderValue::Text(t) => Some(t.to_string()),
        HeaderValue::TextList(list) => list.first().map(|t| t.to_string()),
        _ => None,
    }
}

/// Parse raw RFC822 bytes into an inbound message. `seq` seeds the fallback id.
pub fn parse_email(raw: &[u8], seq: u32) -> Option<InboundMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let from = parsed.from().and_then(|a| a.first());
    let sender = from
        .and_then(|a| a.address())
        .map(str::to_string)
        .or_else(|| {
            parsed
                .header_raw("From")
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_else(|| "unknown".into());
    let sender_name = from.and_then(|a| a.name()).map(str::to_string);
    let to = parsed
        .to()
        .and_then(|a| a.first())
        .and_then(|a| a.address())
        .map(str::to_string);

    let subject = parsed.subject().unwrap_or("(no subject)").to_string();
    let body = extract_text(&parsed);
    let received_at = parsed
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);
    let message_id = parsed
        .message_id()
        .map(|id| format!("<{}>", id.trim_matches(|c| c == '<' || c == '>')))
        .unwrap_or_else(|| format!("imap-{}", seq));

    let in_reply_to = first_id(parsed.in_reply_to());
    let thread_id = first_id(parsed.references()).or_else(|| in_reply_to.clone());

    let mut msg = InboundMessage::new(ChannelKind::Email, sender, subject, body, message_id)
        .with_received_at(received_at)
        .with_raw(serde_json::json!({
            "sender_name": sender_name,
            "to": to,
        }));
    if let Some(reply_to) = in_reply_to {
        msg = msg.with_reply_to(format!("<{}>", reply_to.trim_matches(|c| c == '<' || c == '>')));
    }
    if let Some(thread) = thread_id {
        msg = msg.with_thread_id(format!("<{}>", thread.trim_matches(|c| c == '<' || c == '>')));
    }
    Some(msg)
}

// ── Tests ───────────────────────────────────────────────────────────
