//! Contact store collaborator.
//!
//! The store itself lives outside this crate. The daemon only records who it
//! heard from, what was said, and notable events. Every call goes through
//! [`ContactLog`], which logs failures and carries on.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::StoreError;
use crate::pipeline::truncate_chars;
use crate::pipeline::types::ChannelKind;

/// Longest interaction body handed to the store.
pub const INTERACTION_CONTENT_CHARS: usize = 2000;

/// Which way an interaction went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Importance attached to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Importance {
    Low,
    Normal,
    High,
}

/// Backend-agnostic contact and interaction log.
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Look up a contact by address, creating it if unknown.
    async fn find_or_create_contact(
        &self,
        sender: &str,
        kind: ChannelKind,
    ) -> Result<i64, StoreError>;

    async fn log_interaction(
        &self,
        contact_id: i64,
        kind: ChannelKind,
        direction: Direction,
        subject: &str,
        content: &str,
    ) -> Result<(), StoreError>;

    async fn log_event(
        &self,
        content: &str,
        importance: Importance,
        tags: &[&str],
    ) -> Result<(), StoreError>;
}

/// Store used when nothing is wired. Accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopContactStore;

#[async_trait]
impl ContactStore for NoopContactStore {
    async fn find_or_create_contact(
        &self,
        _sender: &str,
        _kind: ChannelKind,
    ) -> Result<i64, StoreError> {
        Ok(0)
    }

    async fn log_interaction(
        &self,
        _contact_id: i64,
        _kind: ChannelKind,
        _direction: Direction,
        _subject: &str,
        _content: &str,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn log_event(
        &self,
        _content: &str,
        _importance: Importance,
        _tags: &[&str],
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Error-swallowing front for a [`ContactStore`].
#[derive(Clone)]
pub struct ContactLog {
    store: Arc<dyn ContactStore>,
}

impl ContactLog {
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self { store }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopContactStore))
    }

    /// Record one interaction with `address`, creating the contact as needed.
    pub async fn interaction(
        &self,
        address: &str,
        kind: ChannelKind,
        direction: Direction,
        subject: &str,
        content: &str,
    ) {
        let contact_id = match self.store.find_or_create_contact(address, kind).await {
            Ok(id) => id,
            Err(e) => {
                warn!(address, channel = %kind, error = %e, "Contact lookup failed");
                return;
            }
        };

        let content = truncate_chars(content, INTERACTION_CONTENT_CHARS);
        if let Err(e) = self
            .store
            .log_interaction(contact_id, kind, direction, subject, content)
            .await
        {
            warn!(contact_id, %direction, error = %e, "Failed to log interaction");
        }
    }

    pub async fn event(&self, content: &str, importance: Importance, tags: &[&str]) {
        if let Err(e) = self.store.log_event(content, importance, tags).await {
            warn!(error = %e, event = content, "Failed to log event");
        }
    }
}

impl Default for ContactLog {
    fn default() -> Self {
        Self::noop()
    }
}
