//! Error types for the triage daemon.

use std::time::Duration;

/// Top-level error type for the daemon.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Model swap error: {0}")]
    Swap(#[from] SwapError),

    #[error("Contact store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} poll failed: {reason}")]
    PollFailed { name: String, reason: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Channel {name} connection failed: {reason}")]
    ConnectFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// LLM endpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("Endpoint {endpoint} returned HTTP {status}: {body}")]
    HttpStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Model swap controller errors.
#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    #[error("Unknown model: {key}")]
    UnknownModel { key: String },

    #[error("Model {key} did not become ready within {timeout:?}")]
    NotReady { key: String, timeout: Duration },

    #[error("LLM endpoint not reachable (passthrough mode, wanted {key})")]
    EndpointUnreachable { key: String },

    #[error("Supervisor failed to {action} {unit}: {reason}")]
    Supervisor {
        action: String,
        unit: String,
        reason: String,
    },
}

/// Errors surfaced by the contact/interaction store collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Contact store unavailable: {0}")]
    Unavailable(String),

    #[error("Contact store query failed: {0}")]
    Query(String),
}
