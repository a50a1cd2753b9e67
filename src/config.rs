//! Configuration types.
//!
//! Everything is read from environment variables, optionally seeded from a
//! `.env` file. Component configs (`EmailConfig`, `SignalConfig`,
//! `LlmConfig`) build themselves from an [`EnvVars`] snapshot so tests never
//! have to touch the process environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::channels::email::EmailConfig;
use crate::channels::signal::SignalConfig;
use crate::error::ConfigError;
use crate::llm::LlmConfig;
use crate::pipeline::types::ChannelKind;

/// Default command prefix on the shared control channel.
pub const DEFAULT_CONTROL_PREFIX: &str = "/triage";

// ── Variable snapshot ───────────────────────────────────────────────

/// A snapshot of configuration variables.
#[derive(Debug, Clone, Default)]
pub struct EnvVars {
    vars: HashMap<String, String>,
}

impl EnvVars {
    /// `.env` file values overlaid by the process environment.
    pub fn load() -> Self {
        let dotenv_path = std::env::var("DOTENV_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".env"));
        let mut vars = load_dotenv(&dotenv_path);
        vars.extend(std::env::vars());
        Self { vars }
    }

    /// Raw value, including empty strings.
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Trimmed, non-empty value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.raw(key).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    /// Parse a value, falling back to `default` when unset.
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{}': {}", v, e),
            }),
        }
    }

    pub fn secs_or(&self, key: &str, default_secs: u64) -> Result<Duration, ConfigError> {
        self.parse_or(key, default_secs).map(Duration::from_secs)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(str::to_ascii_lowercase).as_deref() {
            None => Ok(default),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some("0" | "false" | "no" | "off") => Ok(false),
            Some(other) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{}' is not a boolean", other),
            }),
        }
    }

    /// Comma-separated list, trimmed, empties dropped.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvVars {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Read a `.env` file. A missing file yields an empty map; malformed lines
/// are logged and skipped.
pub fn load_dotenv(path: &Path) -> HashMap<String, String> {
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(e) => {
            if !e.not_found() {
                tracing::warn!(path = %path.display(), error = %e, "Cannot read .env file");
            }
            return HashMap::new();
        }
    };
    iter.filter_map(|item| match item {
        Ok(pair) => Some(pair),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Skipping .env line");
            None
        }
    })
    .collect()
}

// ── Control channel ─────────────────────────────────────────────────

/// Where operator commands arrive and notifications go.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Channel carrying operator traffic.
    pub channel: ChannelKind,
    /// Operator identity on that channel.
    pub operator: String,
    /// Command prefix shared with other consumers of the channel, if any.
    pub prefix: Option<String>,
}

impl ControlConfig {
    pub fn from_vars(vars: &EnvVars) -> Result<Self, ConfigError> {
        let channel = vars.parse_or("CONTROL_CHANNEL", ChannelKind::Signal)?;
        let operator = vars
            .get("CONTROL_OPERATOR")
            .or_else(|| vars.get("SIGNAL_OWNER_NUMBER"))
            .unwrap_or_default()
            .to_string();
        // Explicitly empty means "no prefix".
        let prefix = match vars.raw("CONTROL_PREFIX") {
            None => Some(DEFAULT_CONTROL_PREFIX.to_string()),
            Some(p) if p.trim().is_empty() => None,
            Some(p) => Some(p.trim().to_string()),
        };
        Ok(Self {
            channel,
            operator,
            prefix,
        })
    }
}

// ── Daemon ──────────────────────────────────────────────────────────

/// Top-level daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Sleep between poll cycles.
    pub poll_interval: Duration,
    /// Pending actions older than this expire.
    pub approval_timeout: Duration,
    /// Terminal actions older than this are swept from memory.
    pub approval_retention: Duration,
    /// Fallback log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Directory for a daily rolling log file.
    pub log_dir: Option<PathBuf>,
    /// Extra context appended to the classifier prompt.
    pub triage_context: Option<String>,
    /// Sign-off line the drafter is told to use.
    pub draft_signature: Option<String>,
    pub llm: LlmConfig,
    pub control: ControlConfig,
    /// `None` when credentials are missing (channel disabled).
    pub email: Option<EmailConfig>,
    /// `None` when no account is configured (channel disabled).
    pub signal: Option<SignalConfig>,
}

impl DaemonConfig {
    /// Load from `.env` plus the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&EnvVars::load())
    }

    pub fn from_vars(vars: &EnvVars) -> Result<Self, ConfigError> {
        Ok(Self {
            poll_interval: vars.secs_or("POLL_INTERVAL_SECS", 30)?,
            approval_timeout: vars.secs_or("APPROVAL_TIMEOUT_SECS", 3600)?,
            approval_retention: vars.secs_or("APPROVAL_RETENTION_SECS", 86_400)?,
            log_level: vars.get_or("LOG_LEVEL", "info").to_ascii_lowercase(),
            log_dir: vars.get("LOG_DIR").map(PathBuf::from),
            triage_context: vars.get("TRIAGE_CONTEXT").map(str::to_string),
            draft_signature: vars.get("DRAFT_SIGNATURE").map(str::to_string),
            llm: LlmConfig::from_vars(vars)?,
            control: ControlConfig::from_vars(vars)?,
            email: EmailConfig::from_vars(vars)?,
            signal: SignalConfig::from_vars(vars),
        })
    }
}
