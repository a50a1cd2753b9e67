//! LLM integration.
//!
//! A single OpenAI-compatible endpoint (llama-server and friends) serves
//! whichever model the swap controller has loaded. `LlmClient` speaks its
//! chat-completions API, auto-detects the loaded model id, and doubles as the
//! liveness probe the swap controller polls.

pub mod client;
pub mod provider;

pub use client::LlmClient;
pub use provider::*;

use std::time::Duration;

use crate::config::EnvVars;
use crate::error::ConfigError;
use crate::swap::catalog::{DEFAULT_MODELS, ModelCatalog};

/// Configuration for the model endpoint and its backends.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL including the `/v1` suffix.
    pub base_url: String,
    pub api_key: secrecy::SecretString,
    pub models: ModelCatalog,
    /// Key of the model the daemon keeps loaded.
    pub default_model: String,
    /// Upper bound on waiting for a started model to answer.
    pub swap_timeout: Duration,
    /// Upper bound on one completion request.
    pub request_timeout: Duration,
}

impl LlmConfig {
    pub fn from_vars(vars: &EnvVars) -> Result<Self, ConfigError> {
        let models = ModelCatalog::parse(vars.get("LLM_MODELS").unwrap_or(DEFAULT_MODELS))?;

        let default_model = match vars.get("LLM_DEFAULT_MODEL") {
            Some(key) if models.contains(key) => key.to_string(),
            Some(key) => {
                return Err(ConfigError::InvalidValue {
                    key: "LLM_DEFAULT_MODEL".into(),
                    message: format!("'{}' is not one of {}", key, models.keys().join(", ")),
                });
            }
            None => models
                .default_key()
                .map(str::to_string)
                .ok_or_else(|| ConfigError::MissingRequired {
                    key: "LLM_DEFAULT_MODEL".into(),
                    hint: "Configure at least one model in LLM_MODELS.".into(),
                })?,
        };

        Ok(Self {
            base_url: vars
                .get_or("LLM_BASE_URL", "http://localhost:8080/v1")
                .trim_end_matches('/')
                .to_string(),
            api_key: secrecy::SecretString::from(vars.get_or("LLM_API_KEY", "sk-local-no-auth")),
            models,
            default_model,
            swap_timeout: vars.secs_or("LLM_SWAP_TIMEOUT_SECS", 120)?,
            request_timeout: vars.secs_or("LLM_REQUEST_TIMEOUT_SECS", 300)?,
        })
    }
}
