//! Model descriptors for the backends sharing one endpoint.

use std::time::Duration;

use crate::error::ConfigError;

/// Built-in catalog used when `LLM_MODELS` is unset.
pub const DEFAULT_MODELS: &str = "triage:llama-triage:10:default,heavy:llama-heavy:30:on_demand";

/// Whether a model is the always-on default or only loaded on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Default,
    OnDemand,
}

impl std::str::FromStr for ModelRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "on_demand" | "on-demand" | "batch" => Ok(Self::OnDemand),
            other => Err(format!("Unknown model role: {}", other)),
        }
    }
}

/// One model backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub key: String,
    pub label: String,
    /// Supervisor unit that runs this model.
    pub unit: String,
    /// Fixed wait after start before readiness polling begins.
    pub startup_grace: Duration,
    pub role: ModelRole,
}

/// Immutable, ordered set of model descriptors.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self { models }
    }

    /// Parse `key:unit:grace_secs[:role[:label]]` entries separated by commas.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: "LLM_MODELS".into(),
            message,
        };

        let mut models: Vec<ModelDescriptor> = Vec::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            if parts.len() < 3 {
                return Err(invalid(format!(
                    "'{}' must be key:unit:grace_secs[:role[:label]]",
                    entry
                )));
            }
            let key = parts[0];
            if key.is_empty() || parts[1].is_empty() {
                return Err(invalid(format!("'{}' has an empty key or unit", entry)));
            }
            if models.iter().any(|m| m.key == key) {
                return Err(invalid(format!("duplicate model key '{}'", key)));
            }
            let grace: u64 = parts[2]
                .parse()
                .map_err(|e| invalid(format!("'{}': bad grace seconds: {}", entry, e)))?;
            let role = match parts.get(3) {
                Some(r) => r.parse().map_err(invalid)?,
                None => ModelRole::OnDemand,
            };
            let label = parts.get(4).map_or_else(|| key.to_string(), |l| l.to_string());
            models.push(ModelDescriptor {
                key: key.to_string(),
                label,
                unit: parts[1].to_string(),
                startup_grace: Duration::from_secs(grace),
                role,
            });
        }

        if models.is_empty() {
            return Err(invalid("no models configured".into()));
        }
        Ok(Self { models })
    }

    pub fn get(&self, key: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.key.as_str()).collect()
    }

    /// First model with the `Default` role, else the first model.
    pub fn default_key(&self) -> Option<&str> {
        self.models
            .iter()
            .find(|m| m.role == ModelRole::Default)
            .or_else(|| self.models.first())
            .map(|m| m.key.as_str())
    }
}
