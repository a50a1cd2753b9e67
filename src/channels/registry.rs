//! Registry of channel adapters, keyed by channel kind.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::pipeline::types::{ChannelAdapter, ChannelKind};

/// Registered adapters, visited in `ChannelKind` order.
#[derive(Default, Clone)]
pub struct ChannelRegistry {
    adapters: BTreeMap<ChannelKind, Arc<dyn ChannelAdapter>>,
}

impl ChannelRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own kind, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        let kind = adapter.kind();
        if self.adapters.insert(kind, adapter).is_some() {
            tracing::warn!(channel = %kind, "Replaced existing channel adapter");
        } else {
            tracing::debug!(channel = %kind, "Registered channel adapter");
        }
    }

    pub fn with(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, kind: ChannelKind) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    /// Snapshot of all adapters in visiting order.
    pub fn adapters(&self) -> Vec<Arc<dyn ChannelAdapter>> {
        self.adapters.values().cloned().collect()
    }

    pub fn kinds(&self) -> Vec<ChannelKind> {
        self.adapters.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }
}
