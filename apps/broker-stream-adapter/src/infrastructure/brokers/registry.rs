//! Adapter registry keyed by broker name.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::adapter::{AdapterDeps, FeedAdapter};
use super::protocol::BrokerProtocol;
use super::{AngelProtocol, DhanProtocol, ShoonyaProtocol, UpstoxProtocol, ZerodhaProtocol};
use crate::application::ports::{AdapterError, BrokerAdapter};

type Factory = fn(AdapterDeps) -> Arc<dyn BrokerAdapter>;

/// Creates adapters by broker name.
#[derive(Debug, Clone, Default)]
pub struct AdapterRegistry {
    factories: BTreeMap<&'static str, Factory>,
}

impl AdapterRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in broker.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register::<ZerodhaProtocol>();
        registry.register::<AngelProtocol>();
        registry.register::<DhanProtocol>();
        registry.register::<ShoonyaProtocol>();
        registry.register::<UpstoxProtocol>();
        registry
    }

    /// Register a protocol under its name, replacing any previous entry.
    pub fn register<P: BrokerProtocol>(&mut self) {
        self.factories.insert(P::NAME, FeedAdapter::<P>::boxed);
    }

    /// Registered broker names, sorted.
    #[must_use]
    pub fn brokers(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Whether a broker is registered.
    #[must_use]
    pub fn supports(&self, broker: &str) -> bool {
        self.factories.contains_key(broker.trim().to_ascii_lowercase().as_str())
    }

    /// Create an adapter for `broker`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::UnsupportedBroker`] for unknown names.
    pub fn create(
        &self,
        broker: &str,
        deps: AdapterDeps,
    ) -> Result<Arc<dyn BrokerAdapter>, AdapterError> {
        let name = broker.trim().to_ascii_lowercase();
        let factory = self
            .factories
            .get(name.as_str())
            .ok_or_else(|| AdapterError::UnsupportedBroker(broker.to_string()))?;
        tracing::debug!(broker = %name, "Creating broker adapter");
        Ok(factory(deps))
    }
}
