//! Publish Bus
//!
//! Fans normalized ticks out to downstream consumers.
//!
//! # Architecture
//!
//! - [`BusContext`] is created once by the composition root and shared by
//!   every adapter. It owns the in-process hub channel and the
//!   [`PortRegistry`].
//! - Each adapter opens one [`BusPublisher`]. A publisher sends every message
//!   to the hub and, when a TCP port is configured, streams it to clients
//!   connected to its bound port as `topic json\n` lines.
//!
//! Topics are `{broker}_{EXCHANGE}_{SYMBOL}_{MODE}`; the unprefixed
//! `{EXCHANGE}_{SYMBOL}_{MODE}` is published too when legacy topics are on.

pub mod publisher;
pub mod registry;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::infrastructure::config::BusSettings;

pub use publisher::BusPublisher;
pub use registry::{PortLease, PortRegistry};

// =============================================================================
// Bus Message
// =============================================================================

/// One message on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Routing topic.
    pub topic: String,
    /// JSON payload, shared between topics and receivers.
    pub payload: Arc<str>,
}

impl BusMessage {
    /// Line sent to TCP subscribers: topic, one space, JSON, newline.
    #[must_use]
    pub fn to_wire(&self) -> String {
        let mut line = String::with_capacity(self.topic.len() + self.payload.len() + 2);
        line.push_str(&self.topic);
        line.push(' ');
        line.push_str(&self.payload);
        line.push('\n');
        line
    }
}

/// Bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Every port in the configured range is taken.
    #[error("no free bus port in {start}..{end}")]
    NoFreePort {
        /// First port tried.
        start: u16,
        /// One past the last port tried.
        end: u16,
    },

    /// Payload could not be serialized.
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Publisher was closed.
    #[error("publisher closed")]
    Closed,
}

// =============================================================================
// Bus Context
// =============================================================================

/// Shared bus state passed explicitly to every adapter.
#[derive(Debug)]
pub struct BusContext {
    settings: BusSettings,
    registry: Arc<PortRegistry>,
    hub: broadcast::Sender<BusMessage>,
}

impl BusContext {
    /// Create a context.
    #[must_use]
    pub fn new(settings: BusSettings) -> Self {
        let (hub, _) = broadcast::channel(settings.channel_capacity.max(1));
        Self {
            settings,
            registry: Arc::new(PortRegistry::new()),
            hub,
        }
    }

    /// Receive every message published by any adapter in this process.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.hub.subscribe()
    }

    /// In-process receivers currently attached to the hub.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.hub.receiver_count()
    }

    /// Port registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<PortRegistry> {
        &self.registry
    }

    /// Bus settings.
    #[must_use]
    pub const fn settings(&self) -> &BusSettings {
        &self.settings
    }

    /// Open a publisher for `owner`, binding the first free port in range.
    ///
    /// With a base port of 0 the publisher is in-process only.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NoFreePort`] when no port in range can be bound.
    pub async fn open_publisher(&self, owner: &str) -> Result<Arc<BusPublisher>, BusError> {
        if self.settings.base_port == 0 {
            tracing::debug!(owner, "Opening in-process bus publisher");
            return Ok(Arc::new(BusPublisher::in_process(
                owner,
                self.hub.clone(),
                &self.settings,
            )));
        }

        let start = self.settings.base_port;
        let end = start.saturating_add(self.settings.port_range.max(1));
        for port in start..end {
            let Some(lease) = self.registry.try_reserve(port) else {
                continue;
            };
            match TcpListener::bind((self.settings.host.as_str(), port)).await {
                Ok(listener) => {
                    tracing::info!(owner, port, "Bus publisher bound");
                    return Ok(Arc::new(BusPublisher::bound(
                        owner,
                        self.hub.clone(),
                        &self.settings,
                        listener,
                        lease,
                    )));
                }
                Err(e) => {
                    tracing::debug!(owner, port, error = %e, "Bus port unavailable");
                }
            }
        }

        Err(BusError::NoFreePort { start, end })
    }
}
