//! Bus port bookkeeping.
//!
//! Several adapters in one process each bind their own publisher port. The
//! registry hands out ports so two publishers never race for the same one;
//! a [`PortLease`] gives its port back when dropped.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

/// Ports currently claimed by publishers in this process.
#[derive(Debug, Default)]
pub struct PortRegistry {
    claimed: Mutex<BTreeSet<u16>>,
}

impl PortRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a port. Returns `None` if another publisher holds it.
    #[must_use]
    pub fn try_reserve(self: &Arc<Self>, port: u16) -> Option<PortLease> {
        if self.claimed.lock().insert(port) {
            Some(PortLease {
                port,
                registry: Arc::clone(self),
            })
        } else {
            None
        }
    }

    /// Whether a port is claimed.
    #[must_use]
    pub fn is_claimed(&self, port: u16) -> bool {
        self.claimed.lock().contains(&port)
    }

    /// Number of claimed ports.
    #[must_use]
    pub fn claimed_count(&self) -> usize {
        self.claimed.lock().len()
    }

    fn release(&self, port: u16) {
        self.claimed.lock().remove(&port);
    }
}

/// A claimed port, released on drop.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    registry: Arc<PortRegistry>,
}

impl PortLease {
    /// The leased port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.registry.release(self.port);
        tracing::debug!(port = self.port, "Bus port released");
    }
}
