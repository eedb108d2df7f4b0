//! Subscription Reference Counting
//!
//! Tracks which `(exchange, symbol, mode)` triples callers hold and how many
//! times each was requested, so N downstream subscribers result in exactly
//! one upstream broker subscription.
//!
//! # Design
//!
//! The table only answers bookkeeping questions. It never talks to the
//! broker; the adapter asks it what changed and decides which frame to send:
//! - A key's first reference is a candidate for an upstream subscribe
//! - The last release of a key is a candidate for an unsubscribe or a
//!   downgrade to the highest mode still held for the same instrument
//! - Replay after a reconnect sends each instrument once, in its highest mode

pub mod routing;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::streaming::Mode;

pub use routing::{Route, TokenMap};

// =============================================================================
// Keys
// =============================================================================

/// Canonical subscription identity.
///
/// Ordering is `(exchange, symbol, mode)`, so every mode of one symbol sits
/// in a contiguous range of the table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    /// Canonical exchange code.
    pub exchange: String,
    /// Canonical trading symbol.
    pub symbol: String,
    /// Requested mode.
    pub mode: Mode,
}

impl SubscriptionKey {
    /// Create a key.
    #[must_use]
    pub fn new(exchange: impl Into<String>, symbol: impl Into<String>, mode: Mode) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
            mode,
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.exchange, self.symbol, self.mode)
    }
}

/// An instrument in a broker's namespace: the broker's exchange code plus
/// its instrument token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BrokerInstrument {
    /// Broker-specific exchange or segment code.
    pub broker_exchange: String,
    /// Broker instrument token.
    pub token: String,
}

impl BrokerInstrument {
    /// Create a broker instrument.
    #[must_use]
    pub fn new(broker_exchange: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            broker_exchange: broker_exchange.into(),
            token: token.into(),
        }
    }
}

impl fmt::Display for BrokerInstrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.broker_exchange, self.token)
    }
}

// =============================================================================
// Subscription Entry
// =============================================================================

/// One live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Resolved broker instrument.
    pub instrument: BrokerInstrument,
    /// Depth the first caller asked for.
    pub requested_depth: u8,
    /// Depth the broker can actually serve.
    pub actual_depth: u8,
    /// Number of holders. Never zero while stored.
    pub ref_count: u32,
}

impl Subscription {
    /// Fresh subscription with a single holder.
    #[must_use]
    pub const fn new(instrument: BrokerInstrument, requested_depth: u8, actual_depth: u8) -> Self {
        Self {
            instrument,
            requested_depth,
            actual_depth,
            ref_count: 1,
        }
    }

    /// Whether the granted depth differs from the request.
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        self.requested_depth != self.actual_depth
    }
}

/// Outcome of releasing one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    /// Other holders remain.
    Retained {
        /// Holders left.
        ref_count: u32,
    },
    /// That was the last holder; the entry is gone.
    Removed(Subscription),
}

/// Errors from table operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// Key is not held by anyone.
    #[error("not subscribed: {0}")]
    NotSubscribed(SubscriptionKey),
}

/// Highest `(mode, depth)` currently held for a broker instrument.
pub type ModeLevel = (Mode, u8);

// =============================================================================
// Subscription Table
// =============================================================================

/// Reference-counted subscription table owned by one adapter.
///
/// Not synchronized; the adapter keeps it behind its own lock together with
/// the token map and symbol state.
///
/// # Example
///
/// ```rust
/// use broker_stream_adapter::domain::streaming::Mode;
/// use broker_stream_adapter::domain::subscription::{
///     BrokerInstrument, Release, SubscriptionKey, SubscriptionTable,
/// };
///
/// let mut table = SubscriptionTable::new();
/// let key = SubscriptionKey::new("NSE", "RELIANCE", Mode::Quote);
///
/// // First caller: not yet present, so the adapter subscribes upstream
/// assert!(table.acquire_existing(&key).is_none());
/// table.insert(key.clone(), BrokerInstrument::new("NSE", "2885"), 5, 5);
///
/// // Second caller only bumps the count
/// assert_eq!(table.acquire_existing(&key), Some(2));
///
/// assert_eq!(table.release(&key).unwrap(), Release::Retained { ref_count: 1 });
/// assert!(matches!(table.release(&key).unwrap(), Release::Removed(_)));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: BTreeMap<SubscriptionKey, Subscription>,
}

impl SubscriptionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reference to an existing key.
    ///
    /// Returns the new count, or `None` when the key is not held yet.
    pub fn acquire_existing(&mut self, key: &SubscriptionKey) -> Option<u32> {
        let entry = self.entries.get_mut(key)?;
        entry.ref_count = entry.ref_count.saturating_add(1);
        Some(entry.ref_count)
    }

    /// Record a first reference.
    pub fn insert(
        &mut self,
        key: SubscriptionKey,
        instrument: BrokerInstrument,
        requested_depth: u8,
        actual_depth: u8,
    ) -> &Subscription {
        self.entries
            .entry(key)
            .or_insert_with(|| Subscription::new(instrument, requested_depth, actual_depth))
    }

    /// Put back an entry removed by [`release`](Self::release).
    pub fn restore(&mut self, key: SubscriptionKey, subscription: Subscription) {
        self.entries.insert(key, subscription);
    }

    /// Drop one reference.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::NotSubscribed`] for unknown keys.
    pub fn release(&mut self, key: &SubscriptionKey) -> Result<Release, SubscriptionError> {
        let Some(entry) = self.entries.get_mut(key) else {
            return Err(SubscriptionError::NotSubscribed(key.clone()));
        };

        if entry.ref_count > 1 {
            entry.ref_count -= 1;
            return Ok(Release::Retained {
                ref_count: entry.ref_count,
            });
        }

        self.entries
            .remove(key)
            .map(Release::Removed)
            .ok_or_else(|| SubscriptionError::NotSubscribed(key.clone()))
    }

    /// Look up a subscription.
    #[must_use]
    pub fn get(&self, key: &SubscriptionKey) -> Option<&Subscription> {
        self.entries.get(key)
    }

    /// Highest mode (and its depth) held for a broker instrument, across every
    /// canonical key that resolved to it.
    #[must_use]
    pub fn top_level(&self, instrument: &BrokerInstrument) -> Option<ModeLevel> {
        self.entries
            .iter()
            .filter(|(_, sub)| &sub.instrument == instrument)
            .map(|(key, sub)| (key.mode, sub.actual_depth))
            .max()
    }

    /// Modes held for one canonical symbol, ascending, with their depths.
    #[must_use]
    pub fn active_modes(&self, exchange: &str, symbol: &str) -> Vec<ModeLevel> {
        let start = SubscriptionKey::new(exchange, symbol, Mode::Ltp);
        let end = SubscriptionKey::new(exchange, symbol, Mode::Depth);
        self.entries
            .range(start..=end)
            .map(|(key, sub)| (key.mode, sub.actual_depth))
            .collect()
    }

    /// Whether any mode of the canonical symbol is still held.
    #[must_use]
    pub fn holds_symbol(&self, exchange: &str, symbol: &str) -> bool {
        !self.active_modes(exchange, symbol).is_empty()
    }

    /// Instruments to resubscribe after a reconnect, each once in its highest
    /// mode, grouped by `(mode, depth)` so a broker can batch them.
    #[must_use]
    pub fn replay_groups(&self) -> BTreeMap<ModeLevel, Vec<BrokerInstrument>> {
        let mut top: BTreeMap<&BrokerInstrument, ModeLevel> = BTreeMap::new();
        for (key, sub) in &self.entries {
            let level = (key.mode, sub.actual_depth);
            top.entry(&sub.instrument)
                .and_modify(|current| {
                    if level > *current {
                        *current = level;
                    }
                })
                .or_insert(level);
        }

        let mut groups: BTreeMap<ModeLevel, Vec<BrokerInstrument>> = BTreeMap::new();
        for (instrument, level) in top {
            groups.entry(level).or_default().push(instrument.clone());
        }
        groups
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&SubscriptionKey, &Subscription)> {
        self.entries.iter()
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all reference counts.
    #[must_use]
    pub fn total_references(&self) -> u64 {
        self.entries.values().map(|s| u64::from(s.ref_count)).sum()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of subscription bookkeeping for one adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Distinct `(exchange, symbol, mode)` keys.
    pub subscriptions: usize,
    /// Sum of reference counts.
    pub references: u64,
    /// Broker instruments currently routed.
    pub routed_instruments: usize,
    /// Instruments with cached state.
    pub cached_states: usize,
}

// =============================================================================
// Tests
// =============================================================================
