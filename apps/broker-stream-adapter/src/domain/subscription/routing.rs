//! Broker token to canonical symbol routing.
//!
//! Ticks arrive keyed by broker token; the map turns them back into the
//! canonical `(exchange, symbol)` pairs that subscribed. Several canonical
//! pairs may resolve to the same broker instrument. Retired routes linger for
//! a grace window so ticks already in flight when the last holder left are
//! still recognised instead of being logged as unknown.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::BrokerInstrument;

/// Default time a retired route keeps resolving.
pub const DEFAULT_ROUTE_GRACE: Duration = Duration::from_secs(5);

/// Canonical destination of a broker tick.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route {
    /// Canonical exchange code.
    pub exchange: String,
    /// Canonical trading symbol.
    pub symbol: String,
}

impl Route {
    /// Create a route.
    #[must_use]
    pub fn new(exchange: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct RouteEntry {
    route: Route,
    retired_at: Option<Instant>,
}

/// Token routing table scoped to one adapter.
#[derive(Debug)]
pub struct TokenMap {
    routes: HashMap<BrokerInstrument, Vec<RouteEntry>>,
    grace: Duration,
}

impl Default for TokenMap {
    fn default() -> Self {
        Self::new(DEFAULT_ROUTE_GRACE)
    }
}

impl TokenMap {
    /// Create a map with the given retirement grace.
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self {
            routes: HashMap::new(),
            grace,
        }
    }

    /// Bind a route to an instrument, reviving it if it was retired.
    pub fn bind(&mut self, instrument: &BrokerInstrument, route: Route) {
        let entries = self.routes.entry(instrument.clone()).or_default();
        if let Some(existing) = entries.iter_mut().find(|e| e.route == route) {
            existing.retired_at = None;
        } else {
            entries.push(RouteEntry {
                route,
                retired_at: None,
            });
        }
    }

    /// Mark a route as retired; it is removed by [`purge`](Self::purge) once
    /// the grace window has elapsed.
    pub fn retire(&mut self, instrument: &BrokerInstrument, route: &Route, now: Instant) {
        if let Some(entry) = self
            .routes
            .get_mut(instrument)
            .and_then(|entries| entries.iter_mut().find(|e| &e.route == route))
        {
            entry.retired_at.get_or_insert(now);
        }
    }

    /// Routes for an instrument, retired ones included until purged.
    #[must_use]
    pub fn resolve(&self, instrument: &BrokerInstrument) -> Vec<Route> {
        self.routes
            .get(instrument)
            .map(|entries| entries.iter().map(|e| e.route.clone()).collect())
            .unwrap_or_default()
    }

    /// Whether an instrument has any route at all.
    #[must_use]
    pub fn contains(&self, instrument: &BrokerInstrument) -> bool {
        self.routes.contains_key(instrument)
    }

    /// Drop routes retired longer ago than the grace window.
    ///
    /// Returns the number of routes dropped.
    pub fn purge(&mut self, now: Instant) -> usize {
        let grace = self.grace;
        let mut dropped = 0;
        self.routes.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| {
                e.retired_at
                    .is_none_or(|at| now.saturating_duration_since(at) < grace)
            });
            dropped += before - entries.len();
            !entries.is_empty()
        });
        dropped
    }

    /// Number of routed instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// True when nothing is routed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Drop every route immediately.
    pub fn clear(&mut self) {
        self.routes.clear();
    }
}
