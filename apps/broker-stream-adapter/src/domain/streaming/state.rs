//! Last-known symbol state and partial-update reconciliation.
//!
//! Some brokers push complete snapshots, others push sparse diffs where a
//! zero means "unchanged". Every update is folded into a per-instrument
//! [`SymbolState`] and ticks are always built from the merged state, so the
//! published shape does not depend on which kind of message arrived.

use std::collections::HashMap;

use super::{CanonicalTick, DepthLevel, MarketDepth, Mode};
use crate::domain::subscription::BrokerInstrument;

// =============================================================================
// Incoming Update
// =============================================================================

/// Whether a broker message stands alone or only carries changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateKind {
    /// Full snapshot; every present value is authoritative, zeros included.
    #[default]
    Complete,
    /// Sparse diff; zero on guarded fields means "unchanged".
    Partial,
}

/// Scalar fields a broker message may carry. `None` means absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickFields {
    /// Last traded price.
    pub ltp: Option<f64>,
    /// Last traded quantity.
    pub ltq: Option<i64>,
    /// Average traded price.
    pub average_price: Option<f64>,
    /// Day open.
    pub open: Option<f64>,
    /// Day high.
    pub high: Option<f64>,
    /// Day low.
    pub low: Option<f64>,
    /// Previous close.
    pub close: Option<f64>,
    /// Day volume.
    pub volume: Option<i64>,
    /// Open interest.
    pub oi: Option<i64>,
    /// Best bid.
    pub bid: Option<f64>,
    /// Best ask.
    pub ask: Option<f64>,
    /// Total buy quantity.
    pub total_buy_qty: Option<i64>,
    /// Total sell quantity.
    pub total_sell_qty: Option<i64>,
    /// Epoch milliseconds.
    pub timestamp: Option<i64>,
}

/// One order book level as carried by a broker message. `None` means the
/// message left that field out.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LevelUpdate {
    /// Price in rupees.
    pub price: Option<f64>,
    /// Resting quantity.
    pub quantity: Option<i64>,
    /// Number of orders.
    pub orders: Option<i64>,
}

impl LevelUpdate {
    /// Level with every field absent.
    pub const ABSENT: Self = Self {
        price: None,
        quantity: None,
        orders: None,
    };

    /// Resolve against nothing: absent fields read as zero.
    #[must_use]
    pub fn to_level(self) -> DepthLevel {
        DepthLevel::new(
            self.price.unwrap_or_default(),
            self.quantity.unwrap_or_default(),
            self.orders.unwrap_or_default(),
        )
    }

    /// Fold present fields into `slot`. A zero price is "unchanged".
    fn merge_into(self, slot: &mut DepthLevel) {
        if let Some(price) = self.price
            && price > 0.0
            && price.is_finite()
        {
            slot.price = price;
        }
        overwrite(&mut slot.quantity, self.quantity);
        overwrite(&mut slot.orders, self.orders);
    }
}

impl From<DepthLevel> for LevelUpdate {
    fn from(level: DepthLevel) -> Self {
        Self {
            price: Some(level.price),
            quantity: Some(level.quantity),
            orders: Some(level.orders),
        }
    }
}

impl PartialEq<DepthLevel> for LevelUpdate {
    fn eq(&self, other: &DepthLevel) -> bool {
        *self == Self::from(*other)
    }
}

/// Order book levels carried by a broker message, best first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepthUpdate {
    /// Bid levels.
    pub buy: Vec<LevelUpdate>,
    /// Ask levels.
    pub sell: Vec<LevelUpdate>,
}

impl DepthUpdate {
    /// Book where every level is fully present.
    #[must_use]
    pub fn from_levels(
        buy: impl IntoIterator<Item = DepthLevel>,
        sell: impl IntoIterator<Item = DepthLevel>,
    ) -> Self {
        Self {
            buy: buy.into_iter().map(LevelUpdate::from).collect(),
            sell: sell.into_iter().map(LevelUpdate::from).collect(),
        }
    }

    /// Best bid price, when present.
    #[must_use]
    pub fn best_bid(&self) -> Option<f64> {
        self.buy.first().and_then(|l| l.price)
    }

    /// Best ask price, when present.
    #[must_use]
    pub fn best_ask(&self) -> Option<f64> {
        self.sell.first().and_then(|l| l.price)
    }
}

/// Broker-agnostic update produced by a broker codec.
#[derive(Debug, Clone, PartialEq)]
pub struct TickUpdate {
    /// Instrument in the broker's namespace.
    pub instrument: BrokerInstrument,
    /// Snapshot or diff.
    pub kind: UpdateKind,
    /// Scalar values.
    pub fields: TickFields,
    /// Order book, when the message carried one.
    pub depth: Option<DepthUpdate>,
}

impl TickUpdate {
    /// Create an update with no fields set.
    #[must_use]
    pub fn new(instrument: BrokerInstrument, kind: UpdateKind) -> Self {
        Self {
            instrument,
            kind,
            fields: TickFields::default(),
            depth: None,
        }
    }
}

// =============================================================================
// Symbol State
// =============================================================================

/// Last known valid values for one instrument.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolState {
    /// Last traded price.
    pub ltp: f64,
    /// Last traded quantity.
    pub ltq: i64,
    /// Average traded price.
    pub average_price: f64,
    /// Day open.
    pub open: f64,
    /// Day high.
    pub high: f64,
    /// Day low.
    pub low: f64,
    /// Previous close.
    pub close: f64,
    /// Day volume.
    pub volume: i64,
    /// Open interest.
    pub oi: i64,
    /// Best bid.
    pub bid: f64,
    /// Best ask.
    pub ask: f64,
    /// Total buy quantity.
    pub total_buy_qty: i64,
    /// Total sell quantity.
    pub total_sell_qty: i64,
    /// Epoch milliseconds of the latest update.
    pub timestamp: i64,
    /// Bid levels.
    pub buy: Vec<DepthLevel>,
    /// Ask levels.
    pub sell: Vec<DepthLevel>,
    primed: bool,
}

impl SymbolState {
    /// Fold an update into this state.
    pub fn apply(&mut self, update: &TickUpdate) {
        match update.kind {
            UpdateKind::Complete => self.apply_complete(update),
            UpdateKind::Partial => self.apply_partial(update),
        }
    }

    /// True once the state holds data worth publishing: any complete
    /// snapshot, or a diff that carried a real last price.
    #[must_use]
    pub const fn is_primed(&self) -> bool {
        self.primed
    }

    fn apply_complete(&mut self, update: &TickUpdate) {
        let f = &update.fields;
        overwrite(&mut self.ltp, f.ltp);
        overwrite(&mut self.ltq, f.ltq);
        overwrite(&mut self.average_price, f.average_price);
        overwrite(&mut self.open, f.open);
        overwrite(&mut self.high, f.high);
        overwrite(&mut self.low, f.low);
        overwrite(&mut self.close, f.close);
        overwrite(&mut self.volume, f.volume);
        overwrite(&mut self.oi, f.oi);
        overwrite(&mut self.bid, f.bid);
        overwrite(&mut self.ask, f.ask);
        overwrite(&mut self.total_buy_qty, f.total_buy_qty);
        overwrite(&mut self.total_sell_qty, f.total_sell_qty);
        overwrite(&mut self.timestamp, f.timestamp);

        if let Some(depth) = &update.depth {
            self.buy = depth.buy.iter().map(|l| l.to_level()).collect();
            self.sell = depth.sell.iter().map(|l| l.to_level()).collect();
        }
        self.primed = true;
    }

    fn apply_partial(&mut self, update: &TickUpdate) {
        let f = &update.fields;
        // Zero is never a real value for these.
        overwrite_nonzero(&mut self.ltp, f.ltp);
        overwrite_nonzero(&mut self.average_price, f.average_price);
        overwrite_nonzero(&mut self.open, f.open);
        overwrite_nonzero(&mut self.high, f.high);
        overwrite_nonzero(&mut self.low, f.low);
        overwrite_nonzero(&mut self.close, f.close);
        overwrite_nonzero(&mut self.bid, f.bid);
        overwrite_nonzero(&mut self.ask, f.ask);
        if f.volume.is_some_and(|v| v != 0) {
            overwrite(&mut self.volume, f.volume);
        }

        overwrite(&mut self.ltq, f.ltq);
        overwrite(&mut self.oi, f.oi);
        overwrite(&mut self.total_buy_qty, f.total_buy_qty);
        overwrite(&mut self.total_sell_qty, f.total_sell_qty);
        overwrite(&mut self.timestamp, f.timestamp);

        if let Some(depth) = &update.depth {
            merge_levels(&mut self.buy, &depth.buy);
            merge_levels(&mut self.sell, &depth.sell);
        }
        if self.ltp > 0.0 {
            self.primed = true;
        }
    }

    /// Shape a tick for `mode` from the merged state.
    ///
    /// Depth ticks carry exactly `depth` levels per side, padded with empty
    /// levels when the broker sent fewer.
    #[must_use]
    pub fn to_tick(&self, symbol: &str, exchange: &str, mode: Mode, depth: usize) -> CanonicalTick {
        let mut tick = CanonicalTick {
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            mode,
            ltp: self.ltp,
            timestamp: self.timestamp,
            ltq: None,
            average_price: None,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            oi: None,
            bid: None,
            ask: None,
            totalbuyqty: None,
            totalsellqty: None,
            depth: None,
        };

        if mode >= Mode::Quote {
            tick.ltq = Some(self.ltq);
            tick.average_price = Some(self.average_price);
            tick.open = Some(self.open);
            tick.high = Some(self.high);
            tick.low = Some(self.low);
            tick.close = Some(self.close);
            tick.volume = Some(self.volume);
            tick.oi = Some(self.oi);
            tick.bid = Some(best_price(self.bid, &self.buy));
            tick.ask = Some(best_price(self.ask, &self.sell));
            tick.totalbuyqty = Some(self.total_buy_qty);
            tick.totalsellqty = Some(self.total_sell_qty);
        }

        if mode == Mode::Depth {
            tick.depth = Some(MarketDepth {
                buy: padded(&self.buy, depth),
                sell: padded(&self.sell, depth),
            });
        }

        tick
    }
}

fn overwrite<T: Copy>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

fn overwrite_nonzero(slot: &mut f64, value: Option<f64>) {
    if let Some(v) = value
        && v != 0.0
        && v.is_finite()
    {
        *slot = v;
    }
}

fn merge_levels(current: &mut Vec<DepthLevel>, incoming: &[LevelUpdate]) {
    if current.len() < incoming.len() {
        current.resize(incoming.len(), DepthLevel::EMPTY);
    }
    for (slot, level) in current.iter_mut().zip(incoming) {
        level.merge_into(slot);
    }
}

fn best_price(explicit: f64, levels: &[DepthLevel]) -> f64 {
    if explicit > 0.0 {
        explicit
    } else {
        levels.first().map_or(0.0, |l| l.price)
    }
}

fn padded(levels: &[DepthLevel], size: usize) -> Vec<DepthLevel> {
    let mut out: Vec<DepthLevel> = levels.iter().take(size).copied().collect();
    out.resize(size, DepthLevel::EMPTY);
    out
}

// =============================================================================
// State Cache
// =============================================================================

/// Per-instrument state owned by one adapter.
#[derive(Debug, Default)]
pub struct SymbolStateCache {
    states: HashMap<BrokerInstrument, SymbolState>,
}

impl SymbolStateCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an update, seeding a default state on first sight.
    pub fn apply(&mut self, update: &TickUpdate) -> &SymbolState {
        let state = self.states.entry(update.instrument.clone()).or_default();
        state.apply(update);
        state
    }

    /// Current state for an instrument.
    #[must_use]
    pub fn get(&self, instrument: &BrokerInstrument) -> Option<&SymbolState> {
        self.states.get(instrument)
    }

    /// Number of cached instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Drop every cached state.
    pub fn clear(&mut self) {
        self.states.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
