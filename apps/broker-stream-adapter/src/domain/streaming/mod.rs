//! Market Data Streaming Types
//!
//! Canonical, broker-agnostic market data types: feed modes, exchange
//! vocabulary, depth levels and the normalized tick that crosses the bus
//! boundary. Broker codecs convert into these types; nothing downstream
//! ever sees a broker-native field.

pub mod price;
pub mod state;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use state::{
    DepthUpdate, LevelUpdate, SymbolState, SymbolStateCache, TickFields, TickUpdate, UpdateKind,
};

/// Depth granted when a caller does not ask for a specific level count.
pub const DEFAULT_DEPTH: u8 = 5;

/// Largest depth a canonical tick carries per side.
pub const MAX_DEPTH: u8 = 20;

// =============================================================================
// Feed Mode
// =============================================================================

/// Market data mode requested by a subscriber.
///
/// Ordering is meaningful: a higher mode carries every field of the lower
/// modes, so one upstream subscription in the highest active mode serves all
/// of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// Last traded price only.
    Ltp = 1,
    /// OHLC, volume, open interest and best bid/ask.
    Quote = 2,
    /// Quote plus multiple price levels per side.
    Depth = 3,
}

impl Mode {
    /// All modes in ascending order.
    pub const ALL: [Self; 3] = [Self::Ltp, Self::Quote, Self::Depth];

    /// Parse the canonical integer code (1=LTP, 2=Quote, 3=Depth).
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Ltp),
            2 => Some(Self::Quote),
            3 => Some(Self::Depth),
            _ => None,
        }
    }

    /// Canonical integer code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Uppercase name used in topics and payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ltp => "LTP",
            Self::Quote => "QUOTE",
            Self::Depth => "DEPTH",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a mode code or name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid feed mode: {0}")]
pub struct InvalidMode(pub String);

impl TryFrom<u8> for Mode {
    type Error = InvalidMode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| InvalidMode(code.to_string()))
    }
}

impl FromStr for Mode {
    type Err = InvalidMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "1" | "LTP" => Ok(Self::Ltp),
            "2" | "QUOTE" => Ok(Self::Quote),
            "3" | "DEPTH" => Ok(Self::Depth),
            other => Err(InvalidMode(other.to_string())),
        }
    }
}

// =============================================================================
// Exchange Vocabulary
// =============================================================================

/// Canonical exchange codes understood by every broker mapper.
///
/// Subscriptions keep the exchange as the caller's string so unknown codes
/// still flow through; mappers use [`Exchange::parse`] and fall back to their
/// broker default when it returns `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exchange {
    /// NSE cash market.
    Nse,
    /// BSE cash market.
    Bse,
    /// NSE futures and options.
    Nfo,
    /// BSE futures and options.
    Bfo,
    /// MCX commodities.
    Mcx,
    /// NSE currency derivatives.
    Cds,
    /// BSE currency derivatives.
    Bcd,
    /// NSE indices.
    NseIndex,
    /// BSE indices.
    BseIndex,
    /// MCX indices.
    McxIndex,
}

impl Exchange {
    /// Parse a canonical exchange code, case-insensitively.
    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "NSE" => Some(Self::Nse),
            "BSE" => Some(Self::Bse),
            "NFO" => Some(Self::Nfo),
            "BFO" => Some(Self::Bfo),
            "MCX" => Some(Self::Mcx),
            "CDS" => Some(Self::Cds),
            "BCD" => Some(Self::Bcd),
            "NSE_INDEX" => Some(Self::NseIndex),
            "BSE_INDEX" => Some(Self::BseIndex),
            "MCX_INDEX" => Some(Self::McxIndex),
            _ => None,
        }
    }

    /// Canonical code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nse => "NSE",
            Self::Bse => "BSE",
            Self::Nfo => "NFO",
            Self::Bfo => "BFO",
            Self::Mcx => "MCX",
            Self::Cds => "CDS",
            Self::Bcd => "BCD",
            Self::NseIndex => "NSE_INDEX",
            Self::BseIndex => "BSE_INDEX",
            Self::McxIndex => "MCX_INDEX",
        }
    }

    /// Currency segments quote with four decimals.
    #[must_use]
    pub const fn is_currency(self) -> bool {
        matches!(self, Self::Cds | Self::Bcd)
    }
}

/// Pick the deepest supported level not exceeding the request.
///
/// Falls back to [`DEFAULT_DEPTH`] when nothing qualifies.
#[must_use]
pub fn fallback_depth(supported: &[u8], requested: u8) -> u8 {
    supported
        .iter()
        .copied()
        .filter(|&d| d <= requested)
        .max()
        .unwrap_or(DEFAULT_DEPTH)
}

// =============================================================================
// Canonical Tick
// =============================================================================

/// One price level of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DepthLevel {
    /// Price in rupees.
    pub price: f64,
    /// Resting quantity.
    pub quantity: i64,
    /// Number of orders at this level.
    pub orders: i64,
}

impl DepthLevel {
    /// Padding entry for levels the broker did not send.
    pub const EMPTY: Self = Self {
        price: 0.0,
        quantity: 0,
        orders: 0,
    };

    /// Create a depth level.
    #[must_use]
    pub const fn new(price: f64, quantity: i64, orders: i64) -> Self {
        Self {
            price,
            quantity,
            orders,
        }
    }
}

/// Both sides of the order book.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketDepth {
    /// Bid levels, best first.
    pub buy: Vec<DepthLevel>,
    /// Ask levels, best first.
    pub sell: Vec<DepthLevel>,
}

/// Normalized market data record published on the bus.
///
/// Field names are stable across brokers. Which optional fields are present
/// depends on `mode`: LTP ticks carry only price and timestamp, QUOTE ticks
/// add OHLC/volume/bid/ask, DEPTH ticks add `depth`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTick {
    /// Canonical trading symbol.
    pub symbol: String,
    /// Canonical exchange code.
    pub exchange: String,
    /// Mode this tick was shaped for.
    pub mode: Mode,
    /// Last traded price.
    pub ltp: f64,
    /// Exchange or receive time, epoch milliseconds.
    pub timestamp: i64,
    /// Last traded quantity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ltq: Option<i64>,
    /// Volume weighted average price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_price: Option<f64>,
    /// Day open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open: Option<f64>,
    /// Day high.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    /// Day low.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    /// Previous close.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close: Option<f64>,
    /// Traded volume for the day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<i64>,
    /// Open interest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oi: Option<i64>,
    /// Best bid price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<f64>,
    /// Best ask price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<f64>,
    /// Total pending buy quantity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totalbuyqty: Option<i64>,
    /// Total pending sell quantity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totalsellqty: Option<i64>,
    /// Order book levels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<MarketDepth>,
}

impl CanonicalTick {
    /// Topic without broker prefix: `{EXCHANGE}_{SYMBOL}_{MODE}`.
    #[must_use]
    pub fn topic(&self) -> String {
        topic(&self.exchange, &self.symbol, self.mode)
    }

    /// Topic with broker prefix: `{broker}_{EXCHANGE}_{SYMBOL}_{MODE}`.
    #[must_use]
    pub fn broker_topic(&self, broker: &str) -> String {
        format!("{broker}_{}", self.topic())
    }
}

/// Build the bus topic for an instrument and mode.
#[must_use]
pub fn topic(exchange: &str, symbol: &str, mode: Mode) -> String {
    format!("{exchange}_{symbol}_{}", mode.as_str())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(1, Some(Mode::Ltp))]
    #[test_case(2, Some(Mode::Quote))]
    #[test_case(3, Some(Mode::Depth))]
    #[test_case(0, None)]
    #[test_case(4, None)]
    fn mode_from_code(code: u8, expected: Option<Mode>) {
        assert_eq!(Mode::from_code(code), expected);
    }

    #[test]
    fn mode_parses_names_and_codes() {
        assert_eq!("quote".parse::<Mode>().unwrap(), Mode::Quote);
        assert_eq!("3".parse::<Mode>().unwrap(), Mode::Depth);
        assert!("full".parse::<Mode>().is_err());
    }

    #[test]
    fn modes_are_ordered_by_richness() {
        assert!(Mode::Ltp < Mode::Quote);
        assert!(Mode::Quote < Mode::Depth);
    }

    #[test]
    fn exchange_parse_is_case_insensitive() {
        assert_eq!(Exchange::parse("nse_index"), Some(Exchange::NseIndex));
        assert_eq!(Exchange::parse("XYZ"), None);
    }

    #[test_case(&[5], 20, 5 ; "only five supported")]
    #[test_case(&[5, 20], 20, 20 ; "twenty supported")]
    #[test_case(&[5, 20], 10, 5 ; "between levels")]
    #[test_case(&[20], 5, 5 ; "nothing below request uses default")]
    fn fallback_depth_picks_deepest_supported(supported: &[u8], requested: u8, expected: u8) {
        assert_eq!(fallback_depth(supported, requested), expected);
    }

    #[test]
    fn topic_format() {
        assert_eq!(topic("NSE", "RELIANCE", Mode::Quote), "NSE_RELIANCE_QUOTE");
    }

    #[test]
    fn ltp_tick_serializes_without_quote_fields() {
        let tick = CanonicalTick {
            symbol: "INFY".to_string(),
            exchange: "NSE".to_string(),
            mode: Mode::Ltp,
            ltp: 1500.5,
            timestamp: 1_700_000_000_000,
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

        let json = serde_json::to_value(&tick).unwrap();
        assert_eq!(json["mode"], "LTP");
        assert_eq!(json["ltp"], 1500.5);
        assert!(json.get("open").is_none());
        assert!(json.get("depth").is_none());
        assert_eq!(tick.broker_topic("zerodha"), "zerodha_NSE_INFY_LTP");
    }
}
