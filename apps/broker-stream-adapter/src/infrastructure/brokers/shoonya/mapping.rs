//! Noren exchange codes and feed kinds.

use crate::domain::streaming::{Exchange, Mode};

/// Exchange used for unknown canonical codes.
pub const DEFAULT_EXCHANGE: &str = "NSE";

/// Noren exchange for a canonical exchange code.
#[must_use]
pub fn exchange_code(exchange: &str) -> &'static str {
    match Exchange::parse(exchange) {
        Some(Exchange::Nse | Exchange::NseIndex) | None => DEFAULT_EXCHANGE,
        Some(Exchange::Bse | Exchange::BseIndex) => "BSE",
        Some(Exchange::Nfo) => "NFO",
        Some(Exchange::Bfo) => "BFO",
        Some(Exchange::Mcx | Exchange::McxIndex) => "MCX",
        Some(Exchange::Cds) => "CDS",
        Some(Exchange::Bcd) => "BCD",
    }
}

/// Noren streams LTP and quote data on the touchline feed and everything on
/// the depth feed.
#[must_use]
pub const fn uses_depth_feed(mode: Mode) -> bool {
    matches!(mode, Mode::Depth)
}

/// Request type that starts the feed for a mode.
#[must_use]
pub const fn subscribe_type(mode: Mode) -> &'static str {
    if uses_depth_feed(mode) { "d" } else { "t" }
}

/// Request type that stops the feed for a mode.
#[must_use]
pub const fn unsubscribe_type(mode: Mode) -> &'static str {
    if uses_depth_feed(mode) { "ud" } else { "u" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("NSE", "NSE")]
    #[test_case("NSE_INDEX", "NSE")]
    #[test_case("BSE_INDEX", "BSE")]
    #[test_case("MCX_INDEX", "MCX")]
    #[test_case("CDS", "CDS")]
    #[test_case("", "NSE" ; "empty falls back")]
    fn exchange_codes(canonical: &str, expected: &str) {
        assert_eq!(exchange_code(canonical), expected);
    }

    #[test_case(Mode::Ltp, "t", "u")]
    #[test_case(Mode::Quote, "t", "u")]
    #[test_case(Mode::Depth, "d", "ud")]
    fn feed_types(mode: Mode, subscribe: &str, unsubscribe: &str) {
        assert_eq!(subscribe_type(mode), subscribe);
        assert_eq!(unsubscribe_type(mode), unsubscribe);
    }
}
