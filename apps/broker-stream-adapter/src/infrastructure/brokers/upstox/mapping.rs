//! Upstox exchange segments and feed modes.

use crate::domain::streaming::price::{CURRENCY_DECIMALS, DEFAULT_DECIMALS};
use crate::domain::streaming::{Exchange, Mode};

/// Segment used for unknown canonical codes.
pub const DEFAULT_EXCHANGE: &str = "NSE_EQ";

/// Upstox segment for a canonical exchange code.
#[must_use]
pub fn exchange_code(exchange: &str) -> &'static str {
    match Exchange::parse(exchange) {
        Some(Exchange::Nse) | None => DEFAULT_EXCHANGE,
        Some(Exchange::Bse) => "BSE_EQ",
        Some(Exchange::Nfo) => "NSE_FO",
        Some(Exchange::Bfo) => "BSE_FO",
        Some(Exchange::Mcx) => "MCX_FO",
        Some(Exchange::Cds) => "NCD_FO",
        Some(Exchange::Bcd) => "BCD_FO",
        Some(Exchange::NseIndex) => "NSE_INDEX",
        Some(Exchange::BseIndex) => "BSE_INDEX",
        Some(Exchange::McxIndex) => "MCX_INDEX",
    }
}

/// Feed mode name: LTP uses `ltpc`, quote and depth share `full`.
#[must_use]
pub const fn mode_name(mode: Mode) -> &'static str {
    match mode {
        Mode::Ltp => "ltpc",
        Mode::Quote | Mode::Depth => "full",
    }
}

/// Decimals kept for prices in a segment.
#[must_use]
pub fn decimals(segment: &str) -> u32 {
    match segment {
        "NCD_FO" | "BCD_FO" => CURRENCY_DECIMALS,
        _ => DEFAULT_DECIMALS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("NSE", "NSE_EQ")]
    #[test_case("NFO", "NSE_FO")]
    #[test_case("CDS", "NCD_FO")]
    #[test_case("NSE_INDEX", "NSE_INDEX")]
    #[test_case("mcx", "MCX_FO")]
    #[test_case("LSE", "NSE_EQ" ; "unknown falls back")]
    fn exchange_codes(canonical: &str, expected: &str) {
        assert_eq!(exchange_code(canonical), expected);
    }

    #[test_case(Mode::Ltp, "ltpc")]
    #[test_case(Mode::Quote, "full")]
    #[test_case(Mode::Depth, "full")]
    fn modes(mode: Mode, expected: &str) {
        assert_eq!(mode_name(mode), expected);
    }

    #[test]
    fn currency_decimals() {
        assert_eq!(decimals("NCD_FO"), 4);
        assert_eq!(decimals("NSE_EQ"), 2);
    }
}
