//! Kite exchange, segment and mode tables.

use crate::domain::streaming::price::{CURRENCY_DECIMALS, DEFAULT_DECIMALS};
use crate::domain::streaming::{Exchange, Mode};

/// Exchange used for unknown canonical codes.
pub const DEFAULT_EXCHANGE: &str = "NSE";

/// Kite exchange for a canonical exchange code.
#[must_use]
pub fn exchange_code(exchange: &str) -> &'static str {
    match Exchange::parse(exchange) {
        Some(Exchange::Nse | Exchange::NseIndex) => "NSE",
        Some(Exchange::Bse | Exchange::BseIndex) => "BSE",
        Some(Exchange::Nfo) => "NFO",
        Some(Exchange::Bfo) => "BFO",
        Some(Exchange::Mcx | Exchange::McxIndex) => "MCX",
        Some(Exchange::Cds) => "CDS",
        Some(Exchange::Bcd) => "BCD",
        None => DEFAULT_EXCHANGE,
    }
}

/// Segment encoded in the low byte of an instrument token.
#[must_use]
pub const fn segment_of(token: u32) -> &'static str {
    match token & 0xff {
        1 => "NSE",
        2 => "NFO",
        3 => "CDS",
        4 => "BSE",
        5 => "BFO",
        6 => "BCD",
        7 => "MCX",
        8 => "MCXSX",
        9 => "INDICES",
        _ => "UNKNOWN",
    }
}

/// Fixed-point divisor and kept decimals for prices of a token.
#[must_use]
pub const fn price_scale(token: u32) -> (i64, u32) {
    match token & 0xff {
        3 => (10_000_000, CURRENCY_DECIMALS),
        6 => (10_000, CURRENCY_DECIMALS),
        _ => (100, DEFAULT_DECIMALS),
    }
}

/// Kite streaming mode.
#[must_use]
pub const fn mode_name(mode: Mode) -> &'static str {
    match mode {
        Mode::Ltp => "ltp",
        Mode::Quote => "quote",
        Mode::Depth => "full",
    }
}
