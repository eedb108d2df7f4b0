//! Dhan exchange segments and request codes.

use crate::domain::streaming::price::{CURRENCY_DECIMALS, DEFAULT_DECIMALS};
use crate::domain::streaming::{Exchange, Mode};

/// Segment used for unknown canonical codes.
pub const DEFAULT_EXCHANGE: &str = "NSE_EQ";

/// Dhan exchange segment for a canonical exchange code.
#[must_use]
pub fn exchange_code(exchange: &str) -> &'static str {
    match Exchange::parse(exchange) {
        Some(Exchange::Nse) | None => DEFAULT_EXCHANGE,
        Some(Exchange::Bse) => "BSE_EQ",
        Some(Exchange::Nfo) => "NSE_FNO",
        Some(Exchange::Bfo) => "BSE_FNO",
        Some(Exchange::Mcx) => "MCX_COMM",
        Some(Exchange::Cds) => "NSE_CURRENCY",
        Some(Exchange::Bcd) => "BSE_CURRENCY",
        Some(Exchange::NseIndex | Exchange::BseIndex | Exchange::McxIndex) => "IDX_I",
    }
}

/// Segment name for the numeric code in a packet header.
#[must_use]
pub const fn segment_name(code: u8) -> Option<&'static str> {
    match code {
        0 => Some("IDX_I"),
        1 => Some("NSE_EQ"),
        2 => Some("NSE_FNO"),
        3 => Some("NSE_CURRENCY"),
        4 => Some("BSE_EQ"),
        5 => Some("MCX_COMM"),
        7 => Some("BSE_CURRENCY"),
        8 => Some("BSE_FNO"),
        _ => None,
    }
}

/// Decimals kept for prices in a segment.
#[must_use]
pub const fn decimals(segment_code: u8) -> u32 {
    match segment_code {
        3 | 7 => CURRENCY_DECIMALS,
        _ => DEFAULT_DECIMALS,
    }
}

/// Request codes to start and stop a mode: ticker, quote, full.
#[must_use]
pub const fn request_codes(mode: Mode) -> (u8, u8) {
    match mode {
        Mode::Ltp => (15, 16),
        Mode::Quote => (17, 18),
        Mode::Depth => (21, 22),
    }
}
