//! SmartStream exchange types, modes and depth capability.

use crate::domain::streaming::price::{CURRENCY_DECIMALS, DEFAULT_DECIMALS};
use crate::domain::streaming::{Exchange, Mode};

/// Exchange used for unknown canonical codes.
pub const DEFAULT_EXCHANGE: &str = "nse_cm";

/// Depth level served by the dedicated 20-level mode.
pub const DEPTH_20: u8 = 20;

/// SmartStream exchange name for a canonical exchange code.
#[must_use]
pub fn exchange_code(exchange: &str) -> &'static str {
    match Exchange::parse(exchange) {
        Some(Exchange::Nse | Exchange::NseIndex) | None => DEFAULT_EXCHANGE,
        Some(Exchange::Nfo) => "nse_fo",
        Some(Exchange::Bse | Exchange::BseIndex) => "bse_cm",
        Some(Exchange::Bfo | Exchange::Bcd) => "bse_fo",
        Some(Exchange::Mcx | Exchange::McxIndex) => "mcx_fo",
        Some(Exchange::Cds) => "cde_fo",
    }
}

/// Numeric exchange type used in subscription requests and packets.
#[must_use]
pub fn exchange_type(code: &str) -> Option<u8> {
    match code {
        "nse_cm" => Some(1),
        "nse_fo" => Some(2),
        "bse_cm" => Some(3),
        "bse_fo" => Some(4),
        "mcx_fo" => Some(5),
        "ncx_fo" => Some(7),
        "cde_fo" => Some(13),
        _ => None,
    }
}

/// Exchange name for a packet's exchange type byte.
#[must_use]
pub const fn exchange_name(kind: u8) -> Option<&'static str> {
    match kind {
        1 => Some("nse_cm"),
        2 => Some("nse_fo"),
        3 => Some("bse_cm"),
        4 => Some("bse_fo"),
        5 => Some("mcx_fo"),
        7 => Some("ncx_fo"),
        13 => Some("cde_fo"),
        _ => None,
    }
}

/// SmartStream subscription mode: 1 LTP, 2 quote, 3 snap quote, 4 depth 20.
#[must_use]
pub const fn mode_code(mode: Mode, depth: u8) -> u8 {
    match mode {
        Mode::Ltp => 1,
        Mode::Quote => 2,
        Mode::Depth if depth >= DEPTH_20 => 4,
        Mode::Depth => 3,
    }
}

/// Depth levels available for a canonical exchange.
#[must_use]
pub fn supported_depths(exchange: &str) -> &'static [u8] {
    match Exchange::parse(exchange) {
        Some(Exchange::Nse | Exchange::Nfo) => &[5, DEPTH_20],
        _ => &[5],
    }
}

/// Fixed-point divisor and kept decimals for an exchange type.
#[must_use]
pub const fn price_scale(kind: u8) -> (i64, u32) {
    match kind {
        13 => (10_000_000, CURRENCY_DECIMALS),
        _ => (100, DEFAULT_DECIMALS),
    }
}
