//! Price scaling.
//!
//! Brokers send prices as paise, fixed-point integers or single precision
//! floats. Everything is converted through `Decimal` so the published value
//! is the exact rounded rupee amount rather than a binary float artefact.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Decimals kept for equity and derivative prices.
pub const DEFAULT_DECIMALS: u32 = 2;

/// Decimals kept for currency derivatives.
pub const CURRENCY_DECIMALS: u32 = 4;

/// Divide a fixed-point integer by `divisor` and round to `decimals`.
///
/// A zero divisor yields `0.0`.
#[must_use]
pub fn scale(raw: i64, divisor: i64, decimals: u32) -> f64 {
    if divisor == 0 {
        return 0.0;
    }
    let value = Decimal::from(raw) / Decimal::from(divisor);
    to_f64(value, decimals)
}

/// Convert paise to rupees with two decimals.
#[must_use]
pub fn from_paise(raw: i64) -> f64 {
    scale(raw, 100, DEFAULT_DECIMALS)
}

/// Round a float price to `decimals`. Non-finite input becomes `0.0`.
#[must_use]
pub fn round(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    Decimal::from_f64(value).map_or(value, |d| to_f64(d, decimals))
}

fn to_f64(value: Decimal, decimals: u32) -> f64 {
    value
        .round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
        .to_f64()
        .unwrap_or(0.0)
}
