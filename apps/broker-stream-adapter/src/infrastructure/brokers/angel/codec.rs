//! SmartStream v2 frame decoding.
//!
//! Binary packets are little-endian. Modes 1-3 share a 51-byte prefix:
//!
//! | Offset | Field                                   |
//! |--------|-----------------------------------------|
//! | 0      | subscription mode                       |
//! | 1      | exchange type                           |
//! | 2..27  | token, NUL padded ASCII                 |
//! | 27     | sequence number (i64)                   |
//! | 35     | exchange timestamp, ms (i64)            |
//! | 43     | last traded price (i64, fixed point)    |
//!
//! Quote packets (123 bytes) add quantity, average, volume, totals and OHLC;
//! snap quotes (379 bytes) add OI and five 20-byte depth entries at 147.
//! Depth-20 packets (mode 4, 443 bytes) carry the exchange timestamp at 27
//! and twenty 10-byte levels per side from 43.

use serde::Deserialize;

use super::mapping::{exchange_name, price_scale};
use crate::domain::streaming::price;
use crate::domain::streaming::{DepthLevel, DepthUpdate};
use crate::infrastructure::brokers::codec::{
    CodecError, ensure_len, float_qty, le_f64, le_i16, le_i32, le_i64, u8_at,
};

const LTP_LEN: usize = 51;
const QUOTE_LEN: usize = 123;
const SNAP_QUOTE_LEN: usize = 379;
const DEPTH_20_LEN: usize = 443;

const BEST_FIVE_OFFSET: usize = 147;
const BEST_FIVE_ENTRY: usize = 20;
const DEPTH_20_OFFSET: usize = 43;
const DEPTH_20_ENTRY: usize = 10;
const DEPTH_20_LEVELS: usize = 20;

/// Decoded SmartStream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum AngelFrame {
    /// Reply to our text `ping`.
    Pong,
    /// Market data packet.
    Tick(AngelPacket),
    /// Error reply to a request.
    Error {
        /// Broker error code.
        code: String,
        /// Broker message.
        message: String,
    },
}

/// One binary packet, prices in rupees.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AngelPacket {
    /// Subscription mode the packet was sent for.
    pub mode: u8,
    /// Exchange name.
    pub exchange: &'static str,
    /// Instrument token.
    pub token: String,
    /// Exchange timestamp, epoch ms.
    pub exchange_timestamp: i64,
    /// Last traded price (absent in depth-20 packets).
    pub ltp: Option<f64>,
    /// Last traded quantity.
    pub ltq: Option<i64>,
    /// Average traded price.
    pub average_price: Option<f64>,
    /// Day volume.
    pub volume: Option<i64>,
    /// Total buy quantity.
    pub total_buy_qty: Option<i64>,
    /// Total sell quantity.
    pub total_sell_qty: Option<i64>,
    /// Day open.
    pub open: Option<f64>,
    /// Day high.
    pub high: Option<f64>,
    /// Day low.
    pub low: Option<f64>,
    /// Previous close.
    pub close: Option<f64>,
    /// Open interest.
    pub oi: Option<i64>,
    /// Order book.
    pub depth: Option<DepthUpdate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorReply {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    error_message: String,
}

/// Decode a text frame: `pong` or a JSON error reply.
///
/// # Errors
///
/// Fails on anything else.
pub fn decode_text(text: &str) -> Result<Vec<AngelFrame>, CodecError> {
    if text.trim().eq_ignore_ascii_case("pong") {
        return Ok(vec![AngelFrame::Pong]);
    }
    let reply: ErrorReply = serde_json::from_str(text)?;
    Ok(vec![AngelFrame::Error {
        code: reply.error_code,
        message: reply.error_message,
    }])
}

/// Decode one binary packet.
///
/// # Errors
///
/// Fails on truncated packets, unknown modes and unknown exchange types.
pub fn decode_binary(buf: &[u8]) -> Result<Vec<AngelFrame>, CodecError> {
    let mode = u8_at(buf, 0)?;
    let kind = u8_at(buf, 1)?;
    let exchange = exchange_name(kind)
        .ok_or_else(|| CodecError::InvalidFormat(format!("unknown exchange type {kind}")))?;
    let (divisor, decimals) = price_scale(kind);
    let price_at = |offset: usize| -> Result<f64, CodecError> {
        Ok(price::scale(le_i64(buf, offset)?, divisor, decimals))
    };

    ensure_len(buf, 27)?;
    let token = String::from_utf8_lossy(&buf[2..27])
        .trim_end_matches('\0')
        .trim()
        .to_string();
    let mut packet = AngelPacket {
        mode,
        exchange,
        token,
        ..AngelPacket::default()
    };

    if mode == 4 {
        ensure_len(buf, DEPTH_20_LEN)?;
        packet.exchange_timestamp = le_i64(buf, 27)?;
        packet.depth = Some(depth_20(buf, divisor, decimals)?);
        return Ok(vec![AngelFrame::Tick(packet)]);
    }

    let needed = match mode {
        1 => LTP_LEN,
        2 => QUOTE_LEN,
        3 => SNAP_QUOTE_LEN,
        other => return Err(CodecError::UnknownPacket(format!("mode {other}"))),
    };
    ensure_len(buf, needed)?;

    packet.exchange_timestamp = le_i64(buf, 35)?;
    packet.ltp = Some(price_at(43)?);

    if mode >= 2 {
        packet.ltq = Some(le_i64(buf, 51)?);
        packet.average_price = Some(price_at(59)?);
        packet.volume = Some(le_i64(buf, 67)?);
        packet.total_buy_qty = Some(float_qty(le_f64(buf, 75)?));
        packet.total_sell_qty = Some(float_qty(le_f64(buf, 83)?));
        packet.open = Some(price_at(91)?);
        packet.high = Some(price_at(99)?);
        packet.low = Some(price_at(107)?);
        packet.close = Some(price_at(115)?);
    }

    if mode == 3 {
        packet.oi = Some(le_i64(buf, 131)?);
        packet.depth = Some(best_five(buf, divisor, decimals)?);
    }

    Ok(vec![AngelFrame::Tick(packet)])
}

fn best_five(buf: &[u8], divisor: i64, decimals: u32) -> Result<DepthUpdate, CodecError> {
    let mut depth = DepthUpdate::default();
    for index in 0..10 {
        let base = BEST_FIVE_OFFSET + index * BEST_FIVE_ENTRY;
        let is_buy = le_i16(buf, base)? == 1;
        let level = DepthLevel::new(
            price::scale(le_i64(buf, base + 10)?, divisor, decimals),
            le_i64(buf, base + 2)?,
            i64::from(le_i16(buf, base + 18)?),
        );
        if is_buy {
            depth.buy.push(level.into());
        } else {
            depth.sell.push(level.into());
        }
    }
    Ok(depth)
}

fn depth_20(buf: &[u8], divisor: i64, decimals: u32) -> Result<DepthUpdate, CodecError> {
    let side = |start: usize| -> Result<Vec<DepthLevel>, CodecError> {
        (0..DEPTH_20_LEVELS)
            .map(|i| {
                let base = start + i * DEPTH_20_ENTRY;
                Ok(DepthLevel::new(
                    price::scale(i64::from(le_i32(buf, base + 4)?), divisor, decimals),
                    i64::from(le_i32(buf, base)?),
                    i64::from(le_i16(buf, base + 8)?),
                ))
            })
            .collect()
    };
    Ok(DepthUpdate::from_levels(
        side(DEPTH_20_OFFSET)?,
        side(DEPTH_20_OFFSET + DEPTH_20_LEVELS * DEPTH_20_ENTRY)?,
    ))
}
