//! Dhan v2 live feed decoding.
//!
//! Every packet starts with an 8-byte little-endian header: response code
//! (`u8`), packet length (`i16`, header included), exchange segment (`u8`)
//! and security id (`i32`). A frame may hold several packets back to back.
//! Prices are `f32` rupees.

use super::mapping::{decimals, segment_name};
use crate::domain::streaming::price;
use crate::domain::streaming::{DepthLevel, DepthUpdate};
use crate::infrastructure::brokers::codec::{
    CodecError, ensure_len, le_f32, le_i16, le_i32, u8_at,
};

const HEADER_LEN: usize = 8;

const TICKER: u8 = 2;
const QUOTE: u8 = 4;
const OI: u8 = 5;
const PREV_CLOSE: u8 = 6;
const MARKET_STATUS: u8 = 7;
const FULL: u8 = 8;
const DISCONNECT: u8 = 50;

const DEPTH_OFFSET: usize = 62;
const DEPTH_ENTRY: usize = 20;
const DEPTH_LEVELS: usize = 5;

/// Which packet a [`DhanPacket`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// LTP and trade time.
    Ticker,
    /// Quote without depth.
    Quote,
    /// Open interest only.
    OpenInterest,
    /// Previous close and previous OI.
    PrevClose,
    /// Quote, OI and five-level depth.
    Full,
}

impl PacketKind {
    /// Ticker, OI and previous-close packets only carry a few fields.
    #[must_use]
    pub const fn is_partial(self) -> bool {
        matches!(self, Self::Ticker | Self::OpenInterest | Self::PrevClose)
    }
}

/// Decoded Dhan frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DhanFrame {
    /// Market data packet.
    Tick(DhanPacket),
    /// Server is closing the connection.
    Disconnect(i16),
    /// Market status and other packets the feed does not use.
    Other(u8),
}

/// One market data packet, prices rounded to the segment's decimals.
#[derive(Debug, Clone, PartialEq)]
pub struct DhanPacket {
    /// Packet kind.
    pub kind: PacketKind,
    /// Exchange segment name.
    pub segment: &'static str,
    /// Security id.
    pub security_id: i32,
    /// Last traded price.
    pub ltp: Option<f64>,
    /// Last traded quantity.
    pub ltq: Option<i64>,
    /// Last trade time, epoch seconds.
    pub ltt: Option<i64>,
    /// Average traded price.
    pub average_price: Option<f64>,
    /// Day volume.
    pub volume: Option<i64>,
    /// Total sell quantity.
    pub total_sell_qty: Option<i64>,
    /// Total buy quantity.
    pub total_buy_qty: Option<i64>,
    /// Open interest.
    pub oi: Option<i64>,
    /// Day open.
    pub open: Option<f64>,
    /// Previous close.
    pub close: Option<f64>,
    /// Day high.
    pub high: Option<f64>,
    /// Day low.
    pub low: Option<f64>,
    /// Five levels per side, full packets only.
    pub depth: Option<DepthUpdate>,
}

impl DhanPacket {
    const fn new(kind: PacketKind, segment: &'static str, security_id: i32) -> Self {
        Self {
            kind,
            segment,
            security_id,
            ltp: None,
            ltq: None,
            ltt: None,
            average_price: None,
            volume: None,
            total_sell_qty: None,
            total_buy_qty: None,
            oi: None,
            open: None,
            close: None,
            high: None,
            low: None,
            depth: None,
        }
    }
}

/// Decode every packet in a binary frame.
///
/// # Errors
///
/// Fails on truncated packets, bad lengths and unknown segments.
pub fn decode(buf: &[u8]) -> Result<Vec<DhanFrame>, CodecError> {
    let mut frames = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        let rest = &buf[offset..];
        ensure_len(rest, HEADER_LEN)?;
        let len = usize::try_from(le_i16(rest, 1)?)
            .ok()
            .filter(|&len| len >= HEADER_LEN)
            .ok_or_else(|| CodecError::InvalidFormat("bad packet length".to_string()))?;
        ensure_len(rest, len)?;
        frames.push(decode_packet(&rest[..len])?);
        offset += len;
    }

    Ok(frames)
}

fn decode_packet(p: &[u8]) -> Result<DhanFrame, CodecError> {
    let code = u8_at(p, 0)?;
    let kind = match code {
        TICKER => PacketKind::Ticker,
        QUOTE => PacketKind::Quote,
        OI => PacketKind::OpenInterest,
        PREV_CLOSE => PacketKind::PrevClose,
        FULL => PacketKind::Full,
        DISCONNECT => return Ok(DhanFrame::Disconnect(le_i16(p, HEADER_LEN)?)),
        MARKET_STATUS => return Ok(DhanFrame::Other(code)),
        other => return Err(CodecError::UnknownPacket(format!("response code {other}"))),
    };

    let segment_code = u8_at(p, 3)?;
    let segment = segment_name(segment_code)
        .ok_or_else(|| CodecError::InvalidFormat(format!("unknown segment {segment_code}")))?;
    let places = decimals(segment_code);
    let price_at = |offset: usize| -> Result<f64, CodecError> {
        Ok(price::round(f64::from(le_f32(p, offset)?), places))
    };
    let int_at = |offset: usize| -> Result<i64, CodecError> { Ok(i64::from(le_i32(p, offset)?)) };

    let mut packet = DhanPacket::new(kind, segment, le_i32(p, 4)?);

    match kind {
        PacketKind::Ticker => {
            ensure_len(p, 16)?;
            packet.ltp = Some(price_at(8)?);
            packet.ltt = Some(int_at(12)?);
        }
        PacketKind::OpenInterest => {
            ensure_len(p, 12)?;
            packet.oi = Some(int_at(8)?);
        }
        PacketKind::PrevClose => {
            ensure_len(p, 16)?;
            packet.close = Some(price_at(8)?);
        }
        PacketKind::Quote => {
            ensure_len(p, 50)?;
            quote_fields(&mut packet, p, places)?;
            packet.open = Some(price_at(34)?);
            packet.close = Some(price_at(38)?);
            packet.high = Some(price_at(42)?);
            packet.low = Some(price_at(46)?);
        }
        PacketKind::Full => {
            ensure_len(p, DEPTH_OFFSET + DEPTH_LEVELS * DEPTH_ENTRY)?;
            quote_fields(&mut packet, p, places)?;
            packet.oi = Some(int_at(34)?);
            packet.open = Some(price_at(46)?);
            packet.close = Some(price_at(50)?);
            packet.high = Some(price_at(54)?);
            packet.low = Some(price_at(58)?);
            packet.depth = Some(depth(p, places)?);
        }
    }

    Ok(DhanFrame::Tick(packet))
}

/// Fields shared by quote and full packets, offsets 8 through 33.
fn quote_fields(packet: &mut DhanPacket, p: &[u8], places: u32) -> Result<(), CodecError> {
    packet.ltp = Some(price::round(f64::from(le_f32(p, 8)?), places));
    packet.ltq = Some(i64::from(le_i16(p, 12)?));
    packet.ltt = Some(i64::from(le_i32(p, 14)?));
    packet.average_price = Some(price::round(f64::from(le_f32(p, 18)?), places));
    packet.volume = Some(i64::from(le_i32(p, 22)?));
    packet.total_sell_qty = Some(i64::from(le_i32(p, 26)?));
    packet.total_buy_qty = Some(i64::from(le_i32(p, 30)?));
    Ok(())
}

fn depth(p: &[u8], places: u32) -> Result<DepthUpdate, CodecError> {
    let mut buy = Vec::with_capacity(DEPTH_LEVELS);
    let mut sell = Vec::with_capacity(DEPTH_LEVELS);
    for index in 0..DEPTH_LEVELS {
        let base = DEPTH_OFFSET + index * DEPTH_ENTRY;
        buy.push(DepthLevel::new(
            price::round(f64::from(le_f32(p, base + 12)?), places),
            i64::from(le_i32(p, base)?),
            i64::from(le_i16(p, base + 8)?),
        ));
        sell.push(DepthLevel::new(
            price::round(f64::from(le_f32(p, base + 16)?), places),
            i64::from(le_i32(p, base + 4)?),
            i64::from(le_i16(p, base + 10)?),
        ));
    }
    Ok(DepthUpdate::from_levels(buy, sell))
}
