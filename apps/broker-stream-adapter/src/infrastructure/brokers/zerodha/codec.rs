//! Kite ticker frame decoding.
//!
//! Binary frames carry a big-endian `i16` packet count, then for each packet
//! an `i16` length followed by the packet. The packet length selects the
//! layout:
//!
//! | Length | Layout                                              |
//! |--------|-----------------------------------------------------|
//! | 8      | token, LTP                                          |
//! | 28     | index quote: token, LTP, high, low, open, close, change |
//! | 32     | index full: index quote plus exchange timestamp      |
//! | 44     | quote: LTP, LTQ, average, volume, totals, OHLC       |
//! | 184    | full: quote plus OI, timestamps and 5+5 depth levels |
//!
//! A one-byte binary frame is the server heartbeat. Text frames are JSON
//! notices (`error`, `message`, `order`).

use serde::Deserialize;

use super::mapping::{price_scale, segment_of};
use crate::domain::streaming::price;
use crate::domain::streaming::{DepthLevel, DepthUpdate};
use crate::infrastructure::brokers::codec::{
    CodecError, be_i16, be_i32, be_u32, ensure_len,
};

const DEPTH_OFFSET: usize = 64;
const DEPTH_ENTRY: usize = 12;
const DEPTH_PER_SIDE: usize = 5;

/// Decoded Kite frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ZerodhaFrame {
    /// Server heartbeat.
    Heartbeat,
    /// Market data packet.
    Tick(KitePacket),
    /// Error notice.
    Error(String),
    /// Informational notice.
    Message(String),
    /// Order postback or other text the feed does not use.
    Other,
}

/// One binary market data packet, prices already in rupees.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KitePacket {
    /// Instrument token.
    pub token: u32,
    /// Segment name from the token's low byte.
    pub segment: &'static str,
    /// Last traded price.
    pub last_price: f64,
    /// Last traded quantity.
    pub last_quantity: Option<i64>,
    /// Average traded price.
    pub average_price: Option<f64>,
    /// Day volume.
    pub volume: Option<i64>,
    /// Total pending buy quantity.
    pub total_buy_quantity: Option<i64>,
    /// Total pending sell quantity.
    pub total_sell_quantity: Option<i64>,
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
    /// Exchange timestamp, epoch seconds.
    pub exchange_timestamp: Option<i64>,
    /// Five levels per side, full mode only.
    pub depth: Option<DepthUpdate>,
}

#[derive(Debug, Deserialize)]
struct TextNotice {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Decode a binary frame.
///
/// # Errors
///
/// Fails on truncated frames and unknown packet lengths.
pub fn decode_binary(buf: &[u8]) -> Result<Vec<ZerodhaFrame>, CodecError> {
    if buf.len() < 2 {
        return Ok(vec![ZerodhaFrame::Heartbeat]);
    }

    let count = usize::try_from(be_i16(buf, 0)?)
        .map_err(|_| CodecError::InvalidFormat("negative packet count".to_string()))?;
    let mut frames = Vec::with_capacity(count);
    let mut offset = 2;

    for _ in 0..count {
        let len = usize::try_from(be_i16(buf, offset)?)
            .map_err(|_| CodecError::InvalidFormat("negative packet length".to_string()))?;
        offset += 2;
        ensure_len(buf, offset + len)?;
        frames.push(ZerodhaFrame::Tick(decode_packet(&buf[offset..offset + len])?));
        offset += len;
    }

    Ok(frames)
}

/// Decode a text frame.
///
/// # Errors
///
/// Fails when the text is not a JSON notice.
pub fn decode_text(text: &str) -> Result<Vec<ZerodhaFrame>, CodecError> {
    let notice: TextNotice = serde_json::from_str(text)?;
    let detail = match notice.data {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    };
    let frame = match notice.kind.as_str() {
        "error" => ZerodhaFrame::Error(detail),
        "message" => ZerodhaFrame::Message(detail),
        _ => ZerodhaFrame::Other,
    };
    Ok(vec![frame])
}

fn decode_packet(p: &[u8]) -> Result<KitePacket, CodecError> {
    let token = be_u32(p, 0)?;
    let (divisor, decimals) = price_scale(token);
    let price_at = |offset: usize| -> Result<f64, CodecError> {
        Ok(price::scale(i64::from(be_i32(p, offset)?), divisor, decimals))
    };
    let int_at = |offset: usize| -> Result<i64, CodecError> { Ok(i64::from(be_i32(p, offset)?)) };

    let mut packet = KitePacket {
        token,
        segment: segment_of(token),
        last_price: price_at(4)?,
        ..KitePacket::default()
    };

    match p.len() {
        8 => {}
        28 | 32 => {
            packet.high = Some(price_at(8)?);
            packet.low = Some(price_at(12)?);
            packet.open = Some(price_at(16)?);
            packet.close = Some(price_at(20)?);
            if p.len() == 32 {
                packet.exchange_timestamp = Some(int_at(28)?);
            }
        }
        44 | 184 => {
            packet.last_quantity = Some(int_at(8)?);
            packet.average_price = Some(price_at(12)?);
            packet.volume = Some(int_at(16)?);
            packet.total_buy_quantity = Some(int_at(20)?);
            packet.total_sell_quantity = Some(int_at(24)?);
            packet.open = Some(price_at(28)?);
            packet.high = Some(price_at(32)?);
            packet.low = Some(price_at(36)?);
            packet.close = Some(price_at(40)?);
            if p.len() == 184 {
                packet.oi = Some(int_at(48)?);
                packet.exchange_timestamp = Some(int_at(60)?);
                packet.depth = Some(decode_depth(p, divisor, decimals)?);
            }
        }
        other => return Err(CodecError::UnknownPacket(format!("{other}-byte packet"))),
    }

    Ok(packet)
}

fn decode_depth(p: &[u8], divisor: i64, decimals: u32) -> Result<DepthUpdate, CodecError> {
    let mut depth = DepthUpdate::default();
    for index in 0..DEPTH_PER_SIDE * 2 {
        let base = DEPTH_OFFSET + index * DEPTH_ENTRY;
        let level = DepthLevel::new(
            price::scale(i64::from(be_i32(p, base + 4)?), divisor, decimals),
            i64::from(be_i32(p, base)?),
            i64::from(be_i16(p, base + 8)?),
        );
        if index < DEPTH_PER_SIDE {
            depth.buy.push(level.into());
        } else {
            depth.sell.push(level.into());
        }
    }
    Ok(depth)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Frame with one packet.
    pub(crate) fn frame(packet: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&1_i16.to_be_bytes());
        out.extend_from_slice(&i16::try_from(packet.len()).unwrap().to_be_bytes());
        out.extend_from_slice(packet);
        out
    }

    pub(crate) fn ltp_packet(token: u32, ltp: i32) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&token.to_be_bytes());
        p.extend_from_slice(&ltp.to_be_bytes());
        p
    }

    fn put(p: &mut [u8], offset: usize, value: i32) {
        p[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn full_packet(token: u32) -> Vec<u8> {
        let mut p = vec![0_u8; 184];
        put(&mut p, 0, i32::try_from(token).unwrap());
        put(&mut p, 4, 150_050); // ltp
        put(&mut p, 8, 25); // ltq
        put(&mut p, 12, 149_990); // avg
        put(&mut p, 16, 1_000_000); // volume
        put(&mut p, 20, 5_000); // total buy
        put(&mut p, 24, 6_000); // total sell
        put(&mut p, 28, 149_000); // open
        put(&mut p, 32, 151_000); // high
        put(&mut p, 36, 148_500); // low
        put(&mut p, 40, 149_500); // close
        put(&mut p, 48, 42); // oi
        put(&mut p, 60, 1_700_000_000); // exchange ts
        for level in 0..10_i32 {
            let base = DEPTH_OFFSET + usize::try_from(level).unwrap() * DEPTH_ENTRY;
            put(&mut p, base, 100 + level);
            put(&mut p, base + 4, 150_000 + level * 5);
            p[base + 8..base + 10].copy_from_slice(&3_i16.to_be_bytes());
        }
        p
    }

    #[test]
    fn ltp_packet_converts_paise() {
        let frames = decode_binary(&frame(&ltp_packet(408_065, 150_050))).unwrap();

        let [ZerodhaFrame::Tick(packet)] = frames.as_slice() else {
            panic!("expected one tick, got {frames:?}");
        };
        assert_eq!(packet.token, 408_065);
        assert_eq!(packet.segment, "NSE");
        assert_eq!(packet.last_price, 1500.50);
        assert!(packet.open.is_none());
    }

    #[test]
    fn currency_packet_keeps_four_decimals() {
        let token = 0x0000_1203;
        let frames = decode_binary(&frame(&ltp_packet(token, 835_012_500))).unwrap();

        let [ZerodhaFrame::Tick(packet)] = frames.as_slice() else {
            panic!("expected one tick");
        };
        assert!((packet.last_price - 83.5013).abs() < 1e-9);
    }

    #[test]
    fn full_packet_carries_depth() {
        let frames = decode_binary(&frame(&full_packet(408_065))).unwrap();

        let [ZerodhaFrame::Tick(packet)] = frames.as_slice() else {
            panic!("expected one tick");
        };
        assert_eq!(packet.volume, Some(1_000_000));
        assert_eq!(packet.close, Some(1495.0));
        assert_eq!(packet.oi, Some(42));
        assert_eq!(packet.exchange_timestamp, Some(1_700_000_000));
        let depth = packet.depth.as_ref().unwrap();
        assert_eq!(depth.buy.len(), 5);
        assert_eq!(depth.sell.len(), 5);
        assert_eq!(depth.buy[0], DepthLevel::new(1500.0, 100, 3));
        assert_eq!(depth.sell[0], DepthLevel::new(1500.25, 105, 3));
    }

    #[test]
    fn multiple_packets_in_one_frame() {
        let a = ltp_packet(408_065, 100);
        let b = ltp_packet(256_265, 200);
        let mut buf = 2_i16.to_be_bytes().to_vec();
        for p in [&a, &b] {
            buf.extend_from_slice(&8_i16.to_be_bytes());
            buf.extend_from_slice(p);
        }

        assert_eq!(decode_binary(&buf).unwrap().len(), 2);
    }

    #[test]
    fn one_byte_frame_is_heartbeat() {
        assert_eq!(decode_binary(&[0]).unwrap(), vec![ZerodhaFrame::Heartbeat]);
    }

    #[test]
    fn truncated_frame_fails() {
        let mut buf = frame(&ltp_packet(408_065, 100));
        buf.truncate(buf.len() - 3);
        assert!(matches!(
            decode_binary(&buf),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn unknown_length_fails() {
        assert!(matches!(
            decode_binary(&frame(&[0_u8; 12])),
            Err(CodecError::UnknownPacket(_))
        ));
    }

    #[test]
    fn text_notices() {
        assert_eq!(
            decode_text(r#"{"type":"error","data":"Invalid token"}"#).unwrap(),
            vec![ZerodhaFrame::Error("Invalid token".to_string())]
        );
        assert_eq!(
            decode_text(r#"{"type":"order","data":{"order_id":"1"}}"#).unwrap(),
            vec![ZerodhaFrame::Other]
        );
        assert!(decode_text("not json").is_err());
    }
}
