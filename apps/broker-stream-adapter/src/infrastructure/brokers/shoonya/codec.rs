//! Noren JSON message decoding.
//!
//! Every message is an object with a `t` type. Numbers arrive as strings
//! (`"lp": "1500.50"`), and feed updates (`tf`, `df`) only carry the fields
//! that changed since the acknowledgement (`tk`, `dk`).

use serde_json::{Map, Value};

use crate::domain::streaming::{DepthUpdate, LevelUpdate, TickFields};
use crate::infrastructure::brokers::codec::{CodecError, float_qty};

const DEPTH_LEVELS: usize = 5;

/// Decoded Noren message.
#[derive(Debug, Clone, PartialEq)]
pub enum ShoonyaFrame {
    /// Reply to the connect request.
    ConnectAck {
        /// Session accepted.
        ok: bool,
        /// Server status text.
        detail: String,
    },
    /// Touchline or depth data.
    Tick(ShoonyaTick),
    /// Order updates and other messages the feed does not use.
    Other(String),
}

/// One touchline or depth message.
#[derive(Debug, Clone, PartialEq)]
pub struct ShoonyaTick {
    /// `tk`/`dk` acknowledgements are snapshots; `tf`/`df` are diffs.
    pub partial: bool,
    /// Noren exchange.
    pub exchange: String,
    /// Instrument token.
    pub token: String,
    /// Scalar fields present in the message.
    pub fields: TickFields,
    /// Levels in the message; fields the message left out are `None`.
    pub depth: Option<DepthUpdate>,
}

/// Decode one text message.
///
/// # Errors
///
/// Fails on invalid JSON, non-object messages and ticks without a token.
pub fn decode(text: &str) -> Result<Vec<ShoonyaFrame>, CodecError> {
    let message: Map<String, Value> = serde_json::from_str(text)?;
    let kind = string(&message, "t").unwrap_or_default();

    let frame = match kind.as_str() {
        "ck" => ShoonyaFrame::ConnectAck {
            ok: string(&message, "s").is_some_and(|s| s.eq_ignore_ascii_case("OK")),
            detail: string(&message, "s").unwrap_or_default(),
        },
        "tk" | "dk" => ShoonyaFrame::Tick(tick(&message, false, kind == "dk")?),
        "tf" | "df" => ShoonyaFrame::Tick(tick(&message, true, kind == "df")?),
        _ => ShoonyaFrame::Other(kind),
    };
    Ok(vec![frame])
}

fn tick(
    message: &Map<String, Value>,
    partial: bool,
    with_depth: bool,
) -> Result<ShoonyaTick, CodecError> {
    let token = string(message, "tk")
        .ok_or_else(|| CodecError::InvalidFormat("tick without token".to_string()))?;
    let exchange = string(message, "e").unwrap_or_default();

    let fields = TickFields {
        ltp: number(message, "lp"),
        ltq: quantity(message, "ltq"),
        average_price: number(message, "ap"),
        open: number(message, "o"),
        high: number(message, "h"),
        low: number(message, "l"),
        close: number(message, "c"),
        volume: quantity(message, "v"),
        oi: quantity(message, "oi"),
        bid: number(message, "bp1"),
        ask: number(message, "sp1"),
        total_buy_qty: quantity(message, "tbq"),
        total_sell_qty: quantity(message, "tsq"),
        timestamp: quantity(message, "ft").filter(|ts| *ts > 0).map(|ts| ts * 1000),
    };

    let depth = with_depth.then(|| DepthUpdate {
        buy: levels(message, "bp", "bq", "bo"),
        sell: levels(message, "sp", "sq", "so"),
    });

    Ok(ShoonyaTick {
        partial,
        exchange,
        token,
        fields,
        depth,
    })
}

fn levels(
    message: &Map<String, Value>,
    price: &str,
    qty: &str,
    orders: &str,
) -> Vec<LevelUpdate> {
    (1..=DEPTH_LEVELS)
        .map(|n| LevelUpdate {
            price: number(message, &format!("{price}{n}")),
            quantity: quantity(message, &format!("{qty}{n}")),
            orders: quantity(message, &format!("{orders}{n}")),
        })
        .collect()
}

fn string(message: &Map<String, Value>, key: &str) -> Option<String> {
    match message.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(message: &Map<String, Value>, key: &str) -> Option<f64> {
    let value = match message.get(key)? {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}

fn quantity(message: &Map<String, Value>, key: &str) -> Option<i64> {
    number(message, key).map(float_qty)
}
