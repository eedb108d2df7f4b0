//! Upstox Market Data Feed (v3)
//!
//! Authenticates with a bearer token on the upgrade request. Control requests
//! are JSON sent in binary frames; ticks are protobuf. Instruments are
//! addressed by key (`NSE_EQ|INE002A01018`), which the adapter stores split
//! into segment and identifier. Quote and depth subscribers share the `full`
//! feed.

pub mod codec;
pub mod mapping;
pub mod proto;

use serde_json::json;

use self::codec::{UpstoxFrame, UpstoxTick};
use super::codec::{CodecError, now_millis};
use super::protocol::{BrokerProtocol, Control, Inbound};
use crate::application::ports::{AdapterError, BrokerCredentials, RawFrame, WireEndpoint};
use crate::domain::streaming::{Mode, TickUpdate, UpdateKind};
use crate::domain::subscription::{BrokerInstrument, ModeLevel};

const WS_URL: &str = "wss://api.upstox.com/v3/feed/market-data-feed";

/// Upstox v3 feed protocol.
#[derive(Debug, Clone)]
pub struct UpstoxProtocol {
    access_token: String,
}

impl UpstoxProtocol {
    fn request(method: &str, mode: Mode, instruments: &[BrokerInstrument]) -> Vec<RawFrame> {
        if instruments.is_empty() {
            return Vec::new();
        }
        let keys: Vec<String> = instruments
            .iter()
            .map(|i| format!("{}|{}", i.broker_exchange, i.token))
            .collect();
        let body = json!({
            "guid": uuid::Uuid::new_v4().to_string(),
            "method": method,
            "data": {
                "mode": mapping::mode_name(mode),
                "instrumentKeys": keys,
            },
        });
        vec![RawFrame::Binary(body.to_string().into_bytes())]
    }

    fn tick(tick: UpstoxTick) -> TickUpdate {
        let kind = if tick.partial {
            UpdateKind::Partial
        } else {
            UpdateKind::Complete
        };
        let mut update = TickUpdate::new(BrokerInstrument::new(tick.segment, tick.token), kind);
        update.fields = tick.fields;
        if update.fields.timestamp.is_none() {
            update.fields.timestamp = Some(now_millis());
        }
        update.depth = tick.depth;
        update
    }
}

impl BrokerProtocol for UpstoxProtocol {
    const NAME: &'static str = "upstox";
    type Frame = UpstoxFrame;

    fn from_credentials(
        _user_id: &str,
        credentials: &BrokerCredentials,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            access_token: BrokerCredentials::require(&credentials.auth_token, "auth_token")?
                .to_string(),
        })
    }

    fn endpoint(&self) -> WireEndpoint {
        WireEndpoint::new(WS_URL)
            .with_header("Authorization", format!("Bearer {}", self.access_token))
            .with_header("Accept", "*/*")
    }

    fn broker_exchange(&self, exchange: &str) -> String {
        mapping::exchange_code(exchange).to_string()
    }

    /// Tokens that already are full instrument keys keep their own segment.
    fn instrument(&self, exchange: &str, token: &str) -> BrokerInstrument {
        match token.trim().split_once('|') {
            Some((segment, id)) => BrokerInstrument::new(segment, id),
            None => BrokerInstrument::new(self.broker_exchange(exchange), token.trim()),
        }
    }

    fn subscribe_frames(
        &self,
        (mode, _depth): ModeLevel,
        instruments: &[BrokerInstrument],
    ) -> Vec<RawFrame> {
        Self::request("sub", mode, instruments)
    }

    fn unsubscribe_frames(
        &self,
        (mode, _depth): ModeLevel,
        instruments: &[BrokerInstrument],
    ) -> Vec<RawFrame> {
        Self::request("unsub", mode, instruments)
    }

    fn downgrade_frames(
        &self,
        (released, _): ModeLevel,
        (remaining, _): ModeLevel,
        instrument: &BrokerInstrument,
    ) -> Vec<RawFrame> {
        if mapping::mode_name(released) == mapping::mode_name(remaining) {
            return Vec::new();
        }
        Self::request("change_mode", remaining, std::slice::from_ref(instrument))
    }

    fn decode(&self, frame: &RawFrame) -> Result<Vec<UpstoxFrame>, CodecError> {
        match frame {
            RawFrame::Binary(buf) => codec::decode_binary(buf),
            RawFrame::Text(text) => Ok(vec![UpstoxFrame::Notice(text.clone())]),
        }
    }

    fn normalize(&self, frame: UpstoxFrame) -> Inbound {
        match frame {
            UpstoxFrame::Tick(tick) => Inbound::Tick(Self::tick(tick)),
            UpstoxFrame::Notice(text) => Inbound::Control(Control::Ack(text)),
            UpstoxFrame::MarketInfo => Inbound::Ignore,
        }
    }
}
