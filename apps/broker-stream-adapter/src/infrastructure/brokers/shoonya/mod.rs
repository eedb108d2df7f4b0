//! Shoonya (Noren) WebSocket
//!
//! JSON both ways. The session is authenticated by a connect message sent
//! right after the socket opens; the server answers with `ck`. LTP and quote
//! subscribers share the touchline feed, depth subscribers use the depth
//! feed. The server never answers heartbeats, so silence is not treated as a
//! dead socket.

pub mod codec;
pub mod mapping;

use serde_json::json;

use self::codec::{ShoonyaFrame, ShoonyaTick};
use super::codec::{CodecError, now_millis};
use super::protocol::{BrokerProtocol, Control, Inbound};
use crate::application::ports::{
    AdapterError, BrokerCredentials, HeartbeatSpec, PingPayload, RawFrame, WireEndpoint,
};
use crate::domain::streaming::{Mode, TickUpdate, UpdateKind};
use crate::domain::subscription::{BrokerInstrument, ModeLevel};
use crate::infrastructure::config::FeedSettings;

const WS_URL: &str = "wss://api.shoonya.com/NorenWSTP/";

/// Noren WebSocket protocol.
#[derive(Debug, Clone)]
pub struct ShoonyaProtocol {
    client_id: String,
    session_token: String,
}

impl ShoonyaProtocol {
    fn request(kind: &str, instruments: &[BrokerInstrument]) -> Vec<RawFrame> {
        if instruments.is_empty() {
            return Vec::new();
        }
        let keys = instruments
            .iter()
            .map(|i| format!("{}|{}", i.broker_exchange, i.token))
            .collect::<Vec<_>>()
            .join("#");
        vec![RawFrame::Text(json!({"t": kind, "k": keys}).to_string())]
    }

    fn tick(tick: ShoonyaTick) -> TickUpdate {
        let kind = if tick.partial {
            UpdateKind::Partial
        } else {
            UpdateKind::Complete
        };
        let mut update = TickUpdate::new(BrokerInstrument::new(tick.exchange, tick.token), kind);
        update.fields = tick.fields;
        if update.fields.timestamp.is_none() {
            update.fields.timestamp = Some(now_millis());
        }
        update.depth = tick.depth;
        update
    }
}

impl BrokerProtocol for ShoonyaProtocol {
    const NAME: &'static str = "shoonya";
    type Frame = ShoonyaFrame;

    fn from_credentials(
        _user_id: &str,
        credentials: &BrokerCredentials,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            client_id: BrokerCredentials::require(&credentials.client_id, "client_id")?
                .to_string(),
            session_token: BrokerCredentials::require(&credentials.auth_token, "auth_token")?
                .to_string(),
        })
    }

    fn endpoint(&self) -> WireEndpoint {
        WireEndpoint::new(WS_URL)
    }

    fn heartbeat(&self, settings: &FeedSettings) -> HeartbeatSpec {
        HeartbeatSpec {
            interval: settings.heartbeat_interval,
            timeout: None,
            payload: PingPayload::Text(json!({"t": "h"}).to_string()),
        }
    }

    fn login_frames(&self) -> Vec<RawFrame> {
        vec![RawFrame::Text(
            json!({
                "t": "c",
                "uid": self.client_id,
                "actid": self.client_id,
                "susertoken": self.session_token,
                "source": "API",
            })
            .to_string(),
        )]
    }

    fn broker_exchange(&self, exchange: &str) -> String {
        mapping::exchange_code(exchange).to_string()
    }

    fn subscribe_frames(
        &self,
        (mode, _depth): ModeLevel,
        instruments: &[BrokerInstrument],
    ) -> Vec<RawFrame> {
        Self::request(mapping::subscribe_type(mode), instruments)
    }

    fn unsubscribe_frames(
        &self,
        (mode, _depth): ModeLevel,
        instruments: &[BrokerInstrument],
    ) -> Vec<RawFrame> {
        Self::request(mapping::unsubscribe_type(mode), instruments)
    }

    fn downgrade_frames(
        &self,
        (released, _): ModeLevel,
        (remaining, _): ModeLevel,
        instrument: &BrokerInstrument,
    ) -> Vec<RawFrame> {
        // Quote to LTP stays on the touchline feed.
        if mapping::uses_depth_feed(released) == mapping::uses_depth_feed(remaining) {
            return Vec::new();
        }
        let one = std::slice::from_ref(instrument);
        let mut frames = Self::request(mapping::unsubscribe_type(Mode::Depth), one);
        frames.extend(Self::request(mapping::subscribe_type(remaining), one));
        frames
    }

    fn decode(&self, frame: &RawFrame) -> Result<Vec<ShoonyaFrame>, CodecError> {
        match frame {
            RawFrame::Text(text) => codec::decode(text),
            RawFrame::Binary(buf) => codec::decode(&String::from_utf8_lossy(buf)),
        }
    }

    fn normalize(&self, frame: ShoonyaFrame) -> Inbound {
        match frame {
            ShoonyaFrame::Tick(tick) => Inbound::Tick(Self::tick(tick)),
            ShoonyaFrame::ConnectAck { ok: true, detail } => Inbound::Control(Control::Ack(detail)),
            ShoonyaFrame::ConnectAck { ok: false, detail } => {
                Inbound::Control(Control::Rejected(format!("connect refused: {detail}")))
            }
            ShoonyaFrame::Other(_) => Inbound::Ignore,
        }
    }
}
