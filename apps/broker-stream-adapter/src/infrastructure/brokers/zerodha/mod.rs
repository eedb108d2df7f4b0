//! Zerodha Kite Ticker
//!
//! Authenticates through the URL query (`api_key`, `access_token`),
//! subscribes with numeric instrument tokens and streams big-endian binary
//! packets. Every packet is a complete snapshot for its mode. Ticks carry no
//! exchange field, so instruments are keyed by the segment encoded in the
//! token itself.

pub mod codec;
pub mod mapping;

use serde_json::json;

use self::codec::{KitePacket, ZerodhaFrame};
use super::codec::{CodecError, now_millis};
use super::protocol::{BrokerProtocol, Control, Inbound};
use crate::application::ports::{AdapterError, BrokerCredentials, RawFrame, WireEndpoint};
use crate::domain::streaming::{Mode, TickFields, TickUpdate, UpdateKind};
use crate::domain::subscription::{BrokerInstrument, ModeLevel};

const WS_URL: &str = "wss://ws.kite.trade";

/// Kite ticker protocol.
#[derive(Debug, Clone)]
pub struct ZerodhaProtocol {
    api_key: String,
    access_token: String,
}

impl ZerodhaProtocol {
    fn tokens(instruments: &[BrokerInstrument]) -> Vec<u32> {
        instruments
            .iter()
            .filter_map(|i| match i.token.parse::<u32>() {
                Ok(token) => Some(token),
                Err(_) => {
                    tracing::warn!(broker = Self::NAME, token = %i.token, "Skipping non-numeric token");
                    None
                }
            })
            .collect()
    }

    fn mode_frame(mode: Mode, tokens: &[u32]) -> RawFrame {
        RawFrame::Text(json!({"a": "mode", "v": [mapping::mode_name(mode), tokens]}).to_string())
    }

    fn tick(packet: KitePacket) -> TickUpdate {
        let instrument = BrokerInstrument::new(packet.segment, packet.token.to_string());
        let mut update = TickUpdate::new(instrument, UpdateKind::Complete);
        update.fields = TickFields {
            ltp: Some(packet.last_price),
            ltq: packet.last_quantity,
            average_price: packet.average_price,
            open: packet.open,
            high: packet.high,
            low: packet.low,
            close: packet.close,
            volume: packet.volume,
            oi: packet.oi,
            bid: None,
            ask: None,
            total_buy_qty: packet.total_buy_quantity,
            total_sell_qty: packet.total_sell_quantity,
            timestamp: Some(
                packet
                    .exchange_timestamp
                    .filter(|ts| *ts > 0)
                    .map_or_else(now_millis, |ts| ts * 1000),
            ),
        };
        update.depth = packet.depth;
        update
    }
}

impl BrokerProtocol for ZerodhaProtocol {
    const NAME: &'static str = "zerodha";
    type Frame = ZerodhaFrame;

    fn from_credentials(
        _user_id: &str,
        credentials: &BrokerCredentials,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            api_key: BrokerCredentials::require(&credentials.api_key, "api_key")?.to_string(),
            access_token: BrokerCredentials::require(&credentials.auth_token, "auth_token")?
                .to_string(),
        })
    }

    fn endpoint(&self) -> WireEndpoint {
        WireEndpoint::new(format!(
            "{WS_URL}?api_key={}&access_token={}",
            self.api_key, self.access_token
        ))
    }

    fn broker_exchange(&self, exchange: &str) -> String {
        mapping::exchange_code(exchange).to_string()
    }

    fn instrument(&self, exchange: &str, token: &str) -> BrokerInstrument {
        token.trim().parse::<u32>().map_or_else(
            |_| BrokerInstrument::new(self.broker_exchange(exchange), token),
            |numeric| BrokerInstrument::new(mapping::segment_of(numeric), token.trim()),
        )
    }

    fn subscribe_frames(
        &self,
        (mode, _depth): ModeLevel,
        instruments: &[BrokerInstrument],
    ) -> Vec<RawFrame> {
        let tokens = Self::tokens(instruments);
        if tokens.is_empty() {
            return Vec::new();
        }
        vec![
            RawFrame::Text(json!({"a": "subscribe", "v": tokens}).to_string()),
            Self::mode_frame(mode, &tokens),
        ]
    }

    fn unsubscribe_frames(
        &self,
        _level: ModeLevel,
        instruments: &[BrokerInstrument],
    ) -> Vec<RawFrame> {
        let tokens = Self::tokens(instruments);
        if tokens.is_empty() {
            return Vec::new();
        }
        vec![RawFrame::Text(
            json!({"a": "unsubscribe", "v": tokens}).to_string(),
        )]
    }

    fn downgrade_frames(
        &self,
        _released: ModeLevel,
        (mode, _depth): ModeLevel,
        instrument: &BrokerInstrument,
    ) -> Vec<RawFrame> {
        let tokens = Self::tokens(std::slice::from_ref(instrument));
        if tokens.is_empty() {
            return Vec::new();
        }
        vec![Self::mode_frame(mode, &tokens)]
    }

    fn decode(&self, frame: &RawFrame) -> Result<Vec<ZerodhaFrame>, CodecError> {
        match frame {
            RawFrame::Binary(buf) => codec::decode_binary(buf),
            RawFrame::Text(text) => codec::decode_text(text),
        }
    }

    fn normalize(&self, frame: ZerodhaFrame) -> Inbound {
        match frame {
            ZerodhaFrame::Tick(packet) => Inbound::Tick(Self::tick(packet)),
            ZerodhaFrame::Heartbeat => Inbound::Control(Control::Heartbeat),
            ZerodhaFrame::Error(detail) => Inbound::Control(Control::Rejected(detail)),
            ZerodhaFrame::Message(detail) => Inbound::Control(Control::Ack(detail)),
            ZerodhaFrame::Other => Inbound::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::streaming::DepthLevel;

    fn protocol() -> ZerodhaProtocol {
        let creds = BrokerCredentials::new()
            .with_api_key("kite-key")
            .with_auth_token("kite-token");
        ZerodhaProtocol::from_credentials("u1", &creds).unwrap()
    }

    fn text(frame: &RawFrame) -> serde_json::Value {
        match frame {
            RawFrame::Text(t) => serde_json::from_str(t).unwrap(),
            RawFrame::Binary(_) => panic!("expected text frame"),
        }
    }

    #[test]
    fn requires_api_key_and_token() {
        let creds = BrokerCredentials::new().with_api_key("k");
        let err = ZerodhaProtocol::from_credentials("u1", &creds).unwrap_err();
        assert_eq!(err, AdapterError::Auth("missing auth_token".to_string()));
    }

    #[test]
    fn endpoint_carries_query_auth() {
        assert_eq!(
            protocol().endpoint().url,
            "wss://ws.kite.trade?api_key=kite-key&access_token=kite-token"
        );
    }

    #[test]
    fn instrument_uses_token_segment() {
        let p = protocol();
        assert_eq!(p.instrument("NSE_INDEX", "256265"), BrokerInstrument::new("INDICES", "256265"));
        assert_eq!(p.instrument("NSE", "408065"), BrokerInstrument::new("NSE", "408065"));
    }

    #[test]
    fn subscribe_sends_subscribe_then_mode() {
        let frames = protocol().subscribe_frames(
            (Mode::Quote, 0),
            &[BrokerInstrument::new("NSE", "408065")],
        );

        assert_eq!(frames.len(), 2);
        assert_eq!(text(&frames[0]), json!({"a": "subscribe", "v": [408_065]}));
        assert_eq!(text(&frames[1]), json!({"a": "mode", "v": ["quote", [408_065]]}));
    }

    #[test]
    fn downgrade_only_switches_mode() {
        let frames = protocol().downgrade_frames(
            (Mode::Depth, 5),
            (Mode::Ltp, 0),
            &BrokerInstrument::new("NSE", "408065"),
        );

        assert_eq!(frames.len(), 1);
        assert_eq!(text(&frames[0]), json!({"a": "mode", "v": ["ltp", [408_065]]}));
    }

    #[test]
    fn full_packet_normalizes_to_complete_update() {
        let p = protocol();
        let raw = RawFrame::Binary(codec::tests::frame(&codec::tests::full_packet(408_065)));

        let frames = p.decode(&raw).unwrap();
        let Inbound::Tick(update) = p.normalize(frames.into_iter().next().unwrap()) else {
            panic!("expected tick");
        };

        assert_eq!(update.kind, UpdateKind::Complete);
        assert_eq!(update.instrument, BrokerInstrument::new("NSE", "408065"));
        assert_eq!(update.fields.ltp, Some(1500.5));
        assert_eq!(update.fields.timestamp, Some(1_700_000_000_000));
        let depth = update.depth.unwrap();
        assert_eq!(depth.buy[4], DepthLevel::new(1500.2, 104, 3));
    }

    #[test]
    fn heartbeat_is_control() {
        let p = protocol();
        let frames = p.decode(&RawFrame::Binary(vec![0])).unwrap();
        assert_eq!(
            p.normalize(frames.into_iter().next().unwrap()),
            Inbound::Control(Control::Heartbeat)
        );
    }
}
