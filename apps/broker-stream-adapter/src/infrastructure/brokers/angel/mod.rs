//! Angel One SmartStream
//!
//! Authenticates through upgrade headers, subscribes with JSON requests
//! grouped by exchange type and streams little-endian binary packets. The
//! server expects a text `ping` every interval and answers `pong`. Every
//! packet is a full snapshot for its mode.

pub mod codec;
pub mod mapping;

use std::collections::BTreeMap;

use serde_json::json;

use self::codec::{AngelFrame, AngelPacket};
use super::codec::{CodecError, now_millis};
use super::protocol::{BrokerProtocol, Control, Inbound};
use crate::application::ports::{
    AdapterError, BrokerCredentials, HeartbeatSpec, PingPayload, RawFrame, WireEndpoint,
};
use crate::domain::streaming::{TickFields, TickUpdate, UpdateKind};
use crate::domain::subscription::{BrokerInstrument, ModeLevel};
use crate::infrastructure::config::FeedSettings;

const WS_URL: &str = "wss://smartapisocket.angelone.in/smart-stream";

const ACTION_UNSUBSCRIBE: u8 = 0;
const ACTION_SUBSCRIBE: u8 = 1;

/// SmartStream v2 protocol.
#[derive(Debug, Clone)]
pub struct AngelProtocol {
    auth_token: String,
    api_key: String,
    client_code: String,
    feed_token: String,
}

impl AngelProtocol {
    fn request(
        action: u8,
        (mode, depth): ModeLevel,
        instruments: &[BrokerInstrument],
    ) -> Vec<RawFrame> {
        let mut groups: BTreeMap<u8, Vec<&str>> = BTreeMap::new();
        for instrument in instruments {
            match mapping::exchange_type(&instrument.broker_exchange) {
                Some(kind) => groups.entry(kind).or_default().push(&instrument.token),
                None => {
                    tracing::warn!(
                        broker = Self::NAME,
                        exchange = %instrument.broker_exchange,
                        "Skipping instrument with unknown exchange type"
                    );
                }
            }
        }
        if groups.is_empty() {
            return Vec::new();
        }

        let token_list: Vec<_> = groups
            .into_iter()
            .map(|(kind, tokens)| json!({"exchangeType": kind, "tokens": tokens}))
            .collect();
        let mut correlation = uuid::Uuid::new_v4().simple().to_string();
        correlation.truncate(10);

        vec![RawFrame::Text(
            json!({
                "correlationID": correlation,
                "action": action,
                "params": {
                    "mode": mapping::mode_code(mode, depth),
                    "tokenList": token_list,
                },
            })
            .to_string(),
        )]
    }

    fn tick(packet: AngelPacket) -> TickUpdate {
        let instrument = BrokerInstrument::new(packet.exchange, packet.token);
        let mut update = TickUpdate::new(instrument, UpdateKind::Complete);
        let (bid, ask) = packet.depth.as_ref().map_or((None, None), |d| {
            (d.best_bid(), d.best_ask())
        });
        update.fields = TickFields {
            ltp: packet.ltp,
            ltq: packet.ltq,
            average_price: packet.average_price,
            open: packet.open,
            high: packet.high,
            low: packet.low,
            close: packet.close,
            volume: packet.volume,
            oi: packet.oi,
            bid,
            ask,
            total_buy_qty: packet.total_buy_qty,
            total_sell_qty: packet.total_sell_qty,
            timestamp: Some(if packet.exchange_timestamp > 0 {
                packet.exchange_timestamp
            } else {
                now_millis()
            }),
        };
        update.depth = packet.depth;
        update
    }
}

impl BrokerProtocol for AngelProtocol {
    const NAME: &'static str = "angel";
    type Frame = AngelFrame;

    fn from_credentials(
        _user_id: &str,
        credentials: &BrokerCredentials,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            auth_token: BrokerCredentials::require(&credentials.auth_token, "auth_token")?
                .to_string(),
            api_key: BrokerCredentials::require(&credentials.api_key, "api_key")?.to_string(),
            client_code: BrokerCredentials::require(&credentials.client_id, "client_id")?
                .to_string(),
            feed_token: BrokerCredentials::require(&credentials.feed_token, "feed_token")?
                .to_string(),
        })
    }

    fn endpoint(&self) -> WireEndpoint {
        WireEndpoint::new(WS_URL)
            .with_header("Authorization", format!("Bearer {}", self.auth_token))
            .with_header("x-api-key", self.api_key.as_str())
            .with_header("x-client-code", self.client_code.as_str())
            .with_header("x-feed-token", self.feed_token.as_str())
    }

    fn heartbeat(&self, settings: &FeedSettings) -> HeartbeatSpec {
        HeartbeatSpec {
            interval: settings.heartbeat_interval,
            timeout: Some(settings.heartbeat_timeout),
            payload: PingPayload::Text("ping".to_string()),
        }
    }

    fn broker_exchange(&self, exchange: &str) -> String {
        mapping::exchange_code(exchange).to_string()
    }

    fn supported_depths(&self, exchange: &str) -> &'static [u8] {
        mapping::supported_depths(exchange)
    }

    fn subscribe_frames(
        &self,
        level: ModeLevel,
        instruments: &[BrokerInstrument],
    ) -> Vec<RawFrame> {
        Self::request(ACTION_SUBSCRIBE, level, instruments)
    }

    fn unsubscribe_frames(
        &self,
        level: ModeLevel,
        instruments: &[BrokerInstrument],
    ) -> Vec<RawFrame> {
        Self::request(ACTION_UNSUBSCRIBE, level, instruments)
    }

    fn decode(&self, frame: &RawFrame) -> Result<Vec<AngelFrame>, CodecError> {
        match frame {
            RawFrame::Binary(buf) => codec::decode_binary(buf),
            RawFrame::Text(text) => codec::decode_text(text),
        }
    }

    fn normalize(&self, frame: AngelFrame) -> Inbound {
        match frame {
            AngelFrame::Tick(packet) => Inbound::Tick(Self::tick(packet)),
            AngelFrame::Pong => Inbound::Control(Control::Heartbeat),
            AngelFrame::Error { code, message } => {
                Inbound::Control(Control::Rejected(format!("{code}: {message}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::streaming::Mode;

    fn protocol() -> AngelProtocol {
        let creds = BrokerCredentials::new()
            .with_auth_token("jwt")
            .with_api_key("key")
            .with_client_id("A123")
            .with_feed_token("feed");
        AngelProtocol::from_credentials("u1", &creds).unwrap()
    }

    fn text(frame: &RawFrame) -> serde_json::Value {
        match frame {
            RawFrame::Text(t) => serde_json::from_str(t).unwrap(),
            RawFrame::Binary(_) => panic!("expected text frame"),
        }
    }

    #[test]
    fn requires_feed_token() {
        let creds = BrokerCredentials::new()
            .with_auth_token("jwt")
            .with_api_key("key")
            .with_client_id("A123");
        assert_eq!(
            AngelProtocol::from_credentials("u1", &creds).unwrap_err(),
            AdapterError::Auth("missing feed_token".to_string())
        );
    }

    #[test]
    fn endpoint_authenticates_with_headers() {
        let endpoint = protocol().endpoint();
        assert_eq!(endpoint.url, WS_URL);
        assert!(endpoint.headers.contains(&("Authorization".to_string(), "Bearer jwt".to_string())));
        assert!(endpoint.headers.contains(&("x-feed-token".to_string(), "feed".to_string())));
    }

    #[test]
    fn subscribe_groups_tokens_by_exchange_type() {
        let p = protocol();
        let frames = p.subscribe_frames(
            (Mode::Quote, 0),
            &[
                p.instrument("NSE", "2885"),
                p.instrument("NFO", "43210"),
                p.instrument("NSE", "1594"),
            ],
        );

        assert_eq!(frames.len(), 1);
        let body = text(&frames[0]);
        assert_eq!(body["action"], 1);
        assert_eq!(body["params"]["mode"], 2);
        assert_eq!(body["correlationID"].as_str().unwrap().len(), 10);
        assert_eq!(
            body["params"]["tokenList"],
            json!([
                {"exchangeType": 1, "tokens": ["2885", "1594"]},
                {"exchangeType": 2, "tokens": ["43210"]},
            ])
        );
    }

    #[test]
    fn depth_twenty_uses_dedicated_mode() {
        let p = protocol();
        let frames = p.subscribe_frames((Mode::Depth, 20), &[p.instrument("NSE", "2885")]);
        assert_eq!(text(&frames[0])["params"]["mode"], 4);
    }

    #[test]
    fn unsubscribe_uses_action_zero() {
        let p = protocol();
        let frames = p.unsubscribe_frames((Mode::Ltp, 0), &[p.instrument("BSE", "500325")]);
        let body = text(&frames[0]);
        assert_eq!(body["action"], 0);
        assert_eq!(body["params"]["tokenList"][0]["exchangeType"], 3);
    }

    #[test]
    fn heartbeat_is_text_ping() {
        let spec = protocol().heartbeat(&FeedSettings::default());
        assert_eq!(spec.payload, PingPayload::Text("ping".to_string()));
        assert!(spec.timeout.is_some());
    }

    #[test]
    fn ltp_packet_routes_to_subscribed_instrument() {
        let p = protocol();
        let raw = RawFrame::Binary(codec::tests::ltp_packet("2885", 150_050));

        let frames = p.decode(&raw).unwrap();
        let Inbound::Tick(update) = p.normalize(frames.into_iter().next().unwrap()) else {
            panic!("expected tick");
        };

        assert_eq!(update.instrument, p.instrument("NSE", "2885"));
        assert_eq!(update.kind, UpdateKind::Complete);
        assert_eq!(update.fields.ltp, Some(1500.5));
        assert_eq!(update.fields.timestamp, Some(1_700_000_000_123));
    }

    #[test]
    fn error_reply_is_rejection() {
        let p = protocol();
        let frames = p
            .decode(&RawFrame::Text(r#"{"errorCode":"E1001","errorMessage":"Invalid token"}"#.to_string()))
            .unwrap();
        assert_eq!(
            p.normalize(frames.into_iter().next().unwrap()),
            Inbound::Control(Control::Rejected("E1001: Invalid token".to_string()))
        );
    }
}
