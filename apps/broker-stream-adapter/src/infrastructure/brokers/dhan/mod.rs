//! Dhan Live Market Feed (v2)
//!
//! Authenticates through the URL query, subscribes with JSON request codes
//! in batches of 100 and streams little-endian binary packets. Ticker, OI and
//! previous-close packets are partial updates merged into symbol state.

pub mod codec;
pub mod mapping;

use serde::Serialize;

use self::codec::{DhanFrame, DhanPacket};
use super::codec::{CodecError, now_millis};
use super::protocol::{BrokerProtocol, Control, Inbound};
use crate::application::ports::{AdapterError, BrokerCredentials, RawFrame, WireEndpoint};
use crate::domain::streaming::{TickFields, TickUpdate, UpdateKind};
use crate::domain::subscription::{BrokerInstrument, ModeLevel};

const WS_URL: &str = "wss://api-feed.dhan.co";

/// Instruments per subscription request.
const BATCH_SIZE: usize = 100;

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct FeedRequest<'a> {
    request_code: u8,
    instrument_count: usize,
    instrument_list: Vec<FeedInstrument<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct FeedInstrument<'a> {
    exchange_segment: &'a str,
    security_id: &'a str,
}

/// Dhan v2 feed protocol.
#[derive(Debug, Clone)]
pub struct DhanProtocol {
    client_id: String,
    access_token: String,
}

impl DhanProtocol {
    fn requests(code: u8, instruments: &[BrokerInstrument]) -> Vec<RawFrame> {
        instruments
            .chunks(BATCH_SIZE)
            .filter_map(|batch| {
                let request = FeedRequest {
                    request_code: code,
                    instrument_count: batch.len(),
                    instrument_list: batch
                        .iter()
                        .map(|i| FeedInstrument {
                            exchange_segment: &i.broker_exchange,
                            security_id: &i.token,
                        })
                        .collect(),
                };
                match serde_json::to_string(&request) {
                    Ok(body) => Some(RawFrame::Text(body)),
                    Err(e) => {
                        tracing::error!(broker = Self::NAME, error = %e, "Failed to encode request");
                        None
                    }
                }
            })
            .collect()
    }

    fn tick(packet: DhanPacket) -> TickUpdate {
        let kind = if packet.kind.is_partial() {
            UpdateKind::Partial
        } else {
            UpdateKind::Complete
        };
        let instrument = BrokerInstrument::new(packet.segment, packet.security_id.to_string());
        let mut update = TickUpdate::new(instrument, kind);
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
            timestamp: Some(
                packet
                    .ltt
                    .filter(|ts| *ts > 0)
                    .map_or_else(now_millis, |ts| ts * 1000),
            ),
        };
        update.depth = packet.depth;
        update
    }
}

impl BrokerProtocol for DhanProtocol {
    const NAME: &'static str = "dhan";
    type Frame = DhanFrame;

    fn from_credentials(
        _user_id: &str,
        credentials: &BrokerCredentials,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            client_id: BrokerCredentials::require(&credentials.client_id, "client_id")?
                .to_string(),
            access_token: BrokerCredentials::require(&credentials.auth_token, "auth_token")?
                .to_string(),
        })
    }

    fn endpoint(&self) -> WireEndpoint {
        WireEndpoint::new(format!(
            "{WS_URL}?version=2&token={}&clientId={}&authType=2",
            self.access_token, self.client_id
        ))
    }

    fn broker_exchange(&self, exchange: &str) -> String {
        mapping::exchange_code(exchange).to_string()
    }

    fn subscribe_frames(
        &self,
        (mode, _depth): ModeLevel,
        instruments: &[BrokerInstrument],
    ) -> Vec<RawFrame> {
        Self::requests(mapping::request_codes(mode).0, instruments)
    }

    fn unsubscribe_frames(
        &self,
        (mode, _depth): ModeLevel,
        instruments: &[BrokerInstrument],
    ) -> Vec<RawFrame> {
        Self::requests(mapping::request_codes(mode).1, instruments)
    }

    fn decode(&self, frame: &RawFrame) -> Result<Vec<DhanFrame>, CodecError> {
        match frame {
            RawFrame::Binary(buf) => codec::decode(buf),
            RawFrame::Text(text) => Err(CodecError::InvalidFormat(format!(
                "unexpected text frame: {text}"
            ))),
        }
    }

    fn normalize(&self, frame: DhanFrame) -> Inbound {
        match frame {
            DhanFrame::Tick(packet) => Inbound::Tick(Self::tick(packet)),
            DhanFrame::Disconnect(reason) => {
                Inbound::Control(Control::Disconnect(format!("server disconnect code {reason}")))
            }
            DhanFrame::Other(_) => Inbound::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::streaming::Mode;
    use serde_json::json;

    fn protocol() -> DhanProtocol {
        let creds = BrokerCredentials::new()
            .with_client_id("1000000001")
            .with_auth_token("jwt");
        DhanProtocol::from_credentials("u1", &creds).unwrap()
    }

    fn text(frame: &RawFrame) -> serde_json::Value {
        match frame {
            RawFrame::Text(t) => serde_json::from_str(t).unwrap(),
            RawFrame::Binary(_) => panic!("expected text frame"),
        }
    }

    #[test]
    fn endpoint_carries_query_auth() {
        assert_eq!(
            protocol().endpoint().url,
            "wss://api-feed.dhan.co?version=2&token=jwt&clientId=1000000001&authType=2"
        );
    }

    #[test]
    fn subscribe_uses_mode_request_code() {
        let p = protocol();
        let frames = p.subscribe_frames((Mode::Quote, 0), &[p.instrument("NSE", "2885")]);

        assert_eq!(
            text(&frames[0]),
            json!({
                "RequestCode": 17,
                "InstrumentCount": 1,
                "InstrumentList": [{"ExchangeSegment": "NSE_EQ", "SecurityId": "2885"}],
            })
        );
    }

    #[test]
    fn unsubscribe_matches_subscribed_mode() {
        let p = protocol();
        let frames = p.unsubscribe_frames((Mode::Depth, 5), &[p.instrument("NFO", "43210")]);
        assert_eq!(text(&frames[0])["RequestCode"], 22);
    }

    #[test]
    fn large_subscriptions_are_batched() {
        let p = protocol();
        let instruments: Vec<_> = (0..250).map(|i| p.instrument("NSE", &i.to_string())).collect();

        let frames = p.subscribe_frames((Mode::Ltp, 0), &instruments);

        let counts: Vec<_> = frames.iter().map(|f| text(f)["InstrumentCount"].clone()).collect();
        assert_eq!(counts, vec![json!(100), json!(100), json!(50)]);
    }

    #[test]
    fn ticker_normalizes_to_partial_update() {
        let p = protocol();
        let frames = p.decode(&RawFrame::Binary(codec::tests::ticker(2885, 1500.5))).unwrap();
        let Inbound::Tick(update) = p.normalize(frames.into_iter().next().unwrap()) else {
            panic!("expected tick");
        };

        assert_eq!(update.instrument, p.instrument("NSE", "2885"));
        assert_eq!(update.kind, UpdateKind::Partial);
        assert_eq!(update.fields.ltp, Some(1500.5));
        assert_eq!(update.fields.timestamp, Some(1_700_000_000_000));
    }

    #[test]
    fn full_packet_sets_best_bid_and_ask() {
        let p = protocol();
        let frames = p.decode(&RawFrame::Binary(codec::tests::full(43_210))).unwrap();
        let Inbound::Tick(update) = p.normalize(frames.into_iter().next().unwrap()) else {
            panic!("expected tick");
        };

        assert_eq!(update.kind, UpdateKind::Complete);
        assert_eq!(update.fields.bid, Some(245.3));
        assert_eq!(update.fields.ask, Some(245.4));
    }

    #[test]
    fn text_frames_are_rejected() {
        assert!(protocol().decode(&RawFrame::Text("{}".to_string())).is_err());
    }
}
