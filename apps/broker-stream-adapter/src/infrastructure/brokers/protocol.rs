//! Broker Protocol Description
//!
//! Everything that differs between brokers lives behind [`BrokerProtocol`]:
//! the endpoint and handshake, heartbeat payload, exchange and mode tables,
//! control frames and the decoder for inbound ticks. The generic
//! [`FeedAdapter`](super::FeedAdapter) drives any implementation through the
//! same subscription and reconnection machinery.

use std::fmt;

use super::codec::CodecError;
use crate::application::ports::{
    AdapterError, BrokerCredentials, HeartbeatSpec, RawFrame, WireEndpoint,
};
use crate::domain::streaming::{DEFAULT_DEPTH, TickUpdate};
use crate::domain::subscription::{BrokerInstrument, ModeLevel};
use crate::infrastructure::config::FeedSettings;

/// Non-tick frames that matter to the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Broker keepalive or pong.
    Heartbeat,
    /// Login or subscription acknowledged.
    Ack(String),
    /// Request refused by the broker.
    Rejected(String),
    /// Broker announced it is closing the session.
    Disconnect(String),
}

/// One decoded broker frame after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Market data for one instrument.
    Tick(TickUpdate),
    /// Control message.
    Control(Control),
    /// Nothing the adapter acts on.
    Ignore,
}

/// Broker-specific half of an adapter.
pub trait BrokerProtocol: Send + Sync + Sized + 'static {
    /// Registry name, also the bus topic prefix.
    const NAME: &'static str;

    /// Tagged union of decoded broker frames.
    type Frame: Send + fmt::Debug;

    /// Validate credentials and build the protocol.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Auth`] when required fields are missing.
    fn from_credentials(
        user_id: &str,
        credentials: &BrokerCredentials,
    ) -> Result<Self, AdapterError>;

    /// Socket URL and upgrade headers.
    fn endpoint(&self) -> WireEndpoint;

    /// Heartbeat cadence and payload.
    fn heartbeat(&self, settings: &FeedSettings) -> HeartbeatSpec {
        HeartbeatSpec::websocket(settings.heartbeat_interval, settings.heartbeat_timeout)
    }

    /// Frames sent right after the socket opens, before any subscription.
    fn login_frames(&self) -> Vec<RawFrame> {
        Vec::new()
    }

    /// Broker exchange code for a canonical exchange. Unknown codes map to
    /// the broker default.
    fn broker_exchange(&self, exchange: &str) -> String;

    /// Broker instrument a canonical `(exchange, token)` pair streams as.
    ///
    /// Must match the instrument the decoder puts on inbound updates.
    fn instrument(&self, exchange: &str, token: &str) -> BrokerInstrument {
        BrokerInstrument::new(self.broker_exchange(exchange), token)
    }

    /// Depth levels the broker can stream for a canonical exchange.
    fn supported_depths(&self, _exchange: &str) -> &'static [u8] {
        &[DEFAULT_DEPTH]
    }

    /// Frames that start streaming `instruments` at `(mode, depth)`.
    fn subscribe_frames(
        &self,
        level: ModeLevel,
        instruments: &[BrokerInstrument],
    ) -> Vec<RawFrame>;

    /// Frames that stop streaming `instruments` subscribed at `(mode, depth)`.
    fn unsubscribe_frames(
        &self,
        level: ModeLevel,
        instruments: &[BrokerInstrument],
    ) -> Vec<RawFrame>;

    /// Frames that move an instrument from `released` down to `remaining`,
    /// the highest level some other subscriber still holds.
    fn downgrade_frames(
        &self,
        released: ModeLevel,
        remaining: ModeLevel,
        instrument: &BrokerInstrument,
    ) -> Vec<RawFrame> {
        let one = std::slice::from_ref(instrument);
        let mut frames = self.unsubscribe_frames(released, one);
        frames.extend(self.subscribe_frames(remaining, one));
        frames
    }

    /// Split a raw frame into broker frames.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] for malformed or truncated frames.
    fn decode(&self, frame: &RawFrame) -> Result<Vec<Self::Frame>, CodecError>;

    /// Turn one broker frame into a canonical update or control signal.
    fn normalize(&self, frame: Self::Frame) -> Inbound;
}
