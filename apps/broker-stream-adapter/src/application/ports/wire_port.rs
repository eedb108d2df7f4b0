//! Wire Port (Driven Port)
//!
//! Interface for the physical broker socket. The adapter asks a
//! [`WireConnector`] for a [`WireLink`], sends frames through it and consumes
//! [`WireEvent`]s from a bounded channel. The link never decides whether to
//! reconnect; it reports the close and stops.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

// =============================================================================
// Frames and Endpoint
// =============================================================================

/// A frame exactly as it crossed the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl RawFrame {
    /// Frame size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// True for zero-length frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where and how to open a broker socket.
#[derive(Clone, PartialEq, Eq)]
pub struct WireEndpoint {
    /// WebSocket URL, query parameters included.
    pub url: String,
    /// Extra HTTP headers for the upgrade request.
    pub headers: Vec<(String, String)>,
}

impl WireEndpoint {
    /// Endpoint with no extra headers.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Add an upgrade header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl fmt::Debug for WireEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Query strings and headers carry tokens.
        let base = self.url.split('?').next().unwrap_or_default();
        let names: Vec<&str> = self.headers.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("WireEndpoint")
            .field("url", &base)
            .field("headers", &names)
            .finish()
    }
}

// =============================================================================
// Heartbeat and Session Options
// =============================================================================

/// What the client sends on each heartbeat tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingPayload {
    /// WebSocket protocol ping; any inbound traffic counts as the pong.
    WebSocket,
    /// Broker-specific text message.
    Text(String),
}

/// Heartbeat cadence for one broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatSpec {
    /// Interval between pings.
    pub interval: Duration,
    /// Silence after a ping that counts as a dead socket. `None` disables the
    /// check for brokers that never answer heartbeats.
    pub timeout: Option<Duration>,
    /// Ping payload.
    pub payload: PingPayload,
}

impl HeartbeatSpec {
    /// WebSocket ping with a pong timeout.
    #[must_use]
    pub const fn websocket(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout: Some(timeout),
            payload: PingPayload::WebSocket,
        }
    }
}

/// Per-session options for a link.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Heartbeat behaviour.
    pub heartbeat: HeartbeatSpec,
    /// Outbound queue size; a full queue fails `send` immediately.
    pub outbound_capacity: usize,
}

// =============================================================================
// Events and Errors
// =============================================================================

/// What a running link reports upward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// Handshake finished; sent once, first.
    Opened,
    /// Inbound frame, unmodified.
    Frame(RawFrame),
    /// The socket is gone. Sent once, last.
    Closed {
        /// Human-readable close cause.
        reason: String,
    },
}

/// Errors from the wire layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Handshake did not finish in time.
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    /// Handshake failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Link already closed.
    #[error("link is not connected")]
    NotConnected,

    /// Outbound queue is full.
    #[error("outbound queue full")]
    Backpressure,

    /// Link closed while sending.
    #[error("link closed: {0}")]
    Closed(String),
}

// =============================================================================
// Traits
// =============================================================================

/// An open broker socket.
pub trait WireLink: Send + Sync {
    /// Queue a frame for sending without waiting.
    ///
    /// # Errors
    ///
    /// Fails when the link is closed or its outbound queue is full.
    fn send(&self, frame: RawFrame) -> Result<(), WireError>;

    /// Queue several frames as one unit: either all are queued or none is.
    ///
    /// # Errors
    ///
    /// Fails, having queued nothing, when the link is closed or the queue
    /// cannot take every frame.
    fn send_all(&self, frames: Vec<RawFrame>) -> Result<(), WireError>;

    /// Whether the socket is still open.
    fn is_connected(&self) -> bool;

    /// Close the socket. Idempotent.
    fn close(&self);
}

/// Opens broker sockets.
#[async_trait]
pub trait WireConnector: Send + Sync {
    /// Open a socket and start its session task.
    ///
    /// Inbound frames and the final close are delivered on `events`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Connect`] when the handshake fails.
    async fn connect(
        &self,
        endpoint: &WireEndpoint,
        options: &SessionOptions,
        events: mpsc::Sender<WireEvent>,
    ) -> Result<Arc<dyn WireLink>, WireError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_debug_hides_tokens() {
        let endpoint = WireEndpoint::new("wss://ws.kite.trade?api_key=k&access_token=secret")
            .with_header("Authorization", "Bearer secret");

        let debug = format!("{endpoint:?}");

        assert!(debug.contains("wss://ws.kite.trade"));
        assert!(debug.contains("Authorization"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn raw_frame_len() {
        assert_eq!(RawFrame::Text("ping".to_string()).len(), 4);
        assert!(RawFrame::Binary(vec![]).is_empty());
    }
}
