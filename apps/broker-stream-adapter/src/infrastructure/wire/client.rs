//! WebSocket Wire Client
//!
//! Opens a broker socket with `tokio-tungstenite`, then runs one session task
//! that multiplexes outbound frames, heartbeat pings and inbound reads. Every
//! inbound data frame is forwarded unmodified. The session starts with
//! [`WireEvent::Opened`] and ends with exactly one [`WireEvent::Closed`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::heartbeat::{HeartbeatEvent, HeartbeatMonitor, HeartbeatState};
use crate::application::ports::{
    PingPayload, RawFrame, SessionOptions, WireConnector, WireEndpoint, WireError, WireEvent,
    WireLink,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Link
// =============================================================================

/// Handle to a running WebSocket session.
#[derive(Debug)]
pub struct WsLink {
    outbound: mpsc::Sender<RawFrame>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl WireLink for WsLink {
    fn send(&self, frame: RawFrame) -> Result<(), WireError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(WireError::NotConnected);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WireError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => {
                WireError::Closed("session task ended".to_string())
            }
        })
    }

    fn send_all(&self, frames: Vec<RawFrame>) -> Result<(), WireError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(WireError::NotConnected);
        }
        if frames.is_empty() {
            return Ok(());
        }
        let permits = self
            .outbound
            .try_reserve_many(frames.len())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(()) => WireError::Backpressure,
                mpsc::error::TrySendError::Closed(()) => {
                    WireError::Closed("session task ended".to_string())
                }
            })?;
        for (permit, frame) in permits.zip(frames) {
            permit.send(frame);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Production connector backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WireConnector for WsConnector {
    async fn connect(
        &self,
        endpoint: &WireEndpoint,
        options: &SessionOptions,
        events: mpsc::Sender<WireEvent>,
    ) -> Result<Arc<dyn WireLink>, WireError> {
        tracing::info!(endpoint = ?endpoint, "Connecting to broker feed");

        let mut request = endpoint
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| WireError::Connect(e.to_string()))?;
        for (name, value) in &endpoint.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| WireError::Connect(format!("invalid header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| WireError::Connect(format!("invalid header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| WireError::Connect(e.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::channel(options.outbound_capacity.max(1));
        let connected = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let session = Session {
            options: options.clone(),
            events,
            connected: Arc::clone(&connected),
            cancel: cancel.clone(),
        };
        tokio::spawn(session.run(stream, outbound_rx));

        Ok(Arc::new(WsLink {
            outbound: outbound_tx,
            connected,
            cancel,
        }))
    }
}

// =============================================================================
// Session Task
// =============================================================================

struct Session {
    options: SessionOptions,
    events: mpsc::Sender<WireEvent>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Session {
    async fn run(self, stream: WsStream, outbound_rx: mpsc::Receiver<RawFrame>) {
        let _ = self.events.send(WireEvent::Opened).await;
        let heartbeat_cancel = self.cancel.child_token();
        let reason = self.pump(stream, outbound_rx, &heartbeat_cancel).await;
        heartbeat_cancel.cancel();
        self.connected.store(false, Ordering::SeqCst);

        tracing::info!(reason = %reason, "Broker socket closed");
        let _ = self.events.send(WireEvent::Closed { reason }).await;
    }

    /// Runs until the socket dies or the link is closed; returns the reason.
    async fn pump(
        &self,
        stream: WsStream,
        mut outbound_rx: mpsc::Receiver<RawFrame>,
        heartbeat_cancel: &CancellationToken,
    ) -> String {
        let (mut write, mut read) = stream.split();

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(10);
        let monitor = HeartbeatMonitor::new(
            &self.options.heartbeat,
            Arc::clone(&heartbeat_state),
            heartbeat_tx,
            heartbeat_cancel.clone(),
        );
        tokio::spawn(monitor.run());

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return "closed by adapter".to_string();
                }
                event = heartbeat_rx.recv() => {
                    match event {
                        Some(HeartbeatEvent::SendPing) => {
                            heartbeat_state.mark_ping_sent();
                            let ping = match &self.options.heartbeat.payload {
                                PingPayload::WebSocket => Message::Ping(Vec::new().into()),
                                PingPayload::Text(text) => Message::Text(text.clone().into()),
                            };
                            if let Err(e) = write.send(ping).await {
                                return format!("ping failed: {e}");
                            }
                        }
                        Some(HeartbeatEvent::Timeout) => return "heartbeat timeout".to_string(),
                        None => return "heartbeat stopped".to_string(),
                    }
                }
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else {
                        return "outbound queue closed".to_string();
                    };
                    let message = match frame {
                        RawFrame::Text(text) => Message::Text(text.into()),
                        RawFrame::Binary(bytes) => Message::Binary(bytes.into()),
                    };
                    if let Err(e) = write.send(message).await {
                        return format!("send failed: {e}");
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat_state.record_activity();
                            if self.forward(RawFrame::Text(text.as_str().to_string())).await.is_err() {
                                return "event channel closed".to_string();
                            }
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            heartbeat_state.record_activity();
                            if self.forward(RawFrame::Binary(bytes.to_vec())).await.is_err() {
                                return "event channel closed".to_string();
                            }
                        }
                        Some(Ok(Message::Pong(_))) => heartbeat_state.record_activity(),
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat_state.record_activity();
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                return format!("pong failed: {e}");
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return frame.map_or_else(
                                || "server closed".to_string(),
                                |f| format!("server closed: {} {}", f.code, f.reason.as_str()),
                            );
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => return format!("read error: {e}"),
                        None => return "stream ended".to_string(),
                    }
                }
            }
        }
    }

    async fn forward(&self, frame: RawFrame) -> Result<(), mpsc::error::SendError<WireEvent>> {
        self.events.send(WireEvent::Frame(frame)).await
    }
}
