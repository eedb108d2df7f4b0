//! Scripted wire layer and fixtures shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use broker_stream_adapter::application::ports::{
    AdapterStatus, RawFrame, SessionOptions, WireConnector, WireEndpoint, WireError, WireEvent,
    WireLink,
};
use broker_stream_adapter::{
    AdapterDeps, AdapterRegistry, AdapterState, BrokerAdapter, BrokerCredentials, BusContext,
    BusSettings, FeedSettings, InstrumentEntry, InstrumentMaster,
};

pub const RELIANCE_TOKEN: u32 = 738_561;
pub const INFY_TOKEN: u32 = 408_065;
pub const TCS_TOKEN: u32 = 2_953_217;

// =============================================================================
// Scripted Link
// =============================================================================

/// Link that records outbound frames and lets the test inject inbound ones.
pub struct ScriptedLink {
    sent: Mutex<Vec<RawFrame>>,
    room: Mutex<Option<usize>>,
    connected: AtomicBool,
    events: mpsc::Sender<WireEvent>,
}

impl ScriptedLink {
    /// Frames the adapter sent, decoded as JSON text.
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .iter()
            .map(|frame| match frame {
                RawFrame::Text(text) => serde_json::from_str(text).unwrap(),
                RawFrame::Binary(bytes) => serde_json::from_slice(bytes).unwrap(),
            })
            .collect()
    }

    /// Forget everything sent so far.
    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    /// Accept only `room` more frames before reporting a full queue;
    /// `None` lifts the limit.
    pub fn limit_outbound(&self, room: Option<usize>) {
        *self.room.lock() = room;
    }

    fn admit(&self, count: usize) -> Result<(), WireError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(WireError::NotConnected);
        }
        let mut room = self.room.lock();
        match room.as_mut() {
            Some(left) if *left < count => Err(WireError::Backpressure),
            Some(left) => {
                *left -= count;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Deliver an inbound frame.
    pub async fn push(&self, frame: RawFrame) {
        self.events.send(WireEvent::Frame(frame)).await.unwrap();
    }

    /// Simulate the broker dropping the socket.
    pub async fn drop_connection(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self
            .events
            .send(WireEvent::Closed {
                reason: reason.to_string(),
            })
            .await;
    }
}

impl WireLink for ScriptedLink {
    fn send(&self, frame: RawFrame) -> Result<(), WireError> {
        self.admit(1)?;
        self.sent.lock().push(frame);
        Ok(())
    }

    fn send_all(&self, frames: Vec<RawFrame>) -> Result<(), WireError> {
        self.admit(frames.len())?;
        self.sent.lock().extend(frames);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.events.try_send(WireEvent::Closed {
                reason: "closed by client".to_string(),
            });
        }
    }
}

// =============================================================================
// Scripted Connector
// =============================================================================

/// Connector handing out [`ScriptedLink`]s, or refusing when told to.
#[derive(Default)]
pub struct ScriptedConnector {
    links: Mutex<Vec<Arc<ScriptedLink>>>,
    endpoints: Mutex<Vec<WireEndpoint>>,
    refuse: AtomicBool,
    hold: AtomicBool,
    release: Notify,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every following connect fail.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Park every following connect until `hold(false)`.
    pub fn hold(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
        if !hold {
            self.release.notify_waiters();
        }
    }

    /// Wait until `count` connects have been attempted, refused or not.
    pub async fn wait_for_attempts(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(30), async {
            while self.endpoints.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("connect was not attempted in time");
    }

    /// Number of successful connects.
    pub fn connect_count(&self) -> usize {
        self.links.lock().len()
    }

    /// Most recent link.
    pub fn link(&self) -> Arc<ScriptedLink> {
        Arc::clone(self.links.lock().last().expect("no link opened"))
    }

    /// Endpoints asked for, including refused attempts.
    pub fn endpoints(&self) -> Vec<WireEndpoint> {
        self.endpoints.lock().clone()
    }

    /// Wait until `count` links have been opened.
    pub async fn wait_for_connects(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(30), async {
            while self.connect_count() < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("connect did not happen in time");
    }
}

#[async_trait]
impl WireConnector for ScriptedConnector {
    async fn connect(
        &self,
        endpoint: &WireEndpoint,
        _options: &SessionOptions,
        events: mpsc::Sender<WireEvent>,
    ) -> Result<Arc<dyn WireLink>, WireError> {
        self.endpoints.lock().push(endpoint.clone());
        loop {
            let released = self.release.notified();
            if !self.hold.load(Ordering::SeqCst) {
                break;
            }
            released.await;
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(WireError::Connect("connection refused".to_string()));
        }
        let link = Arc::new(ScriptedLink {
            sent: Mutex::new(Vec::new()),
            room: Mutex::new(None),
            connected: AtomicBool::new(true),
            events,
        });
        let _ = link.events.try_send(WireEvent::Opened);
        self.links.lock().push(Arc::clone(&link));
        Ok(link)
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn instruments() -> InstrumentMaster {
    let entry = |symbol: &str, token: u32| InstrumentEntry {
        broker: "zerodha".to_string(),
        exchange: "NSE".to_string(),
        symbol: symbol.to_string(),
        token: token.to_string(),
        broker_symbol: None,
    };
    InstrumentMaster::from_entries([
        entry("RELIANCE", RELIANCE_TOKEN),
        entry("INFY", INFY_TOKEN),
        entry("TCS", TCS_TOKEN),
    ])
    .unwrap()
}

pub fn feed_settings() -> FeedSettings {
    FeedSettings {
        reconnect_delay_initial: Duration::from_millis(10),
        reconnect_delay_max: Duration::from_millis(100),
        max_reconnect_attempts: 3,
        ..FeedSettings::default()
    }
}

pub struct Harness {
    pub adapter: Arc<dyn BrokerAdapter>,
    pub connector: Arc<ScriptedConnector>,
    pub bus: Arc<BusContext>,
}

/// Initialized zerodha adapter on an in-process bus.
pub async fn zerodha(settings: FeedSettings, legacy_topics: bool) -> Harness {
    let connector = ScriptedConnector::new();
    let bus = Arc::new(BusContext::new(BusSettings {
        base_port: 0,
        legacy_topics,
        ..BusSettings::default()
    }));
    let adapter = AdapterRegistry::with_defaults()
        .create(
            "zerodha",
            AdapterDeps {
                resolver: Arc::new(instruments()),
                connector: Arc::clone(&connector) as Arc<dyn WireConnector>,
                bus: Arc::clone(&bus),
                settings,
            },
        )
        .unwrap();

    let creds = BrokerCredentials::new()
        .with_api_key("kite-key")
        .with_auth_token("kite-token");
    adapter.initialize("zerodha", "trader-1", &creds).await.unwrap();

    Harness {
        adapter,
        connector,
        bus,
    }
}

/// Wait until the adapter reports `state`.
pub async fn wait_for_state(adapter: &dyn BrokerAdapter, state: AdapterState) -> AdapterStatus {
    let mut rx = adapter.watch_status();
    tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| s.state == state))
        .await
        .expect("state not reached in time")
        .map(|status| status.clone())
        .expect("status channel closed")
}

/// Kite frame holding one 8-byte LTP packet.
pub fn kite_ltp(token: u32, paise: i32) -> RawFrame {
    let mut buf = Vec::with_capacity(12);
    buf.extend_from_slice(&1_i16.to_be_bytes());
    buf.extend_from_slice(&8_i16.to_be_bytes());
    buf.extend_from_slice(&token.to_be_bytes());
    buf.extend_from_slice(&paise.to_be_bytes());
    RawFrame::Binary(buf)
}
