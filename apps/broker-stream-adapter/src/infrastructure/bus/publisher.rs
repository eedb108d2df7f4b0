//! Per-adapter bus publisher.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::{BusError, BusMessage, PortLease};
use crate::domain::streaming::CanonicalTick;
use crate::infrastructure::config::BusSettings;

/// Publishes one adapter's ticks.
///
/// Closing (or dropping) the publisher stops its TCP listener and returns
/// its port to the registry.
#[derive(Debug)]
pub struct BusPublisher {
    owner: String,
    hub: broadcast::Sender<BusMessage>,
    local: broadcast::Sender<BusMessage>,
    lease: Mutex<Option<PortLease>>,
    port: Option<u16>,
    legacy_topics: bool,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl BusPublisher {
    pub(super) fn in_process(
        owner: &str,
        hub: broadcast::Sender<BusMessage>,
        settings: &BusSettings,
    ) -> Self {
        let (local, _) = broadcast::channel(settings.channel_capacity.max(1));
        Self {
            owner: owner.to_string(),
            hub,
            local,
            lease: Mutex::new(None),
            port: None,
            legacy_topics: settings.legacy_topics,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub(super) fn bound(
        owner: &str,
        hub: broadcast::Sender<BusMessage>,
        settings: &BusSettings,
        listener: TcpListener,
        lease: PortLease,
    ) -> Self {
        let mut publisher = Self::in_process(owner, hub, settings);
        publisher.port = Some(lease.port());
        *publisher.lease.get_mut() = Some(lease);

        tokio::spawn(serve(
            listener,
            publisher.local.clone(),
            publisher.cancel.clone(),
            publisher.owner.clone(),
        ));
        publisher
    }

    /// Bound TCP port, if any.
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    /// Owner name given at open time.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Receive this publisher's messages only.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.local.subscribe()
    }

    /// Publish a tick on its broker topic (and the legacy topic if enabled).
    ///
    /// Returns the number of in-process deliveries; zero just means nobody
    /// is listening.
    ///
    /// # Errors
    ///
    /// Fails if the publisher is closed or the tick cannot be serialized.
    pub fn publish_tick(&self, broker: &str, tick: &CanonicalTick) -> Result<usize, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let payload: Arc<str> = Arc::from(serde_json::to_string(tick)?);
        let mut delivered = self.send(BusMessage {
            topic: tick.broker_topic(broker),
            payload: Arc::clone(&payload),
        });
        if self.legacy_topics {
            delivered += self.send(BusMessage {
                topic: tick.topic(),
                payload,
            });
        }
        Ok(delivered)
    }

    fn send(&self, message: BusMessage) -> usize {
        let tcp = self.local.send(message.clone()).unwrap_or(0);
        let hub = self.hub.send(message).unwrap_or(0);
        tcp + hub
    }

    /// Stop serving and release the port. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        drop(self.lease.lock().take());
        tracing::info!(owner = %self.owner, port = ?self.port, "Bus publisher closed");
    }
}

impl Drop for BusPublisher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn serve(
    listener: TcpListener,
    local: broadcast::Sender<BusMessage>,
    cancel: CancellationToken,
    owner: String,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(owner = %owner, peer = %peer, "Bus subscriber connected");
                        tokio::spawn(stream_to_client(stream, local.subscribe(), cancel.clone()));
                    }
                    Err(e) => tracing::warn!(owner = %owner, error = %e, "Bus accept failed"),
                }
            }
        }
    }
}

async fn stream_to_client(
    mut stream: TcpStream,
    mut rx: broadcast::Receiver<BusMessage>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            msg = rx.recv() => {
                match msg {
                    Ok(message) => {
                        if stream.write_all(message.to_wire().as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Bus subscriber lagging, messages skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, BufReader};

    use super::*;
    use crate::domain::streaming::Mode;
    use crate::infrastructure::bus::BusContext;

    fn tick() -> CanonicalTick {
        CanonicalTick {
            symbol: "RELIANCE".to_string(),
            exchange: "NSE".to_string(),
            mode: Mode::Ltp,
            ltp: 2500.5,
            timestamp: 1_700_000_000_000,
            ltq: None,
            average_price: None,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            oi: None,
            bid: None,
            ask: None,
            totalbuyqty: None,
            totalsellqty: None,
            depth: None,
        }
    }

    fn in_process(legacy_topics: bool) -> BusContext {
        BusContext::new(BusSettings {
            base_port: 0,
            legacy_topics,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn publishes_broker_and_legacy_topics() {
        let ctx = in_process(true);
        let mut rx = ctx.subscribe();
        let publisher = ctx.open_publisher("zerodha").await.unwrap();

        publisher.publish_tick("zerodha", &tick()).unwrap();

        assert_eq!(rx.recv().await.unwrap().topic, "zerodha_NSE_RELIANCE_LTP");
        let legacy = rx.recv().await.unwrap();
        assert_eq!(legacy.topic, "NSE_RELIANCE_LTP");
        assert!(legacy.payload.contains("\"ltp\":2500.5"));
    }

    #[tokio::test]
    async fn legacy_topic_can_be_disabled() {
        let ctx = in_process(false);
        let mut rx = ctx.subscribe();
        let publisher = ctx.open_publisher("angel").await.unwrap();

        publisher.publish_tick("angel", &tick()).unwrap();

        assert_eq!(rx.recv().await.unwrap().topic, "angel_NSE_RELIANCE_LTP");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_publisher_rejects_ticks() {
        let ctx = in_process(true);
        let publisher = ctx.open_publisher("dhan").await.unwrap();

        publisher.close();
        publisher.close();

        assert!(matches!(
            publisher.publish_tick("dhan", &tick()),
            Err(BusError::Closed)
        ));
    }

    #[tokio::test]
    async fn tcp_subscriber_receives_lines_and_port_is_released() {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base_port = probe.local_addr().unwrap().port();
        drop(probe);

        let ctx = BusContext::new(BusSettings {
            base_port,
            port_range: 20,
            legacy_topics: false,
            ..Default::default()
        });
        let publisher = ctx.open_publisher("upstox").await.unwrap();
        let port = publisher.port().unwrap();
        assert!(ctx.registry().is_claimed(port));

        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut lines = BufReader::new(stream).lines();

        // Give the accept loop a moment to register the subscriber.
        tokio::time::sleep(Duration::from_millis(50)).await;
        publisher.publish_tick("upstox", &tick()).unwrap();

        let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(line.starts_with("upstox_NSE_RELIANCE_LTP {"));

        publisher.close();
        assert!(!ctx.registry().is_claimed(port));
    }
}
