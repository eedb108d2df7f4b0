//! Heartbeat Monitor
//!
//! Periodically asks the session task to ping the broker and reports a
//! timeout when nothing has been heard since the last ping for longer than
//! the broker's pong timeout. Any inbound frame counts as proof of life.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::HeartbeatSpec;

/// Events emitted by the heartbeat monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send the broker's ping payload now.
    SendPing,
    /// The socket went silent; close it.
    Timeout,
}

/// Liveness shared between the monitor and the session task.
#[derive(Debug)]
pub struct HeartbeatState {
    last_seen: RwLock<Instant>,
    waiting: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Fresh state, counting now as the last activity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_seen: RwLock::new(Instant::now()),
            waiting: AtomicBool::new(false),
        }
    }

    /// Record inbound activity.
    pub fn record_activity(&self) {
        *self.last_seen.write() = Instant::now();
        self.waiting.store(false, Ordering::SeqCst);
    }

    /// Record that a ping went out.
    pub fn mark_ping_sent(&self) {
        self.waiting.store(true, Ordering::SeqCst);
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_seen.read().elapsed()
    }
}

/// Drives the heartbeat for one session.
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Option<Duration>,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatMonitor {
    /// Create a monitor for a broker's heartbeat spec.
    #[must_use]
    pub fn new(
        spec: &HeartbeatSpec,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            interval: spec.interval,
            timeout: spec.timeout,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the event channel closes, or a timeout fires.
    pub async fn run(self) {
        let start = Instant::now() + self.interval;
        let mut interval = tokio::time::interval_at(start, self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat monitor cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if !self.check_and_ping().await {
                        break;
                    }
                }
            }
        }
    }

    /// Returns false when the loop should stop.
    async fn check_and_ping(&self) -> bool {
        if let Some(timeout) = self.timeout
            && self.state.is_waiting()
        {
            let silence = self.state.silence();
            if silence > timeout {
                tracing::warn!(
                    silence_ms = silence.as_millis(),
                    timeout_ms = timeout.as_millis(),
                    "Heartbeat timeout detected"
                );
                let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
                return false;
            }
        }

        if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
            tracing::debug!("Heartbeat event channel closed");
            return false;
        }
        true
    }
}
