//! Prometheus Metrics Module
//!
//! Exposes adapter metrics in Prometheus format. Every series is labelled
//! with the broker name.
//!
//! # Metrics Categories
//!
//! - **Ticks**: frames received, ticks published, frames dropped, parse errors
//! - **Connection**: adapter state and reconnect attempts
//! - **Subscriptions**: active subscription keys
//! - **Latency**: frame decode to publish
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder, once per process.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Prometheus handle for rendering, if metrics were initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "broker_feed_frames_received_total",
        "Raw frames received from the broker socket"
    );
    describe_counter!(
        "broker_feed_ticks_published_total",
        "Canonical ticks published on the bus"
    );
    describe_counter!(
        "broker_feed_ticks_dropped_total",
        "Broker updates dropped before publishing, by reason"
    );
    describe_counter!(
        "broker_feed_parse_errors_total",
        "Frames that failed to decode"
    );
    describe_counter!(
        "broker_feed_reconnects_total",
        "Reconnect attempts after unsolicited closes"
    );
    describe_gauge!(
        "broker_feed_connection_state",
        "Adapter lifecycle state (0=uninitialized .. 5=disconnected)"
    );
    describe_gauge!(
        "broker_feed_subscriptions",
        "Active (exchange, symbol, mode) subscriptions"
    );
    describe_histogram!(
        "broker_feed_processing_seconds",
        "Time from frame receipt to bus publish"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why an update never reached the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Token has no route.
    Unmapped,
    /// State not primed yet.
    Unprimed,
    /// No bus subscriber received it.
    NoReceivers,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Unmapped => "unmapped",
            Self::Unprimed => "unprimed",
            Self::NoReceivers => "no_receivers",
        }
    }
}

/// Record a raw frame from the broker.
pub fn record_frame_received(broker: &'static str) {
    counter!("broker_feed_frames_received_total", "broker" => broker).increment(1);
}

/// Record ticks published on the bus.
pub fn record_ticks_published(broker: &'static str, count: u64) {
    counter!("broker_feed_ticks_published_total", "broker" => broker).increment(count);
}

/// Record an update dropped before publishing.
pub fn record_tick_dropped(broker: &'static str, reason: DropReason) {
    counter!(
        "broker_feed_ticks_dropped_total",
        "broker" => broker,
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a frame that failed to decode.
pub fn record_parse_error(broker: &'static str) {
    counter!("broker_feed_parse_errors_total", "broker" => broker).increment(1);
}

/// Record a reconnect attempt.
pub fn record_reconnect(broker: &'static str) {
    counter!("broker_feed_reconnects_total", "broker" => broker).increment(1);
}

/// Update the adapter state gauge.
pub fn set_connection_state(broker: &'static str, value: f64) {
    gauge!("broker_feed_connection_state", "broker" => broker).set(value);
}

/// Update the subscription gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(broker: &'static str, count: usize) {
    gauge!("broker_feed_subscriptions", "broker" => broker).set(count as f64);
}

/// Record frame processing latency.
pub fn record_processing_duration(broker: &'static str, duration: Duration) {
    histogram!("broker_feed_processing_seconds", "broker" => broker)
        .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reason_as_str() {
        assert_eq!(DropReason::Unmapped.as_str(), "unmapped");
        assert_eq!(DropReason::Unprimed.as_str(), "unprimed");
        assert_eq!(DropReason::NoReceivers.as_str(), "no_receivers");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received("zerodha");
        record_tick_dropped("zerodha", DropReason::Unmapped);
        set_subscriptions("zerodha", 3);
        record_processing_duration("zerodha", Duration::from_micros(20));
    }
}
