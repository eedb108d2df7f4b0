//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, adapter status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (adapter connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{AdapterState, BrokerAdapter};
use crate::domain::subscription::SubscriptionStats;
use crate::infrastructure::bus::BusContext;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Adapter version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Broker session status.
    pub broker: BrokerStatus,
    /// Subscription statistics.
    pub subscriptions: SubscriptionStats,
    /// Bus statistics.
    pub bus: BusStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Streaming.
    Healthy,
    /// Connecting or reconnecting.
    Degraded,
    /// Not streaming and not trying to.
    Unhealthy,
}

/// Broker session status.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerStatus {
    /// Broker name.
    pub name: String,
    /// Adapter lifecycle state.
    pub state: AdapterState,
    /// Whether the upstream socket is live.
    pub connected: bool,
    /// Fatal error that stopped the adapter, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,
}

/// Bus statistics.
#[derive(Debug, Clone, Serialize)]
pub struct BusStatus {
    /// TCP port of the adapter's publisher.
    pub port: Option<u16>,
    /// In-process receivers attached to the hub.
    pub receivers: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    adapter: Arc<dyn BrokerAdapter>,
    bus: Arc<BusContext>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, adapter: Arc<dyn BrokerAdapter>, bus: Arc<BusContext>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            adapter,
            bus,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.adapter.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let stats = state.adapter.stats();
    let status = state.adapter.watch_status().borrow().clone();

    HealthResponse {
        status: determine_health_status(stats.state),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        broker: BrokerStatus {
            name: stats.broker,
            state: stats.state,
            connected: state.adapter.is_connected(),
            fatal: status.fatal.map(|e| e.to_string()),
        },
        subscriptions: stats.subscriptions,
        bus: BusStatus {
            port: stats.bus_port,
            receivers: state.bus.receiver_count(),
        },
    }
}

const fn determine_health_status(state: AdapterState) -> HealthStatus {
    match state {
        AdapterState::Connected => HealthStatus::Healthy,
        AdapterState::Connecting | AdapterState::Reconnecting => HealthStatus::Degraded,
        AdapterState::Uninitialized | AdapterState::Initialized | AdapterState::Disconnected => {
            HealthStatus::Unhealthy
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::brokers::{AdapterDeps, AdapterRegistry};
    use crate::infrastructure::config::{BusSettings, FeedSettings};
    use crate::infrastructure::instruments::InstrumentMaster;
    use crate::infrastructure::wire::WsConnector;
    use test_case::test_case;

    fn state() -> HealthServerState {
        let bus = Arc::new(BusContext::new(BusSettings {
            base_port: 0,
            ..BusSettings::default()
        }));
        let deps = AdapterDeps {
            resolver: Arc::new(InstrumentMaster::default()),
            connector: Arc::new(WsConnector::new()),
            bus: Arc::clone(&bus),
            settings: FeedSettings::default(),
        };
        let adapter = AdapterRegistry::with_defaults().create("zerodha", deps).unwrap();
        HealthServerState::new("0.1.0".to_string(), adapter, bus)
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test_case(AdapterState::Connected, HealthStatus::Healthy)]
    #[test_case(AdapterState::Reconnecting, HealthStatus::Degraded)]
    #[test_case(AdapterState::Connecting, HealthStatus::Degraded)]
    #[test_case(AdapterState::Disconnected, HealthStatus::Unhealthy)]
    #[test_case(AdapterState::Initialized, HealthStatus::Unhealthy)]
    fn status_follows_adapter_state(state: AdapterState, expected: HealthStatus) {
        assert_eq!(determine_health_status(state), expected);
    }

    #[test]
    fn fresh_adapter_reports_unhealthy() {
        let state = state();
        let response = build_health_response(&state);

        assert_eq!(response.status, HealthStatus::Unhealthy);
        assert_eq!(response.broker.name, "zerodha");
        assert!(!response.broker.connected);
        assert_eq!(response.subscriptions, SubscriptionStats::default());

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["broker"]["state"], "UNINITIALIZED");
        assert!(json["broker"].get("fatal").is_none());
    }

    #[tokio::test]
    async fn readiness_requires_connection() {
        let state = Arc::new(state());
        let response = readiness_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
