//! Broker Stream Adapter Binary
//!
//! Starts one broker adapter session and republishes its ticks on the bus.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin broker-stream-adapter
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `BROKER_NAME`: zerodha | angel | dhan | shoonya | upstox
//! - Broker credentials: `BROKER_API_KEY`, `BROKER_API_SECRET`,
//!   `BROKER_AUTH_TOKEN`, `BROKER_FEED_TOKEN`, `BROKER_CLIENT_ID`
//!   (which ones depends on the broker)
//!
//! ## Optional
//! - `BROKER_USER_ID`: owning user (default: default)
//! - `SYMBOL_MASTER_PATH`: JSON instrument master
//! - `FEED_SUBSCRIPTIONS`: comma-separated `EXCHANGE:SYMBOL:MODE[:DEPTH]`
//! - `FEED_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `BUS_HOST` / `BUS_BASE_PORT` / `BUS_PORT_RANGE`: bus publisher binding
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use broker_stream_adapter::domain::streaming::topic;
use broker_stream_adapter::infrastructure::telemetry;
use broker_stream_adapter::infrastructure::wire::WsConnector;
use broker_stream_adapter::{
    AdapterConfig, AdapterDeps, AdapterRegistry, AdapterState, BrokerAdapter, BusContext,
    HealthServer, HealthServerState, InstrumentMaster, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Bound on the disconnect call during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Broker Stream Adapter");

    let _metrics_handle = init_metrics().context("failed to install Prometheus recorder")?;

    let config = AdapterConfig::from_env()?;
    log_config(&config);

    let resolver = match &config.symbol_master_path {
        Some(path) => InstrumentMaster::from_path(path)?,
        None => {
            tracing::warn!("SYMBOL_MASTER_PATH not set, every subscription will miss");
            InstrumentMaster::default()
        }
    };

    let shutdown_token = CancellationToken::new();
    let bus = Arc::new(BusContext::new(config.bus.clone()));

    let registry = AdapterRegistry::with_defaults();
    let adapter = registry.create(
        &config.broker,
        AdapterDeps {
            resolver: Arc::new(resolver),
            connector: Arc::new(WsConnector::new()),
            bus: Arc::clone(&bus),
            settings: config.feed.clone(),
        },
    )?;

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&adapter),
        Arc::clone(&bus),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    adapter
        .initialize(&config.broker, &config.user_id, &config.credentials)
        .await?;
    adapter.connect().await?;

    for spec in &config.subscriptions {
        match adapter
            .subscribe(&spec.symbol, &spec.exchange, spec.mode, spec.depth)
            .await
        {
            Ok(reply) => tracing::debug!(
                topic = %topic(&reply.exchange, &reply.symbol, reply.mode),
                fallback = ?reply.is_fallback,
                "Startup subscription active"
            ),
            Err(e) => tracing::warn!(
                exchange = %spec.exchange,
                symbol = %spec.symbol,
                code = e.code(),
                error = %e,
                "Startup subscription failed"
            ),
        }
    }

    tracing::info!(broker = %config.broker, "Broker stream adapter ready");

    let outcome = await_shutdown(adapter.as_ref()).await;
    shutdown_token.cancel();

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, adapter.disconnect()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Disconnect failed"),
        Err(_) => tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Disconnect timed out"
        ),
    }

    tracing::info!("Broker stream adapter stopped");
    outcome
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &AdapterConfig) {
    tracing::info!(
        broker = %config.broker,
        user_id = %config.user_id,
        subscriptions = config.subscriptions.len(),
        health_port = config.server.health_port,
        bus_base_port = config.bus.base_port,
        "Configuration loaded"
    );
    tracing::debug!(credentials = ?config.credentials, "Broker credentials");
}

/// Wait for SIGINT, SIGTERM or the adapter giving up on its own.
///
/// Returns an error only for the last case, so the process exits non-zero.
async fn await_shutdown(adapter: &dyn BrokerAdapter) -> anyhow::Result<()> {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let mut status = adapter.watch_status();
    let fatal = async {
        loop {
            {
                let current = status.borrow_and_update();
                if current.state == AdapterState::Disconnected
                    && let Some(error) = current.fatal.clone()
                {
                    return error;
                }
            }
            if status.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
            Ok(())
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
            Ok(())
        }
        error = fatal => {
            tracing::error!(code = error.code(), error = %error, "Adapter stopped");
            Err(error.into())
        }
    }
}
