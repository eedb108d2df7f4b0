#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Broker Stream Adapter - Normalized Market Data Feed
//!
//! Maintains one upstream WebSocket per broker session, reference-counts
//! downstream subscriptions across LTP, quote and depth modes, reconciles
//! partial updates into per-instrument state and republishes canonical ticks
//! on a topic bus.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core streaming logic and data types
//!   - `streaming`: Canonical ticks, modes, price scaling, symbol state
//!   - `subscription`: Reference counting and token routing
//!
//! - **Application**: Port definitions
//!   - `ports`: Adapter contract, wire socket, symbol lookup
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `wire`: WebSocket client with heartbeat and backoff
//!   - `brokers`: Zerodha, Angel, Dhan, Shoonya and Upstox protocols
//!   - `bus`: Topic publishing over TCP and in-process broadcast
//!   - `instruments`: JSON instrument master
//!   - `config`: Configuration and dependency injection
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! Broker WS ──► WireLink ──► FeedAdapter ──► SymbolState ──► BusPublisher ──► TCP subscribers
//!                  ▲              │                                  └──────► in-process hub
//!                  └── subscribe ─┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{CanonicalTick, DepthLevel, Exchange, MarketDepth, Mode};
pub use domain::subscription::SubscriptionStats;

// Ports
pub use application::ports::{
    AdapterError, AdapterReply, AdapterState, AdapterStatus, BrokerAdapter, BrokerCredentials,
    SubscribeReply, SymbolResolver,
};

// Infrastructure config
pub use infrastructure::config::{
    AdapterConfig, BusSettings, ConfigError, FeedSettings, ServerSettings, SubscriptionSpec,
};

// Adapters
pub use infrastructure::brokers::{AdapterDeps, AdapterRegistry, BrokerProtocol, FeedAdapter};

// Bus
pub use infrastructure::bus::{BusContext, BusError, BusMessage, BusPublisher};

// Instrument master
pub use infrastructure::instruments::{InstrumentEntry, InstrumentMaster, ResolverError};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
