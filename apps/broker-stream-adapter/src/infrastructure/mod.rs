//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Broker WebSocket client, heartbeat and reconnect backoff.
pub mod wire;

/// Broker protocols, the generic feed adapter and the adapter registry.
pub mod brokers;

/// Topic bus: port registry and tick publishers.
pub mod bus;

/// Instrument master backing the symbol resolver.
pub mod instruments;

/// Configuration and dependency injection.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
