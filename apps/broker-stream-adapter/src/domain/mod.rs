//! Domain Layer - Core market data types and bookkeeping.
//!
//! Pure types with no I/O: canonical ticks and modes, price scaling,
//! last-known symbol state, subscription reference counting and token
//! routing. Broker protocols and sockets live in the infrastructure layer.

/// Canonical market data types, price scaling and symbol state.
pub mod streaming;

/// Subscription reference counting and token routing.
pub mod subscription;
