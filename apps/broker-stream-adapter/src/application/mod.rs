//! Application Layer - Port definitions.
//!
//! Interfaces the adapter core depends on (wire sockets, symbol lookup) and
//! the adapter contract it exposes to callers.

/// Port interfaces for external systems.
pub mod ports;
