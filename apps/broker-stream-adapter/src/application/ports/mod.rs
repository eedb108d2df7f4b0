//! Port Interfaces
//!
//! Contracts between the adapter core and the outside world, following the
//! Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `WireConnector` / `WireLink`: the physical broker socket
//! - `SymbolResolver`: canonical symbol to broker token lookup
//!
//! ## Driver Ports (Inbound)
//!
//! - `BrokerAdapter`: the contract the proxy layer calls

mod adapter_port;
mod symbol_port;
mod wire_port;

pub use adapter_port::{
    AdapterError, AdapterReply, AdapterState, AdapterStats, AdapterStatus, BrokerAdapter,
    BrokerCredentials, ErrorReply, ReplyStatus, SubscribeReply,
};
#[cfg(test)]
pub use symbol_port::MockSymbolResolver;
pub use symbol_port::{ResolvedInstrument, SymbolResolver};
pub use wire_port::{
    HeartbeatSpec, PingPayload, RawFrame, SessionOptions, WireConnector, WireEndpoint, WireError,
    WireEvent, WireLink,
};
