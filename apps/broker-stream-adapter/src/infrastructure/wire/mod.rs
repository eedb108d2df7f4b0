//! Broker socket plumbing: the WebSocket client, heartbeat monitor and
//! reconnect backoff.

pub mod client;
pub mod heartbeat;
pub mod reconnect;

pub use client::{WsConnector, WsLink};
pub use heartbeat::{HeartbeatEvent, HeartbeatMonitor, HeartbeatState};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
