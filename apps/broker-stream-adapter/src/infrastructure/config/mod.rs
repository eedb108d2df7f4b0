//! Configuration Module
//!
//! Environment-driven configuration for the adapter binary.

mod settings;

pub use settings::{
    AdapterConfig, BusSettings, ConfigError, FeedSettings, ServerSettings, SubscriptionSpec,
};
