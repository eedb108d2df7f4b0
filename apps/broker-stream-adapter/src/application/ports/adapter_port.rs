//! Broker Adapter Port (Driver Port)
//!
//! The contract every per-broker adapter honours identically, plus the
//! serializable replies the proxy layer relays to its own clients.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::domain::streaming::Mode;
use crate::domain::subscription::{SubscriptionError, SubscriptionStats};

// =============================================================================
// Credentials
// =============================================================================

/// Broker auth material. Which fields are required depends on the broker.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BrokerCredentials {
    /// Application API key.
    pub api_key: Option<String>,
    /// Application API secret.
    pub api_secret: Option<String>,
    /// Session or access token.
    pub auth_token: Option<String>,
    /// Separate market-data token, for brokers that issue one.
    pub feed_token: Option<String>,
    /// Broker client or account code.
    pub client_id: Option<String>,
}

impl BrokerCredentials {
    /// Empty credentials.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the API key.
    #[must_use]
    pub fn with_api_key(mut self, value: impl Into<String>) -> Self {
        self.api_key = Some(value.into());
        self
    }

    /// Set the API secret.
    #[must_use]
    pub fn with_api_secret(mut self, value: impl Into<String>) -> Self {
        self.api_secret = Some(value.into());
        self
    }

    /// Set the auth token.
    #[must_use]
    pub fn with_auth_token(mut self, value: impl Into<String>) -> Self {
        self.auth_token = Some(value.into());
        self
    }

    /// Set the feed token.
    #[must_use]
    pub fn with_feed_token(mut self, value: impl Into<String>) -> Self {
        self.feed_token = Some(value.into());
        self
    }

    /// Set the client id.
    #[must_use]
    pub fn with_client_id(mut self, value: impl Into<String>) -> Self {
        self.client_id = Some(value.into());
        self
    }

    /// A required, non-blank field.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Auth`] naming the missing field.
    pub fn require<'a>(
        field: &'a Option<String>,
        name: &str,
    ) -> Result<&'a str, AdapterError> {
        field
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AdapterError::Auth(format!("missing {name}")))
    }
}

impl fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("BrokerCredentials")
            .field("api_key", &mask(&self.api_key))
            .field("api_secret", &mask(&self.api_secret))
            .field("auth_token", &mask(&self.auth_token))
            .field("feed_token", &mask(&self.feed_token))
            .field("client_id", &self.client_id)
            .finish()
    }
}

// =============================================================================
// State
// =============================================================================

/// Adapter lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdapterState {
    /// Constructed, no credentials yet.
    Uninitialized,
    /// Credentials validated.
    Initialized,
    /// Handshake in progress.
    Connecting,
    /// Socket open and subscriptions live.
    Connected,
    /// Waiting out a backoff delay after an unsolicited close.
    Reconnecting,
    /// Stopped, explicitly or after exhausting reconnect attempts.
    Disconnected,
}

impl AdapterState {
    /// Uppercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::Initialized => "INITIALIZED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Reconnecting => "RECONNECTING",
            Self::Disconnected => "DISCONNECTED",
        }
    }

    /// Numeric value exported as a gauge.
    #[must_use]
    pub const fn gauge_value(self) -> f64 {
        match self {
            Self::Uninitialized => 0.0,
            Self::Initialized => 1.0,
            Self::Connecting => 2.0,
            Self::Connected => 3.0,
            Self::Reconnecting => 4.0,
            Self::Disconnected => 5.0,
        }
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State plus the fatal error that ended the session, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterStatus {
    /// Current state.
    pub state: AdapterState,
    /// Set when the adapter gave up on its own.
    pub fatal: Option<AdapterError>,
}

impl AdapterStatus {
    /// Status without a fatal error.
    #[must_use]
    pub const fn new(state: AdapterState) -> Self {
        Self { state, fatal: None }
    }
}

/// Point-in-time adapter statistics.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterStats {
    /// Broker name.
    pub broker: String,
    /// Lifecycle state.
    pub state: AdapterState,
    /// Subscription bookkeeping.
    pub subscriptions: SubscriptionStats,
    /// Bus port bound by the publisher, when one is bound.
    pub bus_port: Option<u16>,
}

// =============================================================================
// Errors
// =============================================================================

/// Caller-facing adapter errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// Missing or invalid credentials. Terminal.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Operation requires `initialize` first.
    #[error("adapter not initialized")]
    NotInitialized,

    /// Operation not allowed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(AdapterState),

    /// Handshake exceeded its time bound.
    #[error("connect timed out after {0} ms")]
    ConnectTimeout(u64),

    /// Handshake failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Symbol lookup returned nothing.
    #[error("symbol not found: {exchange}:{symbol}")]
    SymbolNotFound {
        /// Canonical symbol.
        symbol: String,
        /// Canonical exchange.
        exchange: String,
    },

    /// Key is not subscribed.
    #[error("not subscribed: {0}")]
    NotSubscribed(String),

    /// Upstream subscribe frame could not be sent.
    #[error("subscription failed: {0}")]
    Subscription(String),

    /// Upstream release frame could not be sent.
    #[error("unsubscription failed: {0}")]
    Unsubscription(String),

    /// Reconnect gave up.
    #[error("max reconnect attempts exceeded ({0})")]
    MaxReconnectAttemptsExceeded(u32),

    /// No adapter registered under that name.
    #[error("unsupported broker: {0}")]
    UnsupportedBroker(String),

    /// Publish bus failure.
    #[error("bus error: {0}")]
    Bus(String),
}

impl AdapterError {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "AUTH_ERROR",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::ConnectTimeout(_) => "CONNECT_TIMEOUT",
            Self::Connect(_) => "CONNECT_ERROR",
            Self::SymbolNotFound { .. } => "SYMBOL_NOT_FOUND",
            Self::NotSubscribed(_) => "NOT_SUBSCRIBED",
            Self::Subscription(_) => "SUBSCRIPTION_ERROR",
            Self::Unsubscription(_) => "UNSUBSCRIPTION_ERROR",
            Self::MaxReconnectAttemptsExceeded(_) => "MAX_RECONNECT_ATTEMPTS_EXCEEDED",
            Self::UnsupportedBroker(_) => "UNSUPPORTED_BROKER",
            Self::Bus(_) => "BUS_ERROR",
        }
    }

    /// Serializable form.
    #[must_use]
    pub fn to_reply(&self) -> ErrorReply {
        ErrorReply {
            status: ReplyStatus::Error,
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

impl From<SubscriptionError> for AdapterError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::NotSubscribed(key) => Self::NotSubscribed(key.to_string()),
        }
    }
}

// =============================================================================
// Replies
// =============================================================================

/// Reply status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    /// Operation succeeded.
    Success,
    /// Operation failed.
    Error,
}

/// Plain status reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterReply {
    /// Outcome.
    pub status: ReplyStatus,
    /// Human-readable detail.
    pub message: String,
}

impl AdapterReply {
    /// Successful reply.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Success,
            message: message.into(),
        }
    }
}

/// Reply to `subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeReply {
    /// Outcome.
    pub status: ReplyStatus,
    /// Human-readable detail.
    pub message: String,
    /// Canonical symbol.
    pub symbol: String,
    /// Canonical exchange.
    pub exchange: String,
    /// Mode subscribed.
    pub mode: Mode,
    /// Depth asked for (depth mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_depth: Option<u8>,
    /// Depth granted (depth mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_depth: Option<u8>,
    /// Whether the grant differs from the request (depth mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_fallback: Option<bool>,
}

/// Serialized error: `{status: "error", code, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Always [`ReplyStatus::Error`].
    pub status: ReplyStatus,
    /// Code from [`AdapterError::code`].
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

// =============================================================================
// Adapter Trait
// =============================================================================

/// Common interface for every broker adapter.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Broker name the adapter was registered under.
    fn broker(&self) -> &'static str;

    /// Validate credentials and prepare the broker protocol.
    async fn initialize(
        &self,
        broker_name: &str,
        user_id: &str,
        credentials: &BrokerCredentials,
    ) -> Result<AdapterReply, AdapterError>;

    /// Open the upstream socket and replay live subscriptions.
    async fn connect(&self) -> Result<AdapterReply, AdapterError>;

    /// Stop everything. Idempotent.
    async fn disconnect(&self) -> Result<AdapterReply, AdapterError>;

    /// Add a reference to `(exchange, symbol, mode)`.
    async fn subscribe(
        &self,
        symbol: &str,
        exchange: &str,
        mode: Mode,
        depth_level: Option<u8>,
    ) -> Result<SubscribeReply, AdapterError>;

    /// Drop a reference to `(exchange, symbol, mode)`.
    async fn unsubscribe(
        &self,
        symbol: &str,
        exchange: &str,
        mode: Mode,
    ) -> Result<AdapterReply, AdapterError>;

    /// Whether the upstream socket is live.
    fn is_connected(&self) -> bool;

    /// Current lifecycle state.
    fn state(&self) -> AdapterState;

    /// Watch state changes and fatal errors.
    fn watch_status(&self) -> watch::Receiver<AdapterStatus>;

    /// Statistics snapshot.
    fn stats(&self) -> AdapterStats;
}
