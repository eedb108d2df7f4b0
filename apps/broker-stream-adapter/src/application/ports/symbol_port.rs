//! Symbol Resolver Port (Driven Port)
//!
//! Translates canonical `(exchange, symbol)` pairs into broker tokens.

use serde::{Deserialize, Serialize};

/// Broker-side identity of a canonical instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedInstrument {
    /// Broker instrument token.
    pub token: String,
    /// Broker trading symbol, when it differs from the canonical one.
    pub broker_symbol: Option<String>,
}

impl ResolvedInstrument {
    /// Resolution carrying only a token.
    #[must_use]
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            broker_symbol: None,
        }
    }
}

/// Looks up broker tokens.
#[cfg_attr(test, mockall::automock)]
pub trait SymbolResolver: Send + Sync {
    /// Resolve a canonical instrument for one broker.
    fn resolve(&self, broker: &str, symbol: &str, exchange: &str) -> Option<ResolvedInstrument>;
}
