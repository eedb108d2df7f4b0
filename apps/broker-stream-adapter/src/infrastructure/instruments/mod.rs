//! Instrument Master
//!
//! In-memory [`SymbolResolver`] backed by a JSON instrument file. The file is
//! an array of entries:
//!
//! ```json
//! [
//!   {"broker": "zerodha", "exchange": "NSE", "symbol": "RELIANCE", "token": "738561"},
//!   {"broker": "upstox", "exchange": "NSE", "symbol": "RELIANCE",
//!    "token": "NSE_EQ|INE002A01018", "broker_symbol": "RELIANCE-EQ"}
//! ]
//! ```
//!
//! Lookups are case-insensitive on all three key parts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::application::ports::{ResolvedInstrument, SymbolResolver};

/// One row of the instrument file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstrumentEntry {
    /// Broker name.
    pub broker: String,
    /// Canonical exchange.
    pub exchange: String,
    /// Canonical symbol.
    pub symbol: String,
    /// Broker token.
    pub token: String,
    /// Broker trading symbol.
    #[serde(default)]
    pub broker_symbol: Option<String>,
}

/// Errors loading an instrument file.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// File could not be read.
    #[error("failed to read instrument file {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// File is not a valid entry list.
    #[error("failed to parse instrument file: {0}")]
    Parse(#[from] serde_json::Error),

    /// Entry with an empty key part or token.
    #[error("invalid instrument entry {index}: {reason}")]
    InvalidEntry {
        /// Zero-based position in the file.
        index: usize,
        /// What is wrong with it.
        reason: String,
    },
}

type Key = (String, String, String);

fn key(broker: &str, exchange: &str, symbol: &str) -> Key {
    (
        broker.trim().to_ascii_lowercase(),
        exchange.trim().to_ascii_uppercase(),
        symbol.trim().to_ascii_uppercase(),
    )
}

/// Token lookup table keyed by `(broker, exchange, symbol)`.
#[derive(Debug, Default)]
pub struct InstrumentMaster {
    entries: HashMap<Key, ResolvedInstrument>,
}

impl InstrumentMaster {
    /// Build from entries. Later duplicates replace earlier ones.
    ///
    /// # Errors
    ///
    /// Returns [`ResolverError::InvalidEntry`] for entries with blank fields.
    pub fn from_entries(
        entries: impl IntoIterator<Item = InstrumentEntry>,
    ) -> Result<Self, ResolverError> {
        let mut master = Self::default();
        for (index, entry) in entries.into_iter().enumerate() {
            let blank = [
                ("broker", &entry.broker),
                ("exchange", &entry.exchange),
                ("symbol", &entry.symbol),
                ("token", &entry.token),
            ]
            .into_iter()
            .find(|(_, value)| value.trim().is_empty());
            if let Some((field, _)) = blank {
                return Err(ResolverError::InvalidEntry {
                    index,
                    reason: format!("empty {field}"),
                });
            }

            let resolved = ResolvedInstrument {
                token: entry.token.trim().to_string(),
                broker_symbol: entry.broker_symbol,
            };
            if master
                .entries
                .insert(key(&entry.broker, &entry.exchange, &entry.symbol), resolved)
                .is_some()
            {
                tracing::debug!(
                    broker = %entry.broker,
                    exchange = %entry.exchange,
                    symbol = %entry.symbol,
                    "Duplicate instrument entry replaced"
                );
            }
        }
        Ok(master)
    }

    /// Load a JSON instrument file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed, or holds invalid entries.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ResolverError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ResolverError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let entries: Vec<InstrumentEntry> = serde_json::from_str(&contents)?;
        let master = Self::from_entries(entries)?;
        tracing::info!(path = %path.display(), instruments = master.len(), "Instrument master loaded");
        Ok(master)
    }

    /// Number of instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no instruments are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SymbolResolver for InstrumentMaster {
    fn resolve(&self, broker: &str, symbol: &str, exchange: &str) -> Option<ResolvedInstrument> {
        self.entries.get(&key(broker, exchange, symbol)).cloned()
    }
}
