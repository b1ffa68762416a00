//! Error types for the sync engine

use thiserror::Error;

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Sync engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Transport failure talking to the aggregator (transient; retried)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Aggregator request exceeded the configured timeout
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// Aggregator answered but the response was unusable
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Underlying ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_store::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Actor mailbox or response channel closed
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Transient errors are retried with backoff; everything else surfaces
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Timeout(_))
    }
}
