//! Error types for the ledger store

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger store errors
#[derive(Error, Debug)]
pub enum Error {
    /// Debit would take the account balance below zero
    #[error("Insufficient credits on account {account}: balance {balance}, requested delta {delta}")]
    InsufficientCredits {
        /// Account that refused the debit
        account: String,
        /// Balance at the time of the refused append
        balance: i64,
        /// Requested (negative) delta
        delta: i64,
    },

    /// Account is flagged disputed; debits are refused until resolved
    #[error("Account {0} is disputed; debits refused until an operator resolves it")]
    DisputedAccount(String),

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Outbox entry not found
    #[error("Outbox entry not found: {0}")]
    OutboxEntryNotFound(String),

    /// Record failed validation before commit
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Ledger halted after a failed durability check; mutations refused
    #[error("Ledger halted: {0}")]
    LedgerHalted(String),

    /// Durable state failed verification; fatal for mutating operations
    #[error("Ledger corruption detected: {0}")]
    Corruption(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Concurrency error
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
