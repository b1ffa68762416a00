//! Sakti-Link Ledger Store
//!
//! Locally authoritative, append-only credit ledger for community edge
//! nodes. Every operation commits durably on the local node before
//! acknowledgment; synchronization is a background concern layered on top.
//!
//! # Architecture
//!
//! - **Event Sourcing**: Balances are derived by folding immutable history
//! - **Lamport Ordering**: Logical timestamps give a stable cross-node order
//! - **Transactional Outbox**: Local commit and delivery queue share a batch
//! - **Dispute, Don't Drop**: Conflicting merges are flagged, never discarded
//!
//! # Invariants
//!
//! - Non-negative balances: a local debit never commits below zero
//! - History ordered by (logical_timestamp, origin_node_id)
//! - Append-only: transactions are never modified or deleted
//! - sync_state only moves forward: LocalOnly -> Queued -> Acknowledged

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod outbox;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use outbox::Outbox;
pub use types::{
    AccountId, AccountRecord, AccountStatus, CreditReason, GigApplicationRecord,
    LogicalTimestamp, MergeOutcome, NodeId, OutboxEntry, ProgressRecord, SyncCursor, SyncFact,
    SyncState, Transaction,
};
