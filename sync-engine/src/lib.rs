//! Sakti-Link Sync Engine
//!
//! Background synchronization between an edge node's local ledger and the
//! regional aggregator. Sync never sits on the critical path of a ledger
//! operation: the ledger commits locally and this crate drains the durable
//! outbox (push) and merges other nodes' histories (pull) whenever
//! connectivity allows.
//!
//! # Guarantees
//!
//! - At-least-once delivery: outbox entries survive crashes and are removed
//!   only on aggregator acknowledgment
//! - No double-counting: the aggregator deduplicates on idempotency keys,
//!   and pull merges are idempotent on transaction ids
//! - Cursors advance only after durable merges; a crash mid-pull replays
//!   harmlessly
//! - Capped exponential backoff with jitter on transient failures

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod aggregator;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod reconciler;

pub use aggregator::{Aggregator, InMemoryAggregator, PullPage, PushRecord, PushResponse, Rejection};
pub use client::{spawn_sync_client, PushStats, SyncClient, SyncHandle, SyncStatus};
pub use config::SyncConfig;
pub use error::{Error, Result};
pub use reconciler::{MergeStats, Reconciler};
