//! Aggregator boundary
//!
//! The aggregator is a remote service this crate only talks to, never
//! implements: it accepts pushed facts (deduplicating on idempotency key)
//! and serves other nodes' transaction logs as cursor-paged pulls. The
//! trait pins down the contract the sync client relies on:
//!
//! - Push is idempotent: a key it has seen before is neither accepted nor
//!   rejected in the response, and causes no double-count upstream
//! - Rejection is explicit and per-record, with a reason
//! - Pulled pages are ordered by logical timestamp within an origin, and a
//!   page's `next_cursor` resumes exactly after its last transaction
//!
//! `InMemoryAggregator` is the in-process stand-in used by tests and the
//! loopback demo binary.

use crate::{Error, Result};
use async_trait::async_trait;
use ledger_store::{LogicalTimestamp, NodeId, SyncFact, Transaction};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One fact offered to the aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRecord {
    /// Server-side dedup key; stable across redeliveries of the same fact
    pub idempotency_key: Uuid,

    /// The fact itself
    pub fact: SyncFact,
}

/// Per-record rejection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    /// Key of the rejected record
    pub idempotency_key: Uuid,

    /// Why the aggregator refused it
    pub reason: String,
}

/// Aggregator answer to a push batch
///
/// Keys in neither list were already known to the aggregator; the sender
/// treats them as delivered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushResponse {
    /// Newly accepted keys
    pub accepted: Vec<Uuid>,

    /// Explicitly refused records
    pub rejected: Vec<Rejection>,
}

/// One page of another node's transaction log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullPage {
    /// Transactions with logical timestamps after the requested cursor
    pub transactions: Vec<Transaction>,

    /// Cursor to resume from after this page
    pub next_cursor: LogicalTimestamp,

    /// No further pages behind this one
    pub done: bool,
}

/// Remote aggregator contract
#[async_trait]
pub trait Aggregator: Send + Sync {
    /// Offer a batch of facts; at-least-once on the caller's side
    async fn push(&self, records: Vec<PushRecord>) -> Result<PushResponse>;

    /// Page through `origin`'s log strictly after `since`
    async fn pull(
        &self,
        origin: &NodeId,
        since: LogicalTimestamp,
        page_size: usize,
    ) -> Result<PullPage>;

    /// Origins the aggregator has logs for
    async fn origins(&self) -> Result<Vec<NodeId>>;
}

/// In-process aggregator used by tests and the loopback demo
///
/// Implements the contract faithfully (dedup on idempotency key, explicit
/// rejections, timestamp-ordered pages) and adds failure injection so the
/// retry path can be exercised.
pub struct InMemoryAggregator {
    inner: parking_lot::Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Idempotency keys already accepted
    seen: std::collections::HashSet<Uuid>,

    /// Keys to refuse, with reasons
    reject: std::collections::HashMap<Uuid, String>,

    /// Accepted facts, in arrival order
    received: Vec<PushRecord>,

    /// Seeded remote logs, per origin
    logs: std::collections::HashMap<NodeId, Vec<Transaction>>,

    /// Remaining requests to fail with a transport error
    fail_next: u32,
}

impl InMemoryAggregator {
    /// Empty aggregator
    pub fn new() -> Self {
        Self {
            inner: parking_lot::Mutex::new(Inner::default()),
        }
    }

    /// Seed transactions as `origin`'s log
    pub fn seed_remote(&self, origin: &NodeId, txns: Vec<Transaction>) {
        let mut inner = self.inner.lock();
        let log = inner.logs.entry(origin.clone()).or_default();
        log.extend(txns);
        log.sort_by(|a, b| {
            (a.logical_timestamp, &a.origin_node_id, a.transaction_id).cmp(&(
                b.logical_timestamp,
                &b.origin_node_id,
                b.transaction_id,
            ))
        });
    }

    /// Fail the next `n` push/pull requests with a transport error
    pub fn fail_next(&self, n: u32) {
        self.inner.lock().fail_next = n;
    }

    /// Refuse this idempotency key with a reason
    pub fn reject(&self, idempotency_key: Uuid, reason: impl Into<String>) {
        self.inner.lock().reject.insert(idempotency_key, reason.into());
    }

    /// Facts accepted so far (test assertions)
    pub fn received(&self) -> Vec<PushRecord> {
        self.inner.lock().received.clone()
    }

    fn check_fail(inner: &mut Inner) -> Result<()> {
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(Error::Transport("injected failure".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Aggregator for InMemoryAggregator {
    async fn push(&self, records: Vec<PushRecord>) -> Result<PushResponse> {
        let mut inner = self.inner.lock();
        Self::check_fail(&mut inner)?;

        let mut response = PushResponse::default();
        for record in records {
            if let Some(reason) = inner.reject.get(&record.idempotency_key) {
                response.rejected.push(Rejection {
                    idempotency_key: record.idempotency_key,
                    reason: reason.clone(),
                });
                continue;
            }
            // Already-seen keys land in neither list
            if inner.seen.insert(record.idempotency_key) {
                response.accepted.push(record.idempotency_key);
                inner.received.push(record);
            }
        }
        Ok(response)
    }

    async fn pull(
        &self,
        origin: &NodeId,
        since: LogicalTimestamp,
        page_size: usize,
    ) -> Result<PullPage> {
        let mut inner = self.inner.lock();
        Self::check_fail(&mut inner)?;

        let log = inner.logs.get(origin).cloned().unwrap_or_default();
        let after: Vec<Transaction> = log
            .into_iter()
            .filter(|t| t.logical_timestamp > since)
            .collect();

        let done = after.len() <= page_size;
        let transactions: Vec<Transaction> = after.into_iter().take(page_size).collect();
        let next_cursor = transactions
            .last()
            .map(|t| t.logical_timestamp)
            .unwrap_or(since);

        Ok(PullPage {
            transactions,
            next_cursor,
            done,
        })
    }

    async fn origins(&self) -> Result<Vec<NodeId>> {
        let mut inner = self.inner.lock();
        Self::check_fail(&mut inner)?;
        Ok(inner.logs.keys().cloned().collect())
    }
}
