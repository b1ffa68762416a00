//! Durable outbox queue
//!
//! Decouples local commit from remote delivery: every appended transaction
//! (and every recorded fact) gets an outbox entry in the same write batch,
//! so there is never a committed fact without a pending delivery, nor a
//! pending delivery without a backing fact.
//!
//! Delivery semantics are at-least-once: entries survive crashes and
//! transient failures, and are removed only on aggregator acknowledgment or
//! an explicit administrative purge. Explicitly rejected entries are
//! quarantined (kept, excluded from automatic retry) for manual inspection.

use crate::{
    error::Result,
    storage::Storage,
    types::{OutboxEntry, SyncState},
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Handle over the outbox column family
#[derive(Clone)]
pub struct Outbox {
    storage: Arc<Storage>,
}

impl Outbox {
    /// Wrap storage
    pub(crate) fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Snapshot of entries due for delivery at `now`, oldest first, bounded
    /// by `max`. This is a read-only snapshot: callers perform network I/O
    /// without holding any ledger lock and mark results afterwards.
    pub fn pending(&self, now: DateTime<Utc>, max: usize) -> Result<Vec<OutboxEntry>> {
        let mut due: Vec<OutboxEntry> = self
            .storage
            .scan_outbox()?
            .into_iter()
            .filter(|e| e.is_due(now))
            .collect();
        due.sort_by_key(|e| e.created_at);
        due.truncate(max);
        Ok(due)
    }

    /// Mark entries as taken into an in-flight push batch; backing credit
    /// transactions transition LocalOnly -> Queued
    pub fn mark_queued(&self, entry_ids: &[Uuid]) -> Result<()> {
        for &id in entry_ids {
            let entry = self.storage.get_outbox_entry(id)?;
            if let crate::types::SyncFact::Credit(txn) = &entry.fact {
                self.storage
                    .update_transaction_sync_state(txn.transaction_id, SyncState::Queued)?;
            }
        }
        Ok(())
    }

    /// Aggregator acknowledged these ids: backing transactions become
    /// Acknowledged and the entries are removed
    pub fn mark_delivered(&self, entry_ids: &[Uuid]) -> Result<()> {
        for &id in entry_ids {
            self.storage.complete_outbox_entry_atomic(id)?;
            tracing::debug!(entry_id = %id, "Outbox entry delivered");
        }
        Ok(())
    }

    /// A push attempt failed transiently: bump attempt counts and schedule
    /// the next attempt. Entries are never dropped for transient failures.
    pub fn mark_failed(&self, entry_ids: &[Uuid], retry_after: Duration) -> Result<()> {
        let next_attempt_at = Utc::now() + retry_after;
        for &id in entry_ids {
            let mut entry = self.storage.get_outbox_entry(id)?;
            entry.attempt_count += 1;
            entry.next_attempt_at = next_attempt_at;
            self.storage.put_outbox_entry(&entry)?;
        }
        Ok(())
    }

    /// Aggregator explicitly rejected this entry: quarantine it (kept,
    /// excluded from automatic retry) for manual inspection
    pub fn quarantine(&self, entry_id: Uuid, reason: impl Into<String>) -> Result<()> {
        let mut entry = self.storage.get_outbox_entry(entry_id)?;
        let reason = reason.into();
        entry.rejected = Some(reason.clone());
        self.storage.put_outbox_entry(&entry)?;
        tracing::warn!(entry_id = %entry_id, reason = %reason, "Outbox entry quarantined");
        Ok(())
    }

    /// Remove an entry. Administrative action only; automatic paths never
    /// call this for undelivered entries.
    pub fn purge(&self, entry_id: Uuid) -> Result<()> {
        self.storage.delete_outbox_entry(entry_id)?;
        tracing::warn!(entry_id = %entry_id, "Outbox entry purged by administrative action");
        Ok(())
    }

    /// Undelivered, unquarantined entry count (operational surface)
    pub fn depth(&self) -> Result<u64> {
        Ok(self
            .storage
            .scan_outbox()?
            .iter()
            .filter(|e| !e.delivered && e.rejected.is_none())
            .count() as u64)
    }

    /// Quarantined entries awaiting manual inspection
    pub fn quarantined(&self) -> Result<Vec<OutboxEntry>> {
        Ok(self
            .storage
            .scan_outbox()?
            .into_iter()
            .filter(|e| e.rejected.is_some())
            .collect())
    }
}
