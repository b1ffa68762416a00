//! Main ledger orchestration layer
//!
//! Ties storage, clock, and outbox together into the high-level API that
//! service layers use. The ledger is locally authoritative: appends succeed
//! or fail purely on local state and never touch the network, so offline
//! operation is never degraded.
//!
//! # Example
//!
//! ```no_run
//! use ledger_store::{AccountId, Config, CreditReason, Ledger};
//!
//! fn main() -> ledger_store::Result<()> {
//!     let ledger = Ledger::open(Config::default())?;
//!     let account = AccountId::derive("device-fingerprint");
//!
//!     ledger.append(&account, 10, CreditReason::InitialGrant, None)?;
//!     assert_eq!(ledger.balance(&account)?, 10);
//!     Ok(())
//! }
//! ```

use crate::{
    clock::LamportClock,
    metrics::Metrics,
    outbox::Outbox,
    storage::{Storage, StorageStats},
    types::{
        AccountId, AccountRecord, AccountStatus, CreditReason, MergeOutcome, NodeId, OutboxEntry,
        SyncCursor, SyncFact, SyncState, Transaction,
    },
    Config, Error, Result,
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use uuid::Uuid;

/// Main ledger interface
pub struct Ledger {
    /// Durable storage
    storage: Arc<Storage>,

    /// Outbox over the same storage
    outbox: Outbox,

    /// Lamport clock, restored from the persisted high-water mark
    clock: LamportClock,

    /// This node's identity (stamped on every authored transaction)
    node_id: NodeId,

    /// Per-account write locks: one account's append/merge calls are
    /// mutually exclusive, different accounts proceed concurrently
    locks: DashMap<AccountId, Arc<Mutex<()>>>,

    /// Set on a failed durability check; all mutations refuse until repair
    halted: RwLock<Option<String>>,

    /// Metrics
    metrics: Metrics,

    /// Configuration
    config: Config,

    /// When armed, the next committed transaction is tampered with before
    /// its read-back, forcing the durability check down the mismatch path
    #[cfg(test)]
    tamper_next_write: std::sync::atomic::AtomicBool,
}

impl Ledger {
    /// Open ledger with configuration
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(Storage::open(&config)?);
        let high_water = storage.clock_high_water()?;
        let metrics = Metrics::new().map_err(|e| Error::Config(e.to_string()))?;

        tracing::info!(
            node_id = %config.node_id,
            clock_high_water = high_water,
            "Ledger opened"
        );

        Ok(Self {
            outbox: Outbox::new(storage.clone()),
            clock: LamportClock::new(high_water),
            node_id: NodeId::new(config.node_id.clone()),
            locks: DashMap::new(),
            halted: RwLock::new(None),
            metrics,
            storage,
            config,
            #[cfg(test)]
            tamper_next_write: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// This node's identity
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Outbox handle (drained by the sync client)
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Metrics handle
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn account_lock(&self, account: &AccountId) -> Arc<Mutex<()>> {
        self.locks
            .entry(account.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn check_halted(&self) -> Result<()> {
        if let Some(reason) = self.halted.read().as_ref() {
            return Err(Error::LedgerHalted(reason.clone()));
        }
        Ok(())
    }

    /// The '|' byte terminates the account in the history index key; an id
    /// containing it would alias into another account's prefix scan
    fn check_key_safe(kind: &str, value: &str) -> Result<()> {
        if value.is_empty() {
            return Err(Error::InvalidRecord(format!("{} must not be empty", kind)));
        }
        if value.contains('|') {
            return Err(Error::InvalidRecord(format!(
                "{} must not contain '|' (reserved key separator): {}",
                kind, value
            )));
        }
        Ok(())
    }

    fn halt(&self, reason: String) {
        tracing::error!(reason = %reason, "Halting ledger; mutations refused until repair");
        *self.halted.write() = Some(reason);
    }

    /// Append a locally authored credit transaction
    ///
    /// Validates the non-negative-balance invariant against the folded
    /// history, assigns a fresh logical timestamp, and commits the
    /// transaction together with its outbox entry in one durable batch.
    /// The call returns only after the write is durable.
    pub fn append(
        &self,
        account_id: &AccountId,
        delta: i64,
        reason: CreditReason,
        note: Option<String>,
    ) -> Result<Transaction> {
        self.check_halted()?;
        Self::check_key_safe("account id", account_id.as_str())?;
        let timer = self.metrics.append_duration.start_timer();

        let lock = self.account_lock(account_id);
        let _guard = lock.lock();

        let record = self
            .storage
            .get_account(account_id)?
            .unwrap_or_else(|| AccountRecord::new(account_id.clone()));

        if delta < 0 && record.is_disputed() {
            self.metrics.appends_refused_total.inc();
            return Err(Error::DisputedAccount(account_id.to_string()));
        }

        let balance = self.fold_balance(account_id)?;
        if delta < 0 && balance + delta < 0 {
            self.metrics.appends_refused_total.inc();
            return Err(Error::InsufficientCredits {
                account: account_id.to_string(),
                balance,
                delta,
            });
        }

        let txn = Transaction {
            transaction_id: Uuid::new_v4(),
            account_id: account_id.clone(),
            delta,
            reason,
            origin_node_id: self.node_id.clone(),
            logical_timestamp: self.clock.tick(),
            created_at: Utc::now(),
            sync_state: SyncState::LocalOnly,
            note,
        };
        let entry = OutboxEntry::new(SyncFact::Credit(txn.clone()));

        self.storage
            .append_transaction_atomic(&txn, &entry, &record, self.clock.current())?;
        self.verify_durable(&txn)?;

        self.metrics.appends_total.inc();
        timer.observe_duration();
        tracing::debug!(
            transaction_id = %txn.transaction_id,
            account_id = %account_id,
            delta,
            reason = %reason,
            logical_timestamp = %txn.logical_timestamp,
            "Transaction appended"
        );

        Ok(txn)
    }

    /// Current balance: pure fold over history, idempotent, side-effect-free
    pub fn balance(&self, account_id: &AccountId) -> Result<i64> {
        self.fold_balance(account_id)
    }

    /// Full history ordered by (logical_timestamp, origin_node_id)
    pub fn history(&self, account_id: &AccountId) -> Result<Vec<Transaction>> {
        self.storage.account_history(account_id)
    }

    /// Merge a remotely authored transaction into local history
    ///
    /// Idempotent: a duplicate transaction id is a no-op. A merge that
    /// drives the recomputed balance negative flags the account Disputed
    /// rather than dropping or clamping the entry; the conflict is
    /// surfaced, never auto-resolved.
    pub fn merge_remote(&self, txn: Transaction) -> Result<MergeOutcome> {
        self.check_halted()?;
        Self::check_key_safe("account id", txn.account_id.as_str())?;
        Self::check_key_safe("origin node id", txn.origin_node_id.as_str())?;

        let lock = self.account_lock(&txn.account_id);
        let _guard = lock.lock();

        if self.storage.has_transaction(txn.transaction_id)? {
            self.metrics.merge_duplicates_total.inc();
            tracing::debug!(
                transaction_id = %txn.transaction_id,
                "Merge skipped: transaction already applied"
            );
            return Ok(MergeOutcome::AlreadyApplied);
        }

        // Lamport receive rule: future local timestamps exceed this one
        self.clock.observe(txn.logical_timestamp);

        // Merged copies are never ours to deliver
        let mut stored = txn.clone();
        stored.sync_state = SyncState::Acknowledged;

        let new_balance = self.fold_balance(&txn.account_id)? + txn.delta;
        let mut record = self
            .storage
            .get_account(&txn.account_id)?
            .unwrap_or_else(|| AccountRecord::new(txn.account_id.clone()));

        let disputed = new_balance < 0;
        if disputed && !record.is_disputed() {
            record.status = AccountStatus::Disputed;
            record.disputed_at = Some(Utc::now());
        }

        self.storage
            .merge_transaction_atomic(&stored, &record, self.clock.current())?;
        self.verify_durable(&stored)?;

        self.metrics.merges_total.inc();

        if disputed {
            self.metrics
                .disputed_accounts
                .set(self.storage.disputed_count()? as i64);
            tracing::warn!(
                account_id = %txn.account_id,
                transaction_id = %txn.transaction_id,
                balance = new_balance,
                "Merge produced a negative balance; account flagged disputed"
            );
            return Ok(MergeOutcome::Disputed {
                balance: new_balance,
            });
        }

        tracing::debug!(
            transaction_id = %txn.transaction_id,
            account_id = %txn.account_id,
            origin = %txn.origin_node_id,
            "Remote transaction merged"
        );
        Ok(MergeOutcome::Applied)
    }

    /// Record a non-credit syncable fact (gig application, progress record)
    ///
    /// Durable insert plus outbox enqueue in one batch; idempotent on the
    /// fact's id. Credit transactions must go through `append`.
    pub fn record_fact(&self, fact: SyncFact) -> Result<()> {
        self.check_halted()?;

        if matches!(fact, SyncFact::Credit(_)) {
            return Err(Error::InvalidRecord(
                "credit transactions are appended, not recorded as facts".to_string(),
            ));
        }
        Self::check_key_safe("account id", fact.account_id().as_str())?;

        let lock = self.account_lock(fact.account_id());
        let _guard = lock.lock();

        if self.storage.has_fact(fact.fact_id())? {
            return Ok(());
        }

        let entry = OutboxEntry::new(fact.clone());
        self.storage.record_fact_atomic(&fact, &entry)?;

        tracing::debug!(
            fact_id = %fact.fact_id(),
            kind = fact.kind(),
            account_id = %fact.account_id(),
            "Fact recorded"
        );
        Ok(())
    }

    /// Operator action: clear a dispute after a manual reversal has been
    /// appended. Succeeds only if the recomputed balance is non-negative;
    /// there is no automatic resolution path.
    pub fn resolve_dispute(&self, account_id: &AccountId) -> Result<i64> {
        self.check_halted()?;

        let lock = self.account_lock(account_id);
        let _guard = lock.lock();

        let mut record = self
            .storage
            .get_account(account_id)?
            .ok_or_else(|| Error::AccountNotFound(account_id.to_string()))?;

        let balance = self.fold_balance(account_id)?;
        if !record.is_disputed() {
            return Ok(balance);
        }
        if balance < 0 {
            return Err(Error::DisputedAccount(account_id.to_string()));
        }

        record.status = AccountStatus::Active;
        record.disputed_at = None;
        self.storage.put_account(&record)?;
        self.metrics
            .disputed_accounts
            .set(self.storage.disputed_count()? as i64);

        tracing::info!(account_id = %account_id, balance, "Dispute resolved by operator");
        Ok(balance)
    }

    /// Account status, if the account has been seen
    pub fn account(&self, account_id: &AccountId) -> Result<Option<AccountRecord>> {
        self.storage.get_account(account_id)
    }

    // Sync support (used by the sync engine)

    /// Pull cursor for a remote origin
    pub fn cursor(&self, origin: &NodeId) -> Result<Option<SyncCursor>> {
        self.storage.get_cursor(origin)
    }

    /// Advance the pull cursor for a remote origin; called only after the
    /// corresponding merge batch is durably applied
    pub fn advance_cursor(
        &self,
        origin: &NodeId,
        last_pulled: crate::types::LogicalTimestamp,
    ) -> Result<()> {
        let cursor = SyncCursor {
            origin_node_id: origin.clone(),
            last_pulled,
            updated_at: Utc::now(),
        };
        self.storage.put_cursor(&cursor)
    }

    /// All known pull cursors
    pub fn cursors(&self) -> Result<Vec<SyncCursor>> {
        self.storage.list_cursors()
    }

    /// Wall-clock time of the last successful sync cycle
    pub fn last_sync_at(&self) -> Result<Option<chrono::DateTime<Utc>>> {
        self.storage.last_sync_at()
    }

    /// Record a successful sync cycle
    pub fn set_last_sync_at(&self, at: chrono::DateTime<Utc>) -> Result<()> {
        self.storage.put_last_sync_at(at)
    }

    // Operational surface

    /// Number of accounts currently flagged disputed
    pub fn disputed_count(&self) -> Result<u64> {
        self.storage.disputed_count()
    }

    /// Export the full transaction log (operational tooling)
    pub fn export_ledger(&self) -> Result<Vec<Transaction>> {
        self.storage.all_transactions()
    }

    /// All recorded non-credit facts (service state rebuild on startup)
    pub fn facts(&self) -> Result<Vec<SyncFact>> {
        self.storage.all_facts()
    }

    /// Storage statistics; also refreshes the depth/dispute gauges
    pub fn stats(&self) -> Result<StorageStats> {
        let stats = self.storage.get_stats()?;
        self.metrics.outbox_depth.set(stats.outbox_depth as i64);
        self.metrics
            .disputed_accounts
            .set(self.storage.disputed_count()? as i64);
        Ok(stats)
    }

    // Internals

    /// Arm the tamper seam: the next mutation fails its durability check
    #[cfg(test)]
    fn arm_tamper(&self) {
        self.tamper_next_write
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn fold_balance(&self, account_id: &AccountId) -> Result<i64> {
        let history = self.storage.account_history(account_id)?;
        Ok(history.iter().map(|t| t.delta).sum())
    }

    /// Read back a committed transaction; a mismatch means the store can no
    /// longer be trusted to uphold the balance invariant
    fn verify_durable(&self, txn: &Transaction) -> Result<()> {
        if !self.config.verify_writes {
            return Ok(());
        }

        #[cfg(test)]
        if self
            .tamper_next_write
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            self.storage.tamper_transaction_delta(txn.transaction_id)?;
        }

        match self.storage.get_transaction(txn.transaction_id) {
            Ok(stored)
                if stored.transaction_id == txn.transaction_id
                    && stored.account_id == txn.account_id
                    && stored.delta == txn.delta =>
            {
                Ok(())
            }
            Ok(_) => {
                let reason = format!(
                    "durability check mismatch for transaction {}",
                    txn.transaction_id
                );
                self.halt(reason.clone());
                Err(Error::Corruption(reason))
            }
            Err(e) => {
                let reason = format!(
                    "durability check failed for transaction {}: {}",
                    txn.transaction_id, e
                );
                self.halt(reason.clone());
                Err(Error::Corruption(reason))
            }
        }
    }
}
