//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `transactions` - Append-only transaction log (key: transaction_id)
//! - `account_index` - History index (key: account | ts_be | origin | txn_id);
//!   RocksDB iteration order over this index IS history order
//! - `accounts` - Account records, status only (key: account_id)
//! - `facts` - Non-credit syncable facts (key: fact_id)
//! - `outbox` - Pending delivery queue (key: entry_id)
//! - `cursors` - Per-remote-origin pull cursors (key: origin_node_id)
//! - `meta` - Clock high-water mark, last-sync timestamp

use crate::{
    error::{Error, Result},
    types::{
        AccountId, AccountRecord, AccountStatus, NodeId, OutboxEntry, SyncCursor, SyncFact,
        SyncState, Transaction,
    },
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_TRANSACTIONS: &str = "transactions";
const CF_ACCOUNT_INDEX: &str = "account_index";
const CF_ACCOUNTS: &str = "accounts";
const CF_FACTS: &str = "facts";
const CF_OUTBOX: &str = "outbox";
const CF_CURSORS: &str = "cursors";
const CF_META: &str = "meta";

/// Meta keys
const KEY_CLOCK_HIGH_WATER: &[u8] = b"clock_high_water";
const KEY_LAST_SYNC_AT: &[u8] = b"last_sync_at";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    fsync_writes: bool,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for the append-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_ACCOUNT_INDEX, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_small()),
            ColumnFamilyDescriptor::new(CF_FACTS, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_OUTBOX, Self::cf_options_small()),
            ColumnFamilyDescriptor::new(CF_CURSORS, Self::cf_options_small()),
            ColumnFamilyDescriptor::new(CF_META, Self::cf_options_small()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened ledger storage");

        Ok(Self {
            db: Arc::new(db),
            fsync_writes: config.rocksdb.fsync_writes,
        })
    }

    // Column family options

    fn cf_options_log() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_options_small() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Commit a batch; fsync before returning when configured (durability
    /// precedes acknowledgment to the caller)
    fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.fsync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    // Key encoding

    /// History index key: account | '|' | ts_be | origin | '|' | txn_id.
    /// Byte order over these keys gives (logical_timestamp, origin_node_id,
    /// transaction_id) order per account, the canonical history order.
    fn index_key(
        account: &AccountId,
        ts: crate::types::LogicalTimestamp,
        origin: &NodeId,
        txn_id: Uuid,
    ) -> Vec<u8> {
        let mut key = account.as_str().as_bytes().to_vec();
        key.push(b'|');
        key.extend_from_slice(&ts.as_u64().to_be_bytes());
        key.extend_from_slice(origin.as_str().as_bytes());
        key.push(b'|');
        key.extend_from_slice(txn_id.as_bytes());
        key
    }

    fn index_prefix(account: &AccountId) -> Vec<u8> {
        let mut key = account.as_str().as_bytes().to_vec();
        key.push(b'|');
        key
    }

    // Transaction operations

    /// Append a locally authored transaction with its outbox entry, account
    /// record and clock high-water mark in one atomic, durable batch
    pub fn append_transaction_atomic(
        &self,
        txn: &Transaction,
        entry: &OutboxEntry,
        account: &AccountRecord,
        clock_high_water: u64,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();

        self.stage_transaction(&mut batch, txn)?;

        let cf_outbox = self.cf_handle(CF_OUTBOX)?;
        batch.put_cf(cf_outbox, entry.entry_id.as_bytes(), bincode::serialize(entry)?);

        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        batch.put_cf(
            cf_accounts,
            account.account_id.as_str().as_bytes(),
            bincode::serialize(account)?,
        );

        self.stage_clock(&mut batch, clock_high_water)?;

        self.commit(batch)
    }

    /// Insert a remotely authored transaction (no outbox entry; the origin
    /// node owns delivery of its own facts)
    pub fn merge_transaction_atomic(
        &self,
        txn: &Transaction,
        account: &AccountRecord,
        clock_high_water: u64,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();

        self.stage_transaction(&mut batch, txn)?;

        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        batch.put_cf(
            cf_accounts,
            account.account_id.as_str().as_bytes(),
            bincode::serialize(account)?,
        );

        self.stage_clock(&mut batch, clock_high_water)?;

        self.commit(batch)
    }

    fn stage_transaction(&self, batch: &mut WriteBatch, txn: &Transaction) -> Result<()> {
        let cf_txns = self.cf_handle(CF_TRANSACTIONS)?;
        batch.put_cf(cf_txns, txn.transaction_id.as_bytes(), bincode::serialize(txn)?);

        let cf_index = self.cf_handle(CF_ACCOUNT_INDEX)?;
        let idx_key = Self::index_key(
            &txn.account_id,
            txn.logical_timestamp,
            &txn.origin_node_id,
            txn.transaction_id,
        );
        batch.put_cf(cf_index, &idx_key, []);
        Ok(())
    }

    fn stage_clock(&self, batch: &mut WriteBatch, high_water: u64) -> Result<()> {
        let cf_meta = self.cf_handle(CF_META)?;
        batch.put_cf(cf_meta, KEY_CLOCK_HIGH_WATER, high_water.to_be_bytes());
        Ok(())
    }

    /// Get transaction by ID
    pub fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let value = self
            .db
            .get_cf(cf, transaction_id.as_bytes())?
            .ok_or_else(|| Error::TransactionNotFound(transaction_id.to_string()))?;

        let txn: Transaction = bincode::deserialize(&value)?;
        Ok(txn)
    }

    /// Is the transaction already present? (merge idempotency check)
    pub fn has_transaction(&self, transaction_id: Uuid) -> Result<bool> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        Ok(self.db.get_cf(cf, transaction_id.as_bytes())?.is_some())
    }

    /// Rewrite a transaction's sync_state (the only mutable field)
    pub fn update_transaction_sync_state(
        &self,
        transaction_id: Uuid,
        sync_state: SyncState,
    ) -> Result<()> {
        let mut txn = self.get_transaction(transaction_id)?;
        if txn.sync_state > sync_state {
            // Forward-only; a stale marker must not rewind state
            return Ok(());
        }
        txn.sync_state = sync_state;

        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        self.db
            .put_cf(cf, transaction_id.as_bytes(), bincode::serialize(&txn)?)?;
        Ok(())
    }

    /// Overwrite a committed transaction with an altered delta, so the
    /// read-back check sees a record that no longer matches what was
    /// acknowledged
    #[cfg(test)]
    pub(crate) fn tamper_transaction_delta(&self, transaction_id: Uuid) -> Result<()> {
        let mut txn = self.get_transaction(transaction_id)?;
        txn.delta += 1;
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        self.db
            .put_cf(cf, transaction_id.as_bytes(), bincode::serialize(&txn)?)?;
        Ok(())
    }

    /// Full history for an account, ordered by (logical_timestamp,
    /// origin_node_id, transaction_id)
    pub fn account_history(&self, account: &AccountId) -> Result<Vec<Transaction>> {
        let cf_index = self.cf_handle(CF_ACCOUNT_INDEX)?;
        let prefix = Self::index_prefix(account);

        let iter = self.db.iterator_cf(
            cf_index,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        let mut history = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if key.len() < 16 {
                return Err(Error::Corruption(format!(
                    "account index key too short for {}",
                    account
                )));
            }
            let txn_id_bytes: [u8; 16] = key[key.len() - 16..]
                .try_into()
                .map_err(|_| Error::Corruption("malformed account index key".to_string()))?;
            let txn_id = Uuid::from_bytes(txn_id_bytes);

            // An index entry pointing at a missing transaction invalidates
            // the balance invariant; surface it as corruption
            let txn = self.get_transaction(txn_id).map_err(|e| match e {
                Error::TransactionNotFound(id) => {
                    Error::Corruption(format!("index references missing transaction {}", id))
                }
                other => other,
            })?;
            history.push(txn);
        }

        Ok(history)
    }

    /// All transactions in the store (history export for operational tooling)
    pub fn all_transactions(&self) -> Result<Vec<Transaction>> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    // Account operations

    /// Get account record, if the account has been seen
    pub fn get_account(&self, account: &AccountId) -> Result<Option<AccountRecord>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        match self.db.get_cf(cf, account.as_str().as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Put account record
    pub fn put_account(&self, record: &AccountRecord) -> Result<()> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(
            cf,
            record.account_id.as_str().as_bytes(),
            bincode::serialize(record)?,
        );
        self.commit(batch)
    }

    /// Number of accounts currently flagged disputed
    pub fn disputed_count(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let record: AccountRecord = bincode::deserialize(&value)?;
            if record.status == AccountStatus::Disputed {
                count += 1;
            }
        }
        Ok(count)
    }

    // Fact operations

    /// Record a non-credit fact with its outbox entry in one durable batch
    pub fn record_fact_atomic(&self, fact: &SyncFact, entry: &OutboxEntry) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_facts = self.cf_handle(CF_FACTS)?;
        batch.put_cf(cf_facts, fact.fact_id().as_bytes(), bincode::serialize(fact)?);

        let cf_outbox = self.cf_handle(CF_OUTBOX)?;
        batch.put_cf(cf_outbox, entry.entry_id.as_bytes(), bincode::serialize(entry)?);

        self.commit(batch)
    }

    /// Is the fact already present? (idempotent service retries)
    pub fn has_fact(&self, fact_id: Uuid) -> Result<bool> {
        let cf = self.cf_handle(CF_FACTS)?;
        Ok(self.db.get_cf(cf, fact_id.as_bytes())?.is_some())
    }

    /// All recorded non-credit facts (service state rebuild on startup)
    pub fn all_facts(&self) -> Result<Vec<SyncFact>> {
        let cf = self.cf_handle(CF_FACTS)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    // Outbox operations

    /// Get outbox entry by ID
    pub fn get_outbox_entry(&self, entry_id: Uuid) -> Result<OutboxEntry> {
        let cf = self.cf_handle(CF_OUTBOX)?;
        let value = self
            .db
            .get_cf(cf, entry_id.as_bytes())?
            .ok_or_else(|| Error::OutboxEntryNotFound(entry_id.to_string()))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Rewrite an outbox entry (attempt bookkeeping, quarantine)
    pub fn put_outbox_entry(&self, entry: &OutboxEntry) -> Result<()> {
        let cf = self.cf_handle(CF_OUTBOX)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, entry.entry_id.as_bytes(), bincode::serialize(entry)?);
        self.commit(batch)
    }

    /// Scan all outbox entries
    pub fn scan_outbox(&self) -> Result<Vec<OutboxEntry>> {
        let cf = self.cf_handle(CF_OUTBOX)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            entries.push(bincode::deserialize(&value)?);
        }
        Ok(entries)
    }

    /// Mark an entry delivered: flip the backing transaction to
    /// Acknowledged and drop the entry, atomically
    pub fn complete_outbox_entry_atomic(&self, entry_id: Uuid) -> Result<()> {
        let entry = self.get_outbox_entry(entry_id)?;

        let mut batch = WriteBatch::default();

        if let SyncFact::Credit(inner) = &entry.fact {
            let mut txn = self.get_transaction(inner.transaction_id)?;
            txn.sync_state = SyncState::Acknowledged;
            let cf_txns = self.cf_handle(CF_TRANSACTIONS)?;
            batch.put_cf(cf_txns, txn.transaction_id.as_bytes(), bincode::serialize(&txn)?);
        }

        let cf_outbox = self.cf_handle(CF_OUTBOX)?;
        batch.delete_cf(cf_outbox, entry_id.as_bytes());

        self.commit(batch)
    }

    /// Remove an outbox entry (explicit administrative purge only)
    pub fn delete_outbox_entry(&self, entry_id: Uuid) -> Result<()> {
        let cf = self.cf_handle(CF_OUTBOX)?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(cf, entry_id.as_bytes());
        self.commit(batch)
    }

    // Cursor operations

    /// Get pull cursor for a remote origin
    pub fn get_cursor(&self, origin: &NodeId) -> Result<Option<SyncCursor>> {
        let cf = self.cf_handle(CF_CURSORS)?;
        match self.db.get_cf(cf, origin.as_str().as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Put pull cursor
    pub fn put_cursor(&self, cursor: &SyncCursor) -> Result<()> {
        let cf = self.cf_handle(CF_CURSORS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(
            cf,
            cursor.origin_node_id.as_str().as_bytes(),
            bincode::serialize(cursor)?,
        );
        self.commit(batch)
    }

    /// All known cursors
    pub fn list_cursors(&self) -> Result<Vec<SyncCursor>> {
        let cf = self.cf_handle(CF_CURSORS)?;
        let mut cursors = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            cursors.push(bincode::deserialize(&value)?);
        }
        Ok(cursors)
    }

    // Meta operations

    /// Persisted clock high-water mark (0 on a fresh store)
    pub fn clock_high_water(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(cf, KEY_CLOCK_HIGH_WATER)? {
            Some(value) => {
                let bytes: [u8; 8] = value
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Corruption("malformed clock high-water mark".to_string()))?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    /// Record the wall-clock time of the last successful sync cycle
    pub fn put_last_sync_at(&self, at: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let cf = self.cf_handle(CF_META)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, KEY_LAST_SYNC_AT, at.timestamp_millis().to_be_bytes());
        self.commit(batch)
    }

    /// Wall-clock time of the last successful sync cycle, if any
    pub fn last_sync_at(&self) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(cf, KEY_LAST_SYNC_AT)? {
            Some(value) => {
                let bytes: [u8; 8] = value
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Corruption("malformed last-sync timestamp".to_string()))?;
                Ok(chrono::DateTime::from_timestamp_millis(i64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        let cf_txns = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;

        let total_transactions = self.approximate_count(cf_txns)?;
        let total_accounts = self.approximate_count(cf_accounts)?;
        let outbox_depth = self
            .scan_outbox()?
            .iter()
            .filter(|e| !e.delivered && e.rejected.is_none())
            .count() as u64;

        Ok(StorageStats {
            total_transactions,
            total_accounts,
            outbox_depth,
        })
    }

    fn approximate_count(&self, cf: &ColumnFamily) -> Result<u64> {
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(prop)
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Approximate transaction count (RocksDB estimate)
    pub total_transactions: u64,
    /// Approximate account count (RocksDB estimate)
    pub total_accounts: u64,
    /// Exact count of undelivered, unquarantined outbox entries
    pub outbox_depth: u64,
}
