//! Pull-side reconciliation
//!
//! Merges pulled pages into the local ledger and advances the per-origin
//! cursor. The cursor moves only after every transaction on the page is
//! durably merged; a failure mid-page leaves the cursor behind, and the
//! retried page re-applies as idempotent no-ops.

use crate::{
    aggregator::PullPage,
    metrics::SYNC_PULL_MERGES_TOTAL,
    Result,
};
use ledger_store::{Ledger, MergeOutcome, NodeId};
use std::sync::Arc;

/// Counts of what a merged page did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Transactions inserted into local history
    pub applied: u64,

    /// Idempotent no-ops (already merged on a previous attempt)
    pub duplicates: u64,

    /// Merges that flagged an account disputed
    pub disputed: u64,
}

impl MergeStats {
    /// Accumulate another page's stats
    pub fn add(&mut self, other: MergeStats) {
        self.applied += other.applied;
        self.duplicates += other.duplicates;
        self.disputed += other.disputed;
    }
}

/// Merges remote history into the local ledger
#[derive(Clone)]
pub struct Reconciler {
    ledger: Arc<Ledger>,
}

impl Reconciler {
    /// New reconciler over a ledger
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Merge one pulled page from `origin`, then advance its cursor
    pub fn merge_page(&self, origin: &NodeId, page: &PullPage) -> Result<MergeStats> {
        let mut stats = MergeStats::default();

        for txn in &page.transactions {
            match self.ledger.merge_remote(txn.clone())? {
                MergeOutcome::Applied => {
                    stats.applied += 1;
                    SYNC_PULL_MERGES_TOTAL.with_label_values(&["applied"]).inc();
                }
                MergeOutcome::AlreadyApplied => {
                    stats.duplicates += 1;
                    SYNC_PULL_MERGES_TOTAL.with_label_values(&["duplicate"]).inc();
                }
                MergeOutcome::Disputed { balance } => {
                    stats.applied += 1;
                    stats.disputed += 1;
                    SYNC_PULL_MERGES_TOTAL.with_label_values(&["disputed"]).inc();
                    tracing::warn!(
                        origin = %origin,
                        transaction_id = %txn.transaction_id,
                        account_id = %txn.account_id,
                        balance,
                        "Pulled transaction flagged an account disputed"
                    );
                }
            }
        }

        // Everything on the page is durable; the cursor may move
        if !page.transactions.is_empty() {
            self.ledger.advance_cursor(origin, page.next_cursor)?;
        }

        tracing::debug!(
            origin = %origin,
            applied = stats.applied,
            duplicates = stats.duplicates,
            disputed = stats.disputed,
            "Pulled page merged"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledger_store::{
        AccountId, Config, CreditReason, LogicalTimestamp, SyncState, Transaction,
    };
    use uuid::Uuid;

    fn create_test_ledger() -> (Arc<Ledger>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.node_id = "node-local".to_string();
        (Arc::new(Ledger::open(config).unwrap()), temp_dir)
    }

    fn txn(ts: u64, delta: i64) -> Transaction {
        Transaction {
            transaction_id: Uuid::new_v4(),
            account_id: AccountId::new("user_a"),
            delta,
            reason: CreditReason::TeachCompleted,
            origin_node_id: NodeId::new("node-remote"),
            logical_timestamp: LogicalTimestamp(ts),
            created_at: Utc::now(),
            sync_state: SyncState::LocalOnly,
            note: None,
        }
    }

    #[test]
    fn test_merge_page_advances_cursor_after_durable_merge() {
        let (ledger, _tmp) = create_test_ledger();
        let reconciler = Reconciler::new(ledger.clone());
        let origin = NodeId::new("node-remote");

        let page = PullPage {
            transactions: vec![txn(1, 5), txn(2, 3)],
            next_cursor: LogicalTimestamp(2),
            done: true,
        };

        let stats = reconciler.merge_page(&origin, &page).unwrap();
        assert_eq!(stats.applied, 2);
        assert_eq!(stats.duplicates, 0);

        let cursor = ledger.cursor(&origin).unwrap().unwrap();
        assert_eq!(cursor.last_pulled, LogicalTimestamp(2));
        assert_eq!(ledger.balance(&AccountId::new("user_a")).unwrap(), 8);
    }

    #[test]
    fn test_replayed_page_is_idempotent() {
        let (ledger, _tmp) = create_test_ledger();
        let reconciler = Reconciler::new(ledger.clone());
        let origin = NodeId::new("node-remote");

        let page = PullPage {
            transactions: vec![txn(1, 5)],
            next_cursor: LogicalTimestamp(1),
            done: true,
        };

        reconciler.merge_page(&origin, &page).unwrap();
        let stats = reconciler.merge_page(&origin, &page).unwrap();
        assert_eq!(stats.applied, 0);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(ledger.balance(&AccountId::new("user_a")).unwrap(), 5);
    }

    #[test]
    fn test_empty_page_leaves_cursor_alone() {
        let (ledger, _tmp) = create_test_ledger();
        let reconciler = Reconciler::new(ledger.clone());
        let origin = NodeId::new("node-remote");

        let page = PullPage {
            transactions: vec![],
            next_cursor: LogicalTimestamp::ZERO,
            done: true,
        };

        reconciler.merge_page(&origin, &page).unwrap();
        assert!(ledger.cursor(&origin).unwrap().is_none());
    }
}
