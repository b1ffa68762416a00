//! End-to-end sync scenarios
//!
//! Exercises the full push/pull loop over the in-process aggregator:
//! offline accumulation, at-least-once redelivery, quarantine, paged pulls
//! with cursor resume, and two-node convergence.

use chrono::Utc;
use ledger_store::{
    AccountId, Config, CreditReason, Ledger, LogicalTimestamp, NodeId, SyncState, Transaction,
};
use std::sync::Arc;
use sync_engine::{Aggregator, InMemoryAggregator, PushRecord, SyncClient, SyncConfig};
use uuid::Uuid;

fn create_test_ledger(node_id: &str) -> (Arc<Ledger>, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    config.node_id = node_id.to_string();
    (Arc::new(Ledger::open(config).unwrap()), temp_dir)
}

fn client(ledger: Arc<Ledger>, aggregator: Arc<InMemoryAggregator>) -> SyncClient {
    SyncClient::new(ledger, aggregator, SyncConfig::default())
}

fn remote_txn(account: &AccountId, delta: i64, ts: u64, origin: &str) -> Transaction {
    Transaction {
        transaction_id: Uuid::new_v4(),
        account_id: account.clone(),
        delta,
        reason: CreditReason::TeachCompleted,
        origin_node_id: NodeId::new(origin),
        logical_timestamp: LogicalTimestamp(ts),
        created_at: Utc::now(),
        sync_state: SyncState::LocalOnly,
        note: None,
    }
}

/// Credits earned offline are queued durably and delivered once
/// connectivity returns; delivery flips them to Acknowledged
#[tokio::test]
async fn test_offline_accumulation_then_sync() {
    let (ledger, _tmp) = create_test_ledger("node-1");
    let aggregator = Arc::new(InMemoryAggregator::new());
    let account = AccountId::new("user_a");

    // Three days offline
    ledger.append(&account, 5, CreditReason::TeachCompleted, None).unwrap();
    ledger.append(&account, 5, CreditReason::TeachCompleted, None).unwrap();
    ledger.append(&account, -3, CreditReason::LearnConsumed, None).unwrap();
    assert_eq!(ledger.balance(&account).unwrap(), 7);
    assert_eq!(ledger.outbox().depth().unwrap(), 3);

    // Connectivity returns
    let sync = client(ledger.clone(), aggregator.clone());
    let stats = sync.push_cycle().await.unwrap();

    assert_eq!(stats.delivered, 3);
    assert_eq!(ledger.outbox().depth().unwrap(), 0);
    assert_eq!(aggregator.received().len(), 3);
    assert!(ledger
        .history(&account)
        .unwrap()
        .iter()
        .all(|t| t.sync_state == SyncState::Acknowledged));

    // Balance unaffected by sync
    assert_eq!(ledger.balance(&account).unwrap(), 7);
}

/// A crash after aggregator acceptance but before the local ack is
/// recorded causes redelivery; the idempotency key prevents double-count
#[tokio::test]
async fn test_at_least_once_redelivery_not_double_counted() {
    let (ledger, _tmp) = create_test_ledger("node-1");
    let aggregator = Arc::new(InMemoryAggregator::new());
    let account = AccountId::new("user_a");

    let txn = ledger.append(&account, 5, CreditReason::TeachCompleted, None).unwrap();

    // The first attempt reached the aggregator, but the node crashed
    // before recording the acknowledgment
    let entry = ledger.outbox().pending(Utc::now(), 10).unwrap().remove(0);
    aggregator
        .push(vec![PushRecord {
            idempotency_key: entry.entry_id,
            fact: entry.fact.clone(),
        }])
        .await
        .unwrap();
    assert_eq!(ledger.outbox().depth().unwrap(), 1);

    // After restart the entry is still pending and gets redelivered; the
    // aggregator reports it as already known and the client acks locally
    let sync = client(ledger.clone(), aggregator.clone());
    let stats = sync.push_cycle().await.unwrap();

    assert_eq!(stats.delivered, 1);
    assert_eq!(ledger.outbox().depth().unwrap(), 0);
    assert_eq!(aggregator.received().len(), 1);
    assert_eq!(
        ledger.history(&account).unwrap()[0].sync_state,
        SyncState::Acknowledged
    );
    let _ = txn;
}

/// Transient failures reschedule the whole batch with backoff; nothing is
/// dropped and nothing is delivered early
#[tokio::test]
async fn test_transient_failure_reschedules_batch() {
    let (ledger, _tmp) = create_test_ledger("node-1");
    let aggregator = Arc::new(InMemoryAggregator::new());
    let account = AccountId::new("user_a");

    ledger.append(&account, 5, CreditReason::TeachCompleted, None).unwrap();
    ledger.append(&account, 2, CreditReason::ModuleCompleted, None).unwrap();

    aggregator.fail_next(1);
    let sync = client(ledger.clone(), aggregator.clone());

    let stats = sync.push_cycle().await.unwrap();
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.delivered, 0);

    // Entries survive but are not due until their backoff elapses
    assert_eq!(ledger.outbox().depth().unwrap(), 2);
    assert!(ledger.outbox().pending(Utc::now(), 10).unwrap().is_empty());

    // Once due again, delivery succeeds
    let later = Utc::now() + chrono::Duration::seconds(3);
    let due = ledger.outbox().pending(later, 10).unwrap();
    assert_eq!(due.len(), 2);
    assert!(due.iter().all(|e| e.attempt_count == 1));
}

/// An explicit rejection quarantines only the rejected entry; the rest of
/// the batch is delivered normally
#[tokio::test]
async fn test_rejection_quarantines_without_blocking_batch() {
    let (ledger, _tmp) = create_test_ledger("node-1");
    let aggregator = Arc::new(InMemoryAggregator::new());
    let account = AccountId::new("user_a");

    let bad = ledger.append(&account, 5, CreditReason::TeachCompleted, None).unwrap();
    ledger.append(&account, 2, CreditReason::ModuleCompleted, None).unwrap();
    aggregator.reject(bad.transaction_id, "schema version unsupported");

    let sync = client(ledger.clone(), aggregator.clone());
    let stats = sync.push_cycle().await.unwrap();

    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.quarantined, 1);
    assert_eq!(ledger.outbox().depth().unwrap(), 0);

    let quarantined = ledger.outbox().quarantined().unwrap();
    assert_eq!(quarantined.len(), 1);
    assert_eq!(quarantined[0].entry_id, bad.transaction_id);
    assert_eq!(
        quarantined[0].rejected.as_deref(),
        Some("schema version unsupported")
    );

    // Quarantined entries never re-enter automatic delivery
    let stats = sync.push_cycle().await.unwrap();
    assert_eq!(stats.delivered + stats.retried, 0);
}

/// Pulls page through a remote log, merge durably, and resume from the
/// cursor on the next cycle
#[tokio::test]
async fn test_paged_pull_with_cursor_resume() {
    let (ledger, _tmp) = create_test_ledger("node-1");
    let aggregator = Arc::new(InMemoryAggregator::new());
    let account = AccountId::new("user_a");
    let origin = NodeId::new("node-2");

    aggregator.seed_remote(
        &origin,
        (1..=5).map(|ts| remote_txn(&account, 2, ts, "node-2")).collect(),
    );

    let mut config = SyncConfig::default();
    config.page_size = 2;
    let sync = SyncClient::new(ledger.clone(), aggregator.clone(), config);

    let stats = sync.pull_cycle().await.unwrap();
    assert_eq!(stats.applied, 5);
    assert_eq!(ledger.balance(&account).unwrap(), 10);

    let cursor = ledger.cursor(&origin).unwrap().unwrap();
    assert_eq!(cursor.last_pulled, LogicalTimestamp(5));
    assert!(ledger.last_sync_at().unwrap().is_some());

    // New remote activity resumes from the cursor, no replay
    aggregator.seed_remote(&origin, vec![remote_txn(&account, 1, 6, "node-2")]);
    let stats = sync.pull_cycle().await.unwrap();
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.duplicates, 0);
    assert_eq!(ledger.balance(&account).unwrap(), 11);
}

/// A failed pull leaves the cursor untouched; the retry replays the same
/// window as idempotent merges
#[tokio::test]
async fn test_pull_failure_leaves_cursor_for_retry() {
    let (ledger, _tmp) = create_test_ledger("node-1");
    let aggregator = Arc::new(InMemoryAggregator::new());
    let account = AccountId::new("user_a");
    let origin = NodeId::new("node-2");

    aggregator.seed_remote(&origin, vec![remote_txn(&account, 3, 1, "node-2")]);
    aggregator.fail_next(1);

    let sync = client(ledger.clone(), aggregator.clone());
    assert!(sync.pull_cycle().await.is_err());
    assert!(ledger.cursor(&origin).unwrap().is_none());
    assert!(ledger.last_sync_at().unwrap().is_none());

    let stats = sync.pull_cycle().await.unwrap();
    assert_eq!(stats.applied, 1);
    assert_eq!(ledger.cursor(&origin).unwrap().unwrap().last_pulled, LogicalTimestamp(1));
}

/// Two nodes trading through the aggregator converge on identical history
/// order and balance
#[tokio::test]
async fn test_two_node_convergence_through_aggregator() {
    let (ledger_a, _tmp_a) = create_test_ledger("node-a");
    let (ledger_b, _tmp_b) = create_test_ledger("node-b");
    let aggregator = Arc::new(InMemoryAggregator::new());
    let account = AccountId::new("user_shared");

    let a1 = ledger_a.append(&account, 5, CreditReason::TeachCompleted, None).unwrap();
    let a2 = ledger_a.append(&account, -3, CreditReason::LearnConsumed, None).unwrap();
    let b1 = ledger_b.append(&account, 4, CreditReason::TeachCompleted, None).unwrap();

    // Both nodes push; the aggregator then serves each node's log to peers
    let sync_a = client(ledger_a.clone(), aggregator.clone());
    let sync_b = client(ledger_b.clone(), aggregator.clone());
    sync_a.push_cycle().await.unwrap();
    sync_b.push_cycle().await.unwrap();
    aggregator.seed_remote(&NodeId::new("node-a"), vec![a1, a2]);
    aggregator.seed_remote(&NodeId::new("node-b"), vec![b1]);

    sync_a.pull_cycle().await.unwrap();
    sync_b.pull_cycle().await.unwrap();

    assert_eq!(ledger_a.balance(&account).unwrap(), 6);
    assert_eq!(ledger_b.balance(&account).unwrap(), 6);

    let ids_a: Vec<Uuid> = ledger_a
        .history(&account)
        .unwrap()
        .iter()
        .map(|t| t.transaction_id)
        .collect();
    let ids_b: Vec<Uuid> = ledger_b
        .history(&account)
        .unwrap()
        .iter()
        .map(|t| t.transaction_id)
        .collect();
    assert_eq!(ids_a, ids_b);

    // Pulling again changes nothing
    let stats = sync_a.pull_cycle().await.unwrap();
    assert_eq!(stats.applied, 0);
    assert_eq!(ledger_a.balance(&account).unwrap(), 6);
}

/// A node never pulls its own log back from the aggregator
#[tokio::test]
async fn test_pull_skips_own_origin() {
    let (ledger, _tmp) = create_test_ledger("node-1");
    let aggregator = Arc::new(InMemoryAggregator::new());
    let account = AccountId::new("user_a");

    let txn = ledger.append(&account, 5, CreditReason::TeachCompleted, None).unwrap();
    aggregator.seed_remote(&NodeId::new("node-1"), vec![txn]);

    let sync = client(ledger.clone(), aggregator);
    let stats = sync.pull_cycle().await.unwrap();

    assert_eq!(stats.applied + stats.duplicates, 0);
    assert_eq!(ledger.balance(&account).unwrap(), 5);
}

/// A concurrent overspend pulled from a peer flags the account disputed;
/// the node keeps operating and surfaces the conflict
#[tokio::test]
async fn test_pulled_overspend_disputes_account() {
    let (ledger, _tmp) = create_test_ledger("node-1");
    let aggregator = Arc::new(InMemoryAggregator::new());
    let account = AccountId::new("user_shared");
    let origin = NodeId::new("node-2");

    ledger.append(&account, 5, CreditReason::InitialGrant, None).unwrap();
    ledger.append(&account, -4, CreditReason::LearnConsumed, None).unwrap();

    // The peer spent the same credits while partitioned
    aggregator.seed_remote(&origin, vec![remote_txn(&account, -4, 1, "node-2")]);

    let sync = client(ledger.clone(), aggregator);
    let stats = sync.pull_cycle().await.unwrap();
    assert_eq!(stats.disputed, 1);
    assert_eq!(ledger.balance(&account).unwrap(), -3);
    assert_eq!(ledger.disputed_count().unwrap(), 1);

    // Cursor still advances: the dispute is flagged state, not a sync error
    assert_eq!(
        ledger.cursor(&origin).unwrap().unwrap().last_pulled,
        LogicalTimestamp(1)
    );
}
