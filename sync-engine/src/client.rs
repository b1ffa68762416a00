//! Background sync client
//!
//! Runs push and pull cycles against the aggregator on a Tokio actor:
//! callers hold a cheap `SyncHandle` and the actor owns the schedule.
//! Sync is strictly best-effort and never blocks ledger operations; a node
//! that cannot reach the aggregator keeps serving locally and retries with
//! capped exponential backoff.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │              SyncHandle (Clone)                       │
//! │      TriggerPush / TriggerPull / Status / Shutdown    │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              SyncActor (Single Task)                  │
//! │   push timer ──► outbox drain ──► aggregator.push     │
//! │   pull timer ──► aggregator.pull ──► reconciler       │
//! └──────────────────────────────────────────────────────┘
//! ```

use crate::{
    aggregator::{Aggregator, PushRecord},
    config::SyncConfig,
    metrics::{
        SYNC_CYCLE_DURATION, SYNC_DELIVERED_TOTAL, SYNC_PUSH_CYCLES_TOTAL, SYNC_QUARANTINED_TOTAL,
    },
    reconciler::{MergeStats, Reconciler},
    Error, Result,
};
use chrono::{DateTime, Utc};
use ledger_store::{Ledger, LogicalTimestamp, NodeId, OutboxEntry, SyncCursor};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use uuid::Uuid;

/// Counts of what a push cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushStats {
    /// Entries acknowledged (including prior-delivery duplicates)
    pub delivered: u64,

    /// Entries quarantined after explicit rejection
    pub quarantined: u64,

    /// Entries rescheduled after a transient failure
    pub retried: u64,
}

/// Snapshot of sync health for the operational surface
#[derive(Debug, Clone)]
pub struct SyncStatus {
    /// Undelivered outbox entries
    pub outbox_depth: u64,

    /// Quarantined outbox entries awaiting manual inspection
    pub quarantined: u64,

    /// Accounts currently flagged disputed
    pub disputed_accounts: u64,

    /// Wall clock of the last fully successful pull cycle
    pub last_sync_at: Option<DateTime<Utc>>,

    /// Per-origin pull cursors
    pub cursors: Vec<SyncCursor>,
}

/// Exponential backoff with jitter, capped
///
/// Jitter spreads retries from nodes that lost connectivity at the same
/// moment (a mesh-wide outage ends for everyone at once).
fn backoff_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let base = initial.saturating_mul(1u32 << attempt.min(16)).min(max);
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64((base.as_secs_f64() * jitter).min(max.as_secs_f64()))
}

/// Push/pull logic, independent of the actor schedule
pub struct SyncClient {
    ledger: Arc<Ledger>,
    aggregator: Arc<dyn Aggregator>,
    reconciler: Reconciler,
    config: SyncConfig,
}

impl SyncClient {
    /// New client over a ledger and an aggregator endpoint
    pub fn new(ledger: Arc<Ledger>, aggregator: Arc<dyn Aggregator>, config: SyncConfig) -> Self {
        Self {
            reconciler: Reconciler::new(ledger.clone()),
            ledger,
            aggregator,
            config,
        }
    }

    /// Drain one batch of due outbox entries to the aggregator
    ///
    /// Entries are removed only on acknowledgment; transient failures
    /// reschedule every entry in the batch with backoff. Keys the
    /// aggregator neither accepted nor rejected were delivered on a
    /// previous attempt and are treated as acknowledged.
    pub async fn push_cycle(&self) -> Result<PushStats> {
        let timer = SYNC_CYCLE_DURATION.with_label_values(&["push"]).start_timer();
        let mut stats = PushStats::default();

        let entries = self
            .ledger
            .outbox()
            .pending(Utc::now(), self.config.batch_size)?;
        if entries.is_empty() {
            timer.observe_duration();
            return Ok(stats);
        }

        let entry_ids: Vec<Uuid> = entries.iter().map(|e| e.entry_id).collect();
        self.ledger.outbox().mark_queued(&entry_ids)?;

        let records: Vec<PushRecord> = entries
            .iter()
            .map(|e| PushRecord {
                idempotency_key: e.entry_id,
                fact: e.fact.clone(),
            })
            .collect();

        let result = tokio::time::timeout(
            self.config.request_timeout(),
            self.aggregator.push(records),
        )
        .await
        .map_err(|_| Error::Timeout(self.config.request_timeout_ms))
        .and_then(|r| r);

        match result {
            Ok(response) => {
                let mut handled: HashSet<Uuid> = response.accepted.iter().copied().collect();

                self.ledger.outbox().mark_delivered(&response.accepted)?;
                stats.delivered += response.accepted.len() as u64;

                for rejection in &response.rejected {
                    handled.insert(rejection.idempotency_key);
                    self.ledger
                        .outbox()
                        .quarantine(rejection.idempotency_key, rejection.reason.clone())?;
                    SYNC_QUARANTINED_TOTAL.inc();
                    stats.quarantined += 1;
                }

                let duplicates: Vec<Uuid> = entry_ids
                    .iter()
                    .copied()
                    .filter(|id| !handled.contains(id))
                    .collect();
                self.ledger.outbox().mark_delivered(&duplicates)?;
                stats.delivered += duplicates.len() as u64;

                SYNC_DELIVERED_TOTAL.inc_by(stats.delivered);
                SYNC_PUSH_CYCLES_TOTAL.with_label_values(&["success"]).inc();
                tracing::info!(
                    delivered = stats.delivered,
                    quarantined = stats.quarantined,
                    "Push cycle completed"
                );
            }
            Err(e) if e.is_transient() => {
                self.reschedule(&entries)?;
                stats.retried = entries.len() as u64;
                SYNC_PUSH_CYCLES_TOTAL.with_label_values(&["retry"]).inc();
                tracing::warn!(
                    entries = entries.len(),
                    error = %e,
                    "Push failed transiently; batch rescheduled with backoff"
                );
            }
            Err(e) => {
                self.reschedule(&entries)?;
                SYNC_PUSH_CYCLES_TOTAL.with_label_values(&["error"]).inc();
                timer.observe_duration();
                return Err(e);
            }
        }

        timer.observe_duration();
        Ok(stats)
    }

    fn reschedule(&self, entries: &[OutboxEntry]) -> Result<()> {
        for entry in entries {
            let delay = backoff_delay(
                entry.attempt_count,
                self.config.initial_backoff(),
                self.config.max_backoff(),
            );
            let delay = chrono::Duration::from_std(delay)
                .unwrap_or_else(|_| chrono::Duration::milliseconds(self.config.max_backoff_ms as i64));
            self.ledger.outbox().mark_failed(&[entry.entry_id], delay)?;
        }
        Ok(())
    }

    /// Pull and merge every known remote origin's log
    ///
    /// Each origin resumes from its cursor. A failing origin is skipped for
    /// this cycle (its cursor stays put); `last_sync_at` advances only when
    /// the whole cycle succeeds.
    pub async fn pull_cycle(&self) -> Result<MergeStats> {
        let timer = SYNC_CYCLE_DURATION.with_label_values(&["pull"]).start_timer();
        let mut total = MergeStats::default();

        let origins = tokio::time::timeout(self.config.request_timeout(), self.aggregator.origins())
            .await
            .map_err(|_| Error::Timeout(self.config.request_timeout_ms))
            .and_then(|r| r)?;

        let mut failures = 0u32;
        for origin in origins {
            if origin == *self.ledger.node_id() {
                continue;
            }
            match self.pull_origin(&origin, &mut total).await {
                Ok(()) => {}
                Err(e) if e.is_transient() => {
                    failures += 1;
                    tracing::warn!(
                        origin = %origin,
                        error = %e,
                        "Pull failed transiently; cursor unchanged, will retry"
                    );
                }
                Err(e) => {
                    timer.observe_duration();
                    return Err(e);
                }
            }
        }

        if failures == 0 {
            self.ledger.set_last_sync_at(Utc::now())?;
        }

        timer.observe_duration();
        tracing::info!(
            applied = total.applied,
            duplicates = total.duplicates,
            disputed = total.disputed,
            failed_origins = failures,
            "Pull cycle completed"
        );
        Ok(total)
    }

    async fn pull_origin(&self, origin: &NodeId, total: &mut MergeStats) -> Result<()> {
        let mut since = self
            .ledger
            .cursor(origin)?
            .map(|c| c.last_pulled)
            .unwrap_or(LogicalTimestamp::ZERO);

        loop {
            let page = tokio::time::timeout(
                self.config.request_timeout(),
                self.aggregator.pull(origin, since, self.config.page_size),
            )
            .await
            .map_err(|_| Error::Timeout(self.config.request_timeout_ms))
            .and_then(|r| r)?;

            if page.transactions.is_empty() {
                break;
            }
            total.add(self.reconciler.merge_page(origin, &page)?);
            since = page.next_cursor;
            if page.done {
                break;
            }
        }
        Ok(())
    }

    /// Current sync health
    pub fn status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus {
            outbox_depth: self.ledger.outbox().depth()?,
            quarantined: self.ledger.outbox().quarantined()?.len() as u64,
            disputed_accounts: self.ledger.disputed_count()?,
            last_sync_at: self.ledger.last_sync_at()?,
            cursors: self.ledger.cursors()?,
        })
    }
}

/// Message sent to the sync actor
pub enum SyncMessage {
    /// Run a push cycle now
    TriggerPush {
        /// Cycle outcome
        response: oneshot::Sender<Result<PushStats>>,
    },

    /// Run a pull cycle now
    TriggerPull {
        /// Cycle outcome
        response: oneshot::Sender<Result<MergeStats>>,
    },

    /// Snapshot sync health
    Status {
        /// Status snapshot
        response: oneshot::Sender<Result<SyncStatus>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that owns the sync schedule
pub struct SyncActor {
    client: SyncClient,
    mailbox: mpsc::Receiver<SyncMessage>,
    push_interval: Duration,
    pull_interval: Duration,
}

impl SyncActor {
    /// New actor over a client and its mailbox
    pub fn new(client: SyncClient, mailbox: mpsc::Receiver<SyncMessage>) -> Self {
        let push_interval = client.config.push_interval();
        let pull_interval = client.config.pull_interval();
        Self {
            client,
            mailbox,
            push_interval,
            pull_interval,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        let mut push_timer = interval(self.push_interval);
        let mut pull_timer = interval(self.pull_interval);
        push_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        pull_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(msg) = self.mailbox.recv() => {
                    match msg {
                        SyncMessage::TriggerPush { response } => {
                            let _ = response.send(self.client.push_cycle().await);
                        }
                        SyncMessage::TriggerPull { response } => {
                            let _ = response.send(self.client.pull_cycle().await);
                        }
                        SyncMessage::Status { response } => {
                            let _ = response.send(self.client.status());
                        }
                        SyncMessage::Shutdown => break,
                    }
                }

                _ = push_timer.tick() => {
                    if let Err(e) = self.client.push_cycle().await {
                        tracing::error!(error = %e, "Scheduled push cycle failed");
                    }
                }

                _ = pull_timer.tick() => {
                    if let Err(e) = self.client.pull_cycle().await {
                        tracing::error!(error = %e, "Scheduled pull cycle failed");
                    }
                }

                else => break,
            }
        }
    }
}

/// Handle for sending messages to the actor
#[derive(Clone)]
pub struct SyncHandle {
    sender: mpsc::Sender<SyncMessage>,
}

impl SyncHandle {
    /// Run a push cycle now
    pub async fn trigger_push(&self) -> Result<PushStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SyncMessage::TriggerPush { response: tx })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Run a pull cycle now
    pub async fn trigger_pull(&self) -> Result<MergeStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SyncMessage::TriggerPull { response: tx })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Snapshot sync health
    pub async fn status(&self) -> Result<SyncStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SyncMessage::Status { response: tx })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SyncMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the sync actor
pub fn spawn_sync_client(
    ledger: Arc<Ledger>,
    aggregator: Arc<dyn Aggregator>,
    config: SyncConfig,
) -> SyncHandle {
    let (tx, rx) = mpsc::channel(64);
    let actor = SyncActor::new(SyncClient::new(ledger, aggregator, config), rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    SyncHandle { sender: tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::InMemoryAggregator;
    use ledger_store::{AccountId, Config, CreditReason};

    fn create_test_ledger() -> (Arc<Ledger>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.node_id = "node-local".to_string();
        (Arc::new(Ledger::open(config).unwrap()), temp_dir)
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let initial = Duration::from_millis(1_000);
        let max = Duration::from_secs(300);

        for _ in 0..20 {
            let d0 = backoff_delay(0, initial, max);
            let d5 = backoff_delay(5, initial, max);
            let d63 = backoff_delay(63, initial, max);

            assert!(d0 >= Duration::from_millis(500) && d0 < Duration::from_millis(1_500));
            assert!(d5 >= Duration::from_secs(16) && d5 < Duration::from_secs(48));
            assert!(d63 <= max);
        }
    }

    mod backoff_properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(200))]

            // Bounded even with jitter: never above the cap, never below
            // half the initial delay
            #[test]
            fn prop_backoff_stays_within_bounds(
                attempt in 0u32..64,
                initial_ms in 1u64..10_000,
                factor in 1u32..60,
            ) {
                let initial = Duration::from_millis(initial_ms);
                let max = initial * factor;
                let delay = backoff_delay(attempt, initial, max);
                prop_assert!(delay <= max);
                prop_assert!(delay.as_secs_f64() >= initial.as_secs_f64() * 0.49);
            }

            // Once the doubling overshoots the cap, every further attempt
            // lands in the jitter window around the cap itself
            #[test]
            fn prop_backoff_saturates_at_cap(
                attempt in 20u32..64,
                initial_ms in 100u64..1_000,
            ) {
                let initial = Duration::from_millis(initial_ms);
                let max = initial * 8;
                let delay = backoff_delay(attempt, initial, max);
                prop_assert!(delay <= max);
                prop_assert!(delay.as_secs_f64() >= max.as_secs_f64() * 0.49);
            }
        }
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let (ledger, _tmp) = create_test_ledger();
        let aggregator = Arc::new(InMemoryAggregator::new());
        let handle = spawn_sync_client(ledger, aggregator, SyncConfig::default());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_push_drains_outbox() {
        let (ledger, _tmp) = create_test_ledger();
        let aggregator = Arc::new(InMemoryAggregator::new());
        let account = AccountId::new("user_a");

        ledger.append(&account, 5, CreditReason::TeachCompleted, None).unwrap();
        ledger.append(&account, -3, CreditReason::LearnConsumed, None).unwrap();

        let handle = spawn_sync_client(ledger.clone(), aggregator.clone(), SyncConfig::default());

        let stats = handle.trigger_push().await.unwrap();
        assert_eq!(stats.delivered, 2);
        assert_eq!(ledger.outbox().depth().unwrap(), 0);
        assert_eq!(aggregator.received().len(), 2);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let (ledger, _tmp) = create_test_ledger();
        let aggregator = Arc::new(InMemoryAggregator::new());
        let account = AccountId::new("user_a");

        ledger.append(&account, 5, CreditReason::TeachCompleted, None).unwrap();

        let handle = spawn_sync_client(ledger, aggregator, SyncConfig::default());
        let status = handle.status().await.unwrap();
        assert_eq!(status.outbox_depth, 1);
        assert_eq!(status.disputed_accounts, 0);
        assert!(status.last_sync_at.is_none());

        handle.shutdown().await.unwrap();
    }
}
