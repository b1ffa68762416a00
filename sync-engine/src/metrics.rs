//! Prometheus metrics for the sync engine

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec,
    IntCounter, IntCounterVec,
};

lazy_static! {
    /// Push cycles by outcome
    pub static ref SYNC_PUSH_CYCLES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "sync_push_cycles_total",
        "Push cycles by outcome",
        &["status"]
    )
    .unwrap();

    /// Outbox entries delivered to the aggregator
    pub static ref SYNC_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        "sync_delivered_total",
        "Outbox entries acknowledged by the aggregator"
    )
    .unwrap();

    /// Outbox entries quarantined after explicit rejection
    pub static ref SYNC_QUARANTINED_TOTAL: IntCounter = register_int_counter!(
        "sync_quarantined_total",
        "Outbox entries quarantined after aggregator rejection"
    )
    .unwrap();

    /// Pull merges by outcome
    pub static ref SYNC_PULL_MERGES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "sync_pull_merges_total",
        "Pulled transactions merged, by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Sync cycle duration
    pub static ref SYNC_CYCLE_DURATION: HistogramVec = register_histogram_vec!(
        "sync_cycle_duration_seconds",
        "Sync cycle duration in seconds",
        &["direction"]
    )
    .unwrap();
}
