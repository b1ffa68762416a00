//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `ledger_appends_total` - Transactions appended locally
//! - `ledger_appends_refused_total` - Appends refused (insufficient credits, disputed)
//! - `ledger_merges_total` - Remote transactions merged
//! - `ledger_merge_duplicates_total` - Idempotent no-op merges
//! - `ledger_disputed_accounts` - Accounts currently flagged disputed
//! - `ledger_outbox_depth` - Undelivered outbox entries
//! - `ledger_append_duration_seconds` - Append latency histogram
//!
//! Each `Metrics` instance owns its registry so multiple ledgers can
//! coexist in one process (tests open several).

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Transactions appended locally
    pub appends_total: IntCounter,

    /// Appends refused by an invariant
    pub appends_refused_total: IntCounter,

    /// Remote transactions merged into local history
    pub merges_total: IntCounter,

    /// Merges that were idempotent no-ops
    pub merge_duplicates_total: IntCounter,

    /// Accounts currently flagged disputed
    pub disputed_accounts: IntGauge,

    /// Undelivered outbox entries
    pub outbox_depth: IntGauge,

    /// Append latency histogram
    pub append_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let appends_total = IntCounter::with_opts(Opts::new(
            "ledger_appends_total",
            "Transactions appended locally",
        ))?;
        registry.register(Box::new(appends_total.clone()))?;

        let appends_refused_total = IntCounter::with_opts(Opts::new(
            "ledger_appends_refused_total",
            "Appends refused by an invariant",
        ))?;
        registry.register(Box::new(appends_refused_total.clone()))?;

        let merges_total = IntCounter::with_opts(Opts::new(
            "ledger_merges_total",
            "Remote transactions merged into local history",
        ))?;
        registry.register(Box::new(merges_total.clone()))?;

        let merge_duplicates_total = IntCounter::with_opts(Opts::new(
            "ledger_merge_duplicates_total",
            "Merges that were idempotent no-ops",
        ))?;
        registry.register(Box::new(merge_duplicates_total.clone()))?;

        let disputed_accounts = IntGauge::with_opts(Opts::new(
            "ledger_disputed_accounts",
            "Accounts currently flagged disputed",
        ))?;
        registry.register(Box::new(disputed_accounts.clone()))?;

        let outbox_depth = IntGauge::with_opts(Opts::new(
            "ledger_outbox_depth",
            "Undelivered outbox entries",
        ))?;
        registry.register(Box::new(outbox_depth.clone()))?;

        let append_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_append_duration_seconds",
                "Append latency histogram",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(append_duration.clone()))?;

        Ok(Self {
            appends_total,
            appends_refused_total,
            merges_total,
            merge_duplicates_total,
            disputed_accounts,
            outbox_depth,
            append_duration,
            registry,
        })
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.appends_total.get(), 0);
        assert_eq!(metrics.disputed_accounts.get(), 0);
    }

    #[test]
    fn test_independent_registries() {
        // Two ledgers in one process must not collide on registration
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.appends_total.inc();
        assert_eq!(a.appends_total.get(), 1);
        assert_eq!(b.appends_total.get(), 0);
    }
}
