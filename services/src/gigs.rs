//! Micro-gig marketplace
//!
//! Gigs are node-local postings; applications are synced facts so an
//! applicant's interest reaches the payer's node eventually. Payment is
//! settled outside the credit ledger.

use crate::{types::Gig, Error, Result};
use chrono::{DateTime, Duration, Utc};
use ledger_store::{AccountId, GigApplicationRecord, Ledger, SyncFact};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Gig catalog and applications
pub struct GigService {
    ledger: Arc<Ledger>,
    gigs: RwLock<BTreeMap<u32, Gig>>,
    applications: RwLock<HashSet<(AccountId, u32)>>,
    next_gig_id: AtomicU32,
}

impl GigService {
    /// New service; rebuilds the application view from recorded facts
    pub fn new(ledger: Arc<Ledger>) -> Result<Self> {
        let mut applications = HashSet::new();
        for fact in ledger.facts()? {
            if let SyncFact::GigApplication(record) = fact {
                applications.insert((record.account_id, record.gig_id));
            }
        }

        Ok(Self {
            ledger,
            gigs: RwLock::new(BTreeMap::new()),
            applications: RwLock::new(applications),
            next_gig_id: AtomicU32::new(1),
        })
    }

    /// Post a gig open for `open_for` from now
    pub fn post_gig(
        &self,
        title: impl Into<String>,
        payment: impl Into<String>,
        open_for: Duration,
    ) -> Gig {
        let now = Utc::now();
        let gig = Gig {
            gig_id: self.next_gig_id.fetch_add(1, Ordering::Relaxed),
            title: title.into(),
            payment: payment.into(),
            posted_at: now,
            expires_at: now + open_for,
        };
        self.gigs.write().insert(gig.gig_id, gig.clone());
        tracing::info!(gig_id = gig.gig_id, title = %gig.title, "Gig posted");
        gig
    }

    /// Gigs still accepting applications at `now`, newest first
    pub fn open_gigs(&self, now: DateTime<Utc>) -> Vec<Gig> {
        let mut open: Vec<Gig> = self
            .gigs
            .read()
            .values()
            .filter(|g| g.is_open(now))
            .cloned()
            .collect();
        open.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
        open
    }

    /// Apply for a gig; one application per account per gig
    pub fn apply(&self, account: &AccountId, gig_id: u32) -> Result<GigApplicationRecord> {
        let now = Utc::now();
        let gig = self
            .gigs
            .read()
            .get(&gig_id)
            .cloned()
            .ok_or(Error::GigNotFound(gig_id))?;
        if !gig.is_open(now) {
            return Err(Error::GigClosed(gig_id));
        }
        if self.applications.read().contains(&(account.clone(), gig_id)) {
            return Err(Error::AlreadyApplied {
                account: account.to_string(),
                gig_id,
            });
        }

        let record = GigApplicationRecord {
            application_id: Uuid::new_v4(),
            account_id: account.clone(),
            gig_id,
            applied_at: now,
            origin_node_id: self.ledger.node_id().clone(),
        };
        self.ledger
            .record_fact(SyncFact::GigApplication(record.clone()))?;
        self.applications.write().insert((account.clone(), gig_id));

        tracing::info!(account_id = %account, gig_id, "Gig application recorded");
        Ok(record)
    }

    /// Gig ids this account has applied for
    pub fn applications(&self, account: &AccountId) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .applications
            .read()
            .iter()
            .filter(|(acct, _)| acct == account)
            .map(|(_, gig_id)| *gig_id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_store::Config;

    fn test_setup() -> (GigService, Arc<Ledger>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.node_id = "node-1".to_string();
        let ledger = Arc::new(Ledger::open(config).unwrap());
        (GigService::new(ledger.clone()).unwrap(), ledger, temp_dir)
    }

    #[test]
    fn test_apply_records_synced_fact() {
        let (service, ledger, _tmp) = test_setup();
        let account = AccountId::new("user_a");
        let gig = service.post_gig("harvest help", "200 rupees", Duration::hours(24));

        let record = service.apply(&account, gig.gig_id).unwrap();
        assert_eq!(record.gig_id, gig.gig_id);
        assert_eq!(ledger.outbox().depth().unwrap(), 1);
        assert_eq!(service.applications(&account), vec![gig.gig_id]);
    }

    #[test]
    fn test_apply_dedups_per_account_and_gig() {
        let (service, _ledger, _tmp) = test_setup();
        let account = AccountId::new("user_a");
        let gig = service.post_gig("harvest help", "200 rupees", Duration::hours(24));

        service.apply(&account, gig.gig_id).unwrap();
        assert!(matches!(
            service.apply(&account, gig.gig_id),
            Err(Error::AlreadyApplied { .. })
        ));

        // A different account may still apply
        service.apply(&AccountId::new("user_b"), gig.gig_id).unwrap();
    }

    #[test]
    fn test_expired_gigs_are_closed() {
        let (service, _ledger, _tmp) = test_setup();
        let account = AccountId::new("user_a");
        let gig = service.post_gig("old job", "100 rupees", Duration::seconds(-1));

        assert!(service.open_gigs(Utc::now()).is_empty());
        assert!(matches!(
            service.apply(&account, gig.gig_id),
            Err(Error::GigClosed(_))
        ));
    }

    #[test]
    fn test_application_view_rebuilds_from_facts() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.node_id = "node-1".to_string();
        let account = AccountId::new("user_a");

        {
            let ledger = Arc::new(Ledger::open(config.clone()).unwrap());
            let service = GigService::new(ledger).unwrap();
            let gig = service.post_gig("harvest help", "200 rupees", Duration::hours(24));
            service.apply(&account, gig.gig_id).unwrap();
        }

        let ledger = Arc::new(Ledger::open(config).unwrap());
        let service = GigService::new(ledger).unwrap();
        assert_eq!(service.applications(&account), vec![1]);
    }
}
