//! Account enrollment
//!
//! Accounts are derived from device fingerprints with a one-way hash, so
//! the ledger never holds personal data. Onboarding is idempotent: the
//! initial grant is issued once, on first contact.

use crate::{config::ServiceConfig, Result};
use ledger_store::{AccountId, CreditReason, Ledger};
use std::sync::Arc;

/// Creates accounts and issues the initial credit grant
pub struct EnrollmentService {
    ledger: Arc<Ledger>,
    config: ServiceConfig,
}

impl EnrollmentService {
    /// New service over a ledger
    pub fn new(ledger: Arc<Ledger>, config: ServiceConfig) -> Self {
        Self { ledger, config }
    }

    /// Resolve a device fingerprint to an account, granting starter
    /// credits if the account is new
    pub fn onboard(&self, fingerprint: &str) -> Result<AccountId> {
        let account = AccountId::derive(fingerprint);

        if self.ledger.account(&account)?.is_some() {
            return Ok(account);
        }

        self.ledger.append(
            &account,
            self.config.initial_grant,
            CreditReason::InitialGrant,
            Some("welcome grant".to_string()),
        )?;
        tracing::info!(account_id = %account, grant = self.config.initial_grant, "Account onboarded");
        Ok(account)
    }

    /// Current credit balance
    pub fn balance(&self, account: &AccountId) -> Result<i64> {
        Ok(self.ledger.balance(account)?)
    }
}
