//! Nano-learning modules and progress tracking
//!
//! The module catalog is node-local configuration. Progress is recorded as
//! synced facts, so the in-memory view can always be rebuilt from the
//! ledger after a restart.

use crate::{
    config::ServiceConfig,
    types::{LearningModule, ModuleCategory, ModuleStatus},
    Error, Result,
};
use chrono::Utc;
use ledger_store::{AccountId, CreditReason, Ledger, ProgressRecord, SyncFact};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Per-account learning overview
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LearningOverview {
    /// Credit balance
    pub credits: i64,

    /// Modules completed
    pub completed: u64,

    /// Modules in progress
    pub in_progress: u64,
}

/// Learning module catalog and progress
pub struct LearningService {
    ledger: Arc<Ledger>,
    config: ServiceConfig,
    catalog: RwLock<BTreeMap<u32, LearningModule>>,
    progress: RwLock<HashMap<(AccountId, u32), ModuleStatus>>,
}

impl LearningService {
    /// New service; rebuilds the progress view from recorded facts
    pub fn new(ledger: Arc<Ledger>, config: ServiceConfig) -> Result<Self> {
        let mut progress = HashMap::new();
        for fact in ledger.facts()? {
            if let SyncFact::Progress(record) = fact {
                let status = if record.completed_at.is_some() {
                    ModuleStatus::Completed
                } else {
                    ModuleStatus::InProgress
                };
                let entry = progress
                    .entry((record.account_id, record.module_id))
                    .or_insert(status);
                // Completion wins over any earlier start record
                if status == ModuleStatus::Completed {
                    *entry = ModuleStatus::Completed;
                }
            }
        }

        Ok(Self {
            ledger,
            config,
            catalog: RwLock::new(BTreeMap::new()),
            progress: RwLock::new(progress),
        })
    }

    /// Add a module to the local catalog
    pub fn add_module(&self, module: LearningModule) {
        self.catalog.write().insert(module.module_id, module);
    }

    /// Active modules in a category and language
    pub fn modules_in_category(&self, category: ModuleCategory, language: &str) -> Vec<LearningModule> {
        self.catalog
            .read()
            .values()
            .filter(|m| m.category == category && m.language == language)
            .cloned()
            .collect()
    }

    /// Start a module, debiting its credit cost
    ///
    /// Refused synchronously on insufficient credits; a refused start
    /// changes nothing and queues nothing.
    pub fn start_module(&self, account: &AccountId, module_id: u32) -> Result<LearningModule> {
        let module = self
            .catalog
            .read()
            .get(&module_id)
            .cloned()
            .ok_or(Error::ModuleNotFound(module_id))?;

        if module.credit_cost > 0 {
            self.ledger.append(
                account,
                -module.credit_cost,
                CreditReason::LearnConsumed,
                Some(format!("Started module: {}", module.title)),
            )?;
        }

        self.ledger.record_fact(SyncFact::Progress(ProgressRecord {
            record_id: Uuid::new_v4(),
            account_id: account.clone(),
            module_id,
            progress_percentage: 0,
            completed_at: None,
            origin_node_id: self.ledger.node_id().clone(),
        }))?;
        self.progress
            .write()
            .insert((account.clone(), module_id), ModuleStatus::InProgress);

        tracing::info!(account_id = %account, module_id, "Module started");
        Ok(module)
    }

    /// Complete a started module, awarding the completion bonus
    ///
    /// Idempotent: completing an already-completed module awards nothing.
    pub fn complete_module(&self, account: &AccountId, module_id: u32) -> Result<i64> {
        match self.progress.read().get(&(account.clone(), module_id)) {
            Some(ModuleStatus::Completed) => return Ok(0),
            Some(ModuleStatus::InProgress) => {}
            None => {
                return Err(Error::ModuleNotStarted {
                    account: account.to_string(),
                    module_id,
                })
            }
        }

        if self.config.completion_bonus > 0 {
            self.ledger.append(
                account,
                self.config.completion_bonus,
                CreditReason::ModuleCompleted,
                Some(format!("Completed module: {}", module_id)),
            )?;
        }

        self.ledger.record_fact(SyncFact::Progress(ProgressRecord {
            record_id: Uuid::new_v4(),
            account_id: account.clone(),
            module_id,
            progress_percentage: 100,
            completed_at: Some(Utc::now()),
            origin_node_id: self.ledger.node_id().clone(),
        }))?;
        self.progress
            .write()
            .insert((account.clone(), module_id), ModuleStatus::Completed);

        tracing::info!(account_id = %account, module_id, bonus = self.config.completion_bonus, "Module completed");
        Ok(self.config.completion_bonus)
    }

    /// Credits plus completed/in-progress counts for one account
    pub fn overview(&self, account: &AccountId) -> Result<LearningOverview> {
        let progress = self.progress.read();
        let mut overview = LearningOverview {
            credits: self.ledger.balance(account)?,
            ..Default::default()
        };
        for ((acct, _), status) in progress.iter() {
            if acct != account {
                continue;
            }
            match status {
                ModuleStatus::Completed => overview.completed += 1,
                ModuleStatus::InProgress => overview.in_progress += 1,
            }
        }
        Ok(overview)
    }
}
