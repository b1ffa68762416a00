//! Service layer types

use chrono::{DateTime, Utc};
use ledger_store::AccountId;
use serde::{Deserialize, Serialize};

/// Learning module category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleCategory {
    /// Savings, loans, household budgeting
    FinancialLiteracy,
    /// Phone safety, scams, privacy
    DigitalSafety,
    /// Tailoring, cooking, crafts
    VocationalSkills,
}

/// A nano-learning module in the local catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningModule {
    /// Module ID
    pub module_id: u32,

    /// Display title
    pub title: String,

    /// Category
    pub category: ModuleCategory,

    /// Content language (BCP 47-ish short code, e.g. "hi")
    pub language: String,

    /// Audio duration in seconds
    pub duration_secs: u32,

    /// Credits required to start (non-negative)
    pub credit_cost: i64,
}

/// Per-account module progress, rebuilt from synced progress facts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleStatus {
    /// Started, not yet completed
    InProgress,
    /// Completed (bonus awarded)
    Completed,
}

/// A skill someone offers to teach
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillOffer {
    /// Offer ID
    pub skill_id: u32,

    /// Skill name ("tailoring", "cooking", ...)
    pub skill_name: String,

    /// Teaching account
    pub teacher: AccountId,

    /// Self-reported proficiency (1-5)
    pub proficiency: u8,
}

/// A micro-gig posted on this node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gig {
    /// Gig ID
    pub gig_id: u32,

    /// Display title
    pub title: String,

    /// Payment description (settled outside the credit ledger)
    pub payment: String,

    /// When the gig was posted
    pub posted_at: DateTime<Utc>,

    /// Applications close at this time
    pub expires_at: DateTime<Utc>,
}

impl Gig {
    /// Gig accepts applications at `now`
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
