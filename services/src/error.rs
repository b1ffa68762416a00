//! Error types for the service layer

use thiserror::Error;

/// Result type for service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Service layer errors
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying ledger error (insufficient credits, disputes, storage)
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_store::Error),

    /// Unknown learning module
    #[error("Module not found: {0}")]
    ModuleNotFound(u32),

    /// Module must be started before it can be completed
    #[error("Module {module_id} not started by {account}")]
    ModuleNotStarted {
        /// Account completing the module
        account: String,
        /// The module
        module_id: u32,
    },

    /// Unknown skill offer
    #[error("Skill not found: {0}")]
    SkillNotFound(u32),

    /// Unknown gig
    #[error("Gig not found: {0}")]
    GigNotFound(u32),

    /// Gig expired or otherwise closed to applications
    #[error("Gig {0} is closed")]
    GigClosed(u32),

    /// One application per account per gig
    #[error("Account {account} already applied for gig {gig_id}")]
    AlreadyApplied {
        /// Applicant
        account: String,
        /// The gig
        gig_id: u32,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The operation was refused because the account could not afford it
    pub fn is_insufficient_credits(&self) -> bool {
        matches!(
            self,
            Error::Ledger(ledger_store::Error::InsufficientCredits { .. })
        )
    }
}
