//! Sakti-Link Community Services
//!
//! The value-bearing services of the edge node: enrollment with the
//! initial credit grant, nano-learning modules, the skill-swap time bank,
//! and the micro-gig marketplace. Every credit movement goes through the
//! local ledger; every cross-node fact is recorded for sync. Services are
//! plain structs over an injected `Ledger` handle.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod enrollment;
pub mod error;
pub mod gigs;
pub mod learning;
pub mod skills;
pub mod types;

pub use config::ServiceConfig;
pub use enrollment::EnrollmentService;
pub use error::{Error, Result};
pub use gigs::GigService;
pub use learning::{LearningOverview, LearningService};
pub use skills::{SessionOutcome, SkillService};
pub use types::{Gig, LearningModule, ModuleCategory, ModuleStatus, SkillOffer};
