//! Skill-swap time bank
//!
//! Teaching earns credits, learning spends them. A completed session is
//! two ledger appends; the learner's debit is validated first so a refused
//! debit never strands a teacher credit.

use crate::{config::ServiceConfig, types::SkillOffer, Error, Result};
use ledger_store::{AccountId, CreditReason, Ledger};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Outcome of a completed teaching session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Credits the teacher earned
    pub teacher_credits: i64,

    /// Credits the learner spent (negative)
    pub learner_credits: i64,
}

/// Skill marketplace and session settlement
pub struct SkillService {
    ledger: Arc<Ledger>,
    config: ServiceConfig,
    offers: RwLock<BTreeMap<u32, SkillOffer>>,
    next_skill_id: AtomicU32,
}

impl SkillService {
    /// New service over a ledger
    pub fn new(ledger: Arc<Ledger>, config: ServiceConfig) -> Self {
        Self {
            ledger,
            config,
            offers: RwLock::new(BTreeMap::new()),
            next_skill_id: AtomicU32::new(1),
        }
    }

    /// Register a skill someone offers to teach
    pub fn register_offer(
        &self,
        teacher: &AccountId,
        skill_name: impl Into<String>,
        proficiency: u8,
    ) -> SkillOffer {
        let offer = SkillOffer {
            skill_id: self.next_skill_id.fetch_add(1, Ordering::Relaxed),
            skill_name: skill_name.into(),
            teacher: teacher.clone(),
            proficiency: proficiency.clamp(1, 5),
        };
        self.offers.write().insert(offer.skill_id, offer.clone());
        tracing::info!(skill_id = offer.skill_id, teacher = %teacher, skill = %offer.skill_name, "Skill offered");
        offer
    }

    /// All current offers
    pub fn marketplace(&self) -> Vec<SkillOffer> {
        self.offers.read().values().cloned().collect()
    }

    /// Settle a completed teaching session
    ///
    /// Learner is debited first; if the debit is refused (insufficient
    /// credits or a disputed account) the teacher is never credited.
    pub fn complete_teaching_session(
        &self,
        learner: &AccountId,
        skill_id: u32,
    ) -> Result<SessionOutcome> {
        let offer = self
            .offers
            .read()
            .get(&skill_id)
            .cloned()
            .ok_or(Error::SkillNotFound(skill_id))?;

        self.ledger.append(
            learner,
            self.config.credit_per_learn,
            CreditReason::LearnConsumed,
            Some(format!("Learned skill: {}", offer.skill_name)),
        )?;

        self.ledger.append(
            &offer.teacher,
            self.config.credit_per_teach,
            CreditReason::TeachCompleted,
            Some(format!("Taught skill: {}", offer.skill_name)),
        )?;

        tracing::info!(
            skill_id,
            teacher = %offer.teacher,
            learner = %learner,
            "Teaching session settled"
        );
        Ok(SessionOutcome {
            teacher_credits: self.config.credit_per_teach,
            learner_credits: self.config.credit_per_learn,
        })
    }
}
