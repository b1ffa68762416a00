//! Service layer configuration
//!
//! Credit amounts for the community economy. Injected at construction;
//! services never read ambient process state.

use serde::{Deserialize, Serialize};

/// Credit economy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// One-time grant at account creation
    pub initial_grant: i64,

    /// Credits a teacher earns per completed session
    pub credit_per_teach: i64,

    /// Credits a learner spends per session (negative)
    pub credit_per_learn: i64,

    /// Bonus for completing a learning module
    pub completion_bonus: i64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            initial_grant: 10,
            credit_per_teach: 5,
            credit_per_learn: -3,
            completion_bonus: 2,
        }
    }
}

impl ServiceConfig {
    /// Load from TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;
        let config: ServiceConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that break the credit economy
    pub fn validate(&self) -> crate::Result<()> {
        if self.initial_grant < 0 || self.credit_per_teach <= 0 || self.completion_bonus < 0 {
            return Err(crate::Error::Config(
                "grants and teaching rewards must be non-negative".to_string(),
            ));
        }
        if self.credit_per_learn >= 0 {
            return Err(crate::Error::Config(
                "credit_per_learn must be negative (learners spend)".to_string(),
            ));
        }
        Ok(())
    }
}
