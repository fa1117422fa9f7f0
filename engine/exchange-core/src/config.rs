use gavel::SelfMatchPolicy;
use risk_engine::RiskConfig;
use serde::{Deserialize, Serialize};

/// Engine configuration, fixed for the lifetime of a session. Risk limits
/// are flattened so the config file reads as one flat document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(flatten)]
    pub risk: RiskConfig,
    pub self_match_policy: SelfMatchPolicy,
    /// Levels per side carried in every book_update event.
    pub book_depth_in_updates: usize,
    /// Shared secret for admin_halt / admin_resume.
    pub admin_token: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            risk: RiskConfig::default(),
            self_match_policy: SelfMatchPolicy::default(),
            book_depth_in_updates: 10,
            admin_token: "local-admin".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Risk(#[from] risk_engine::RiskConfigError),
    #[error("book depth must be positive")]
    BookDepth,
    #[error("admin token must not be empty")]
    AdminToken,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.risk.validate()?;
        if self.book_depth_in_updates == 0 {
            return Err(ConfigError::BookDepth);
        }
        if self.admin_token.is_empty() {
            return Err(ConfigError::AdminToken);
        }
        Ok(())
    }
}
