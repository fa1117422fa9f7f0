//! Service configuration: a flat JSON file plus environment overrides.

use anyhow::{Context, Result};
use exchange_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    #[serde(flatten)]
    pub engine: EngineConfig,

    /// Live journal file. Rotated aside on clean shutdown.
    pub journal_path: PathBuf,

    /// Capacity of the ingress and egress rings.
    pub queue_capacity: usize,

    pub log_level: String,
    pub log_format: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            journal_path: PathBuf::from("./data/exchange.journal"),
            queue_capacity: 4096,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Loads configuration: `EXCHANGE_CONFIG` names a JSON file if set, then
/// individual environment variables override.
pub fn load_config() -> Result<ServiceConfig> {
    let mut config = match std::env::var_os("EXCHANGE_CONFIG") {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.to_string_lossy()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.to_string_lossy()))?
        }
        None => ServiceConfig::default(),
    };

    if let Ok(path) = std::env::var("EXCHANGE_JOURNAL_PATH") {
        config.journal_path = PathBuf::from(path);
    }
    if let Ok(level) = std::env::var("EXCHANGE_LOG_LEVEL") {
        config.log_level = level;
    }
    if let Ok(format) = std::env::var("EXCHANGE_LOG_FORMAT") {
        config.log_format = format;
    }
    if let Ok(token) = std::env::var("EXCHANGE_ADMIN_TOKEN") {
        config.engine.admin_token = token;
    }
    if let Ok(capacity) = std::env::var("EXCHANGE_QUEUE_CAPACITY") {
        config.queue_capacity =
            capacity.parse().context("EXCHANGE_QUEUE_CAPACITY must be an integer")?;
    }

    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &ServiceConfig) -> Result<()> {
    config.engine.validate().context("engine configuration")?;
    if config.queue_capacity == 0 {
        anyhow::bail!("queue_capacity must be positive");
    }
    if let Some(dir) = config.journal_path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating journal directory {}", dir.display()))?;
        }
    }
    Ok(())
}
