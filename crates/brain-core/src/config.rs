use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BrainError, Result};

/// Top-level configuration for the Brain engine.
///
/// Loaded from `brain.toml` by default. Each section corresponds to one
/// engine component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrainConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl BrainConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BrainConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| BrainError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Action matching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Minimum normalized similarity (inclusive) for a fuzzy match.
    pub fuzzy_threshold: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.8,
        }
    }
}

/// External schema data settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Timeout for a single schema fetch, in milliseconds.
    pub fetch_timeout_ms: u64,
    /// Cache TTL applied when a schema definition does not carry its own.
    pub default_ttl_secs: u64,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 5_000,
            default_ttl_secs: 300,
        }
    }
}

/// Session queue and timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Absolute age after which any non-terminal queue entry expires.
    pub max_queue_age_secs: u64,
    /// Time allowed in the `collecting_params` state.
    pub collecting_params_timeout_secs: u64,
    /// Time allowed in the `awaiting_confirmation` state.
    pub awaiting_confirmation_timeout_secs: u64,
    /// Size of the `previous_intents` ring.
    pub previous_intents_limit: usize,
    /// Retries for read-modify-write mutators on a version conflict.
    pub max_commit_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_age_secs: 1_800,
            collecting_params_timeout_secs: 300,
            awaiting_confirmation_timeout_secs: 60,
            previous_intents_limit: 10,
            max_commit_retries: 3,
        }
    }
}

/// Action execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Attempts per action when its definition has no retry policy.
    pub default_max_attempts: u32,
    /// Pause between attempts when the retry policy sets none.
    pub retry_backoff_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: 1,
            retry_backoff_ms: 50,
        }
    }
}
