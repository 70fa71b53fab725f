//! Engine configuration.
//!
//! Small TOML-backed config: every field has a default, so a missing or
//! partial file is fine.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::logging::LogConfig;

/// Configuration for the engine and its driver loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Default external auth provider name used by the boundary when
    /// initiating sign-in.
    pub provider: String,

    /// Queue depth for boundary mutation intents per sync loop.
    pub command_capacity: usize,

    /// Queue depth for store-interaction completions per sync loop.
    pub completion_capacity: usize,

    /// Logging configuration.
    pub log: LogConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            provider: "google".to_string(),
            command_capacity: 64,
            completion_capacity: 32,
            log: LogConfig::default(),
        }
    }
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl CoreConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}
