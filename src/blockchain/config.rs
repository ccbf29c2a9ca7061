use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::path::Path;

use super::difficulty::DEFAULT_ADJUSTMENT_INTERVAL;
use super::digest::DEFAULT_SECRET;

/// Errors that can occur while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Tunable parameters of a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Difficulty of the first mined block
    pub initial_difficulty: u32,

    /// Difficulty rises by one each time the chain length reaches a multiple of this
    pub adjustment_interval: u64,

    /// Shared secret keying the block and Merkle digests
    pub digest_secret: String,

    /// Number of threads racing over the nonce space (1 = sequential search)
    pub mining_threads: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            initial_difficulty: 3,
            adjustment_interval: DEFAULT_ADJUSTMENT_INTERVAL,
            digest_secret: DEFAULT_SECRET.to_string(),
            mining_threads: 1,
        }
    }
}

impl ChainConfig {
    /// Parses a JSON config; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ChainConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        ChainConfig::from_json(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.adjustment_interval == 0 {
            return Err(ConfigError::Invalid(
                "adjustment_interval must be at least 1".to_string(),
            ));
        }

        if self.mining_threads == 0 {
            return Err(ConfigError::Invalid(
                "mining_threads must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
