//! Configuration module for the CODA decoder
//!
//! Loads decoder settings and the crate map from a TOML file.
//!
//! # Example
//! ```ignore
//! let config = Config::load("hall.toml")?;
//! let dispatcher = EventDispatcher::from_config(&config)?;
//! ```

pub mod crate_map;

pub use crate_map::{
    CrateConfig, CrateMap, ModuleConfig, ModuleFamily, FASTBUS_SLOT_MASK, FASTBUS_SLOT_SHIFT,
};

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::common::diagnostics::DEFAULT_WARNING_INTERVAL;
use crate::emulator::EmulatorConfig;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid module configuration: {0}")]
    InvalidModule(String),

    #[error("Crate {0} is defined more than once")]
    DuplicateCrate(u32),

    #[error("Crate {crate_id} slot {slot} is defined more than once")]
    DuplicateModule { crate_id: u32, slot: u32 },

    #[error("Crate {0} mixes module families")]
    MixedCrate(u32),

    #[error("Invalid decoder setting: {0}")]
    InvalidSetting(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Decoder limits and logging behaviour
    #[serde(default)]
    pub decoder: DecoderSettings,

    /// Synthetic buffer generation (`coda_decode --emulate`)
    #[serde(default)]
    pub emulator: EmulatorConfig,

    /// Readout crates (the crate map)
    #[serde(default)]
    pub crates: Vec<CrateConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.decoder.validate()?;
        Ok(config)
    }

    /// The crate map described by this configuration
    pub fn crate_map(&self) -> CrateMap {
        CrateMap::new(self.crates.clone())
    }

    /// Get crate configuration by ROC id
    pub fn get_crate(&self, crate_id: u32) -> Option<&CrateConfig> {
        self.crates.iter().find(|c| c.id == crate_id)
    }
}

// =============================================================================
// Decoder Settings
// =============================================================================

/// Limits applied while decoding
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DecoderSettings {
    /// Largest accepted event length in words, including the length word
    #[serde(default = "default_max_event_length")]
    pub max_event_length: usize,

    /// Capacity of each slot in the in-memory sink
    #[serde(default = "default_max_hits_per_slot")]
    pub max_hits_per_slot: usize,

    /// Log the first and then every N-th repeated warning
    #[serde(default = "default_warning_interval")]
    pub warning_interval: u64,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            max_event_length: default_max_event_length(),
            max_hits_per_slot: default_max_hits_per_slot(),
            warning_interval: default_warning_interval(),
        }
    }
}

impl DecoderSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_event_length < 2 {
            return Err(ConfigError::InvalidSetting(format!(
                "max_event_length must be at least 2, got {}",
                self.max_event_length
            )));
        }
        if self.max_hits_per_slot == 0 {
            return Err(ConfigError::InvalidSetting(
                "max_hits_per_slot must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_max_event_length() -> usize {
    400_000
}

fn default_max_hits_per_slot() -> usize {
    4096
}

fn default_warning_interval() -> u64 {
    DEFAULT_WARNING_INTERVAL
}

// =============================================================================
// Tests
// =============================================================================
