//! Application configuration: built-in defaults, an optional JSON file,
//! then command line overrides applied by the binary.

use std::path::Path;
use serde::{Deserialize, Serialize};

use crate::serial::unified::PollPolicy;
use crate::serial::{ConnectionParams, FramerConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Line endings appended to plain-text sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendDefaults {
    pub append_cr: bool,
    pub append_lf: bool,
}

impl Default for SendDefaults {
    fn default() -> Self {
        Self { append_cr: false, append_lf: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub show_timestamps: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { show_timestamps: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Port to open at startup; an empty port name means none
    pub connection: ConnectionParams,
    pub poll: PollPolicy,
    pub framer: FramerConfig,
    pub send: SendDefaults,
    pub display: DisplayConfig,
}

impl AppConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.poll.validate().map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
