//! Protocol configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIMEOUT_MS};

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_base_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_verify_response_checksum() -> bool {
    true
}

fn default_reader_poll_ms() -> u64 {
    5
}

/// Settings shared by every transaction on one link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Serial baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// First timeout threshold in milliseconds
    #[serde(default = "default_base_timeout_ms")]
    pub base_timeout_ms: u64,
    /// Timeout supervisor poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Check the CRC trailer of every completed response
    #[serde(default = "default_verify_response_checksum")]
    pub verify_response_checksum: bool,
    /// Serial reader thread poll interval in milliseconds
    #[serde(default = "default_reader_poll_ms")]
    pub reader_poll_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            base_timeout_ms: default_base_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            verify_response_checksum: default_verify_response_checksum(),
            reader_poll_ms: default_reader_poll_ms(),
        }
    }
}

impl ProtocolConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        let config: ProtocolConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, ProtocolError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if self.baud_rate == 0 {
            return Err(ProtocolError::InvalidArgument(
                "baud_rate must be greater than 0".to_string(),
            ));
        }
        if self.base_timeout_ms == 0 || self.poll_interval_ms == 0 || self.reader_poll_ms == 0 {
            return Err(ProtocolError::InvalidArgument(
                "timeout and poll intervals must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// First timeout threshold
    pub fn base_timeout(&self) -> Duration {
        Duration::from_millis(self.base_timeout_ms)
    }

    /// Timeout supervisor poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Serial reader poll interval
    pub fn reader_poll(&self) -> Duration {
        Duration::from_millis(self.reader_poll_ms)
    }
}
