//! Engine configuration.
//!
//! All fields are required unless explicitly marked optional. No defaults.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Bound on the wait for a subscribe-ack before the attempt counts as
    /// failed.
    pub subscribe_timeout_ms: u64,
    /// Debounce window coalescing rapid background->active transitions.
    pub foreground_debounce_ms: u64,
    /// Idle gap after which recorded activity distrusts the cache.
    pub inactivity_threshold_ms: u64,
    pub reconnect: ReconnectConfig,
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub max_attempts: u32,
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    /// Interval between health checks while connected.
    pub interval_ms: u64,
    /// A connection with no successful check inside this window is treated
    /// as silently dead.
    pub stale_after_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl SyncConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subscribe_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "subscribe_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.foreground_debounce_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "foreground_debounce_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.inactivity_threshold_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "inactivity_threshold_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.reconnect.initial_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.initial_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.reconnect.max_ms < self.reconnect.initial_ms {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.max_ms",
                reason: "must be >= initial_ms".to_string(),
            });
        }
        if self.reconnect.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.max_attempts",
                reason: "must be > 0".to_string(),
            });
        }
        if self.health.interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "health.interval_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.health.stale_after_ms < self.health.interval_ms {
            return Err(ConfigError::InvalidValue {
                field: "health.stale_after_ms",
                reason: "must be >= interval_ms".to_string(),
            });
        }
        Ok(())
    }
}
