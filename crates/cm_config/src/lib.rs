//! `cm_config` - Configuration parsing and validation for the cluster monitor
//!
//! This crate provides:
//! - TOML configuration parsing
//! - Default value handling
//! - Environment variable and command-line overrides
//! - Auto-discovery from standard config paths
//!
//! The resolved [`MonitorConfig`] is immutable once validated; the scheduler
//! and aggregator receive the pieces they need at construction.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Top-level configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MonitorConfig {
    /// Global settings
    pub global: GlobalConfig,

    /// Backing store connection strings
    pub stores: StoresConfig,

    /// Reward calendar settings
    pub rewards: RewardConfig,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Minutes between cycles, also used to throttle failures
    pub interval_mins: u64,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl GlobalConfig {
    /// Longest accepted interval (one week)
    pub const MAX_INTERVAL_MINS: u64 = 7 * 24 * 60;
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            interval_mins: 2,
            log_level: "info".to_string(),
        }
    }
}

/// Connection strings for the two backing stores
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoresConfig {
    /// Mining/fleet source store (`postgres://...`)
    pub source_dsn: Option<String>,

    /// Operations store (`mysql://...` or a DuckDB path)
    pub ops_dsn: Option<String>,
}

/// Reward calendar configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Fixed UTC offset that defines "today" and "yesterday" for rewards
    pub reference_offset: String,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            reference_offset: "+08:00".to_string(),
        }
    }
}

/// Values supplied on the command line; `None` leaves the config untouched
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub source_dsn: Option<String>,
    pub ops_dsn: Option<String>,
    pub interval_mins: Option<u64>,
}

impl MonitorConfig {
    /// Standard config file paths, in order of precedence
    #[must_use]
    pub fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("cluster-monitor.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("cluster-monitor").join("config.toml"));
        }

        paths.push(PathBuf::from("/etc/cluster-monitor/config.toml"));

        paths
    }

    /// Discover and load configuration from standard paths.
    ///
    /// Returns defaults if no config file is found. Not validated, since the
    /// connection strings usually arrive later through env or flags.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if a discovered config file cannot be read or parsed.
    pub fn discover() -> Result<Self, ConfigError> {
        match Self::discover_path() {
            Some(path) => {
                info!(path = %path.display(), "Loading config from");
                Self::load(&path)
            }
            None => {
                info!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// First existing file among [`Self::config_paths`]
    pub fn discover_path() -> Option<PathBuf> {
        Self::config_paths().into_iter().find(|path| path.exists())
    }

    /// Load configuration from a specific TOML file.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the text is not valid TOML for this schema.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve the full configuration: file, then environment, then flags.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if loading fails or the result does not validate.
    pub fn resolve(path: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::discover()?,
        };
        config.apply_env_overrides();
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup (environment or a test map)
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("CM_SOURCE_DSN") {
            self.stores.source_dsn = Some(val);
        }
        if let Some(val) = lookup("CM_OPS_DSN") {
            self.stores.ops_dsn = Some(val);
        }
        if let Some(val) = lookup("CM_INTERVAL_MINS")
            && let Ok(mins) = val.parse()
        {
            self.global.interval_mins = mins;
        }
        if let Some(val) = lookup("CM_LOG_LEVEL") {
            self.global.log_level = val;
        }
    }

    /// Apply command-line overrides
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(dsn) = &overrides.source_dsn {
            self.stores.source_dsn = Some(dsn.clone());
        }
        if let Some(dsn) = &overrides.ops_dsn {
            self.stores.ops_dsn = Some(dsn.clone());
        }
        if let Some(mins) = overrides.interval_mins {
            self.global.interval_mins = mins;
        }
    }

    /// Validate configuration.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when validation rules are violated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stores.source_dsn.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::MissingField("stores.source_dsn".to_string()));
        }
        if self.stores.ops_dsn.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::MissingField("stores.ops_dsn".to_string()));
        }

        if self.global.interval_mins == 0 {
            return Err(ConfigError::ValidationError(
                "interval_mins must be > 0".to_string(),
            ));
        }
        if self.global.interval_mins > GlobalConfig::MAX_INTERVAL_MINS {
            return Err(ConfigError::ValidationError(format!(
                "interval_mins must be <= {}",
                GlobalConfig::MAX_INTERVAL_MINS
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.global.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.global.log_level,
                valid_levels.join(", ")
            )));
        }

        self.reference_offset()?;

        Ok(())
    }

    /// Get the cycle interval as Duration
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.global.interval_mins.saturating_mul(60))
    }

    /// Parse the reward reference offset (e.g. `+08:00`).
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the offset is not a valid `±HH:MM` value.
    pub fn reference_offset(&self) -> Result<FixedOffset, ConfigError> {
        self.rewards.reference_offset.parse().map_err(|e| {
            ConfigError::ValidationError(format!(
                "Invalid rewards.reference_offset '{}': {e}",
                self.rewards.reference_offset
            ))
        })
    }

    /// Source DSN, empty if unset (only meaningful after [`Self::validate`])
    #[must_use]
    pub fn source_dsn(&self) -> &str {
        self.stores.source_dsn.as_deref().unwrap_or_default()
    }

    /// Ops DSN, empty if unset (only meaningful after [`Self::validate`])
    #[must_use]
    pub fn ops_dsn(&self) -> &str {
        self.stores.ops_dsn.as_deref().unwrap_or_default()
    }
}
