//! Configuration file support for Pillbox.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/pillbox/config.toml`.

use crate::{Duration, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub remaining: RemainingConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Defaults applied to incoming prescriptions
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Period used when a prescription arrives with a zero period
    #[serde(default = "default_period")]
    pub default_period: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            default_period: default_period(),
        }
    }
}

/// Remaining-dose query parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemainingConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    #[serde(default = "default_overdue_grace")]
    pub overdue_grace: Duration,

    /// Keep pending doses no matter how overdue they are
    #[serde(default)]
    pub include_overdue: bool,
}

impl Default for RemainingConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            overdue_grace: default_overdue_grace(),
            include_overdue: false,
        }
    }
}

impl RemainingConfig {
    /// Grace window handed to the query, `None` when overdue doses are kept
    pub fn grace(&self) -> Option<Duration> {
        if self.include_overdue {
            None
        } else {
            Some(self.overdue_grace)
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(std::env::temp_dir);
    base.join("pillbox")
}

fn default_period() -> Duration {
    Duration::hours(24)
}

fn default_limit() -> usize {
    50
}

fn default_overdue_grace() -> Duration {
    Duration::hours(24)
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(std::env::temp_dir);
        base.join("pillbox").join("config.toml")
    }

    /// Reject values the service cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.schedule.default_period.is_negative() || self.schedule.default_period.is_zero() {
            return Err(Error::Config(format!(
                "schedule.default_period must be positive, got {}",
                self.schedule.default_period
            )));
        }
        if self.remaining.default_limit == 0 {
            return Err(Error::Config(
                "remaining.default_limit must be at least 1".into(),
            ));
        }
        if self.remaining.overdue_grace.is_negative() {
            return Err(Error::Config(format!(
                "remaining.overdue_grace must not be negative, got {}",
                self.remaining.overdue_grace
            )));
        }
        Ok(())
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}
