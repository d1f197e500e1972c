//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all, see [`Config::load_or_default`]) yields a usable configuration.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::controller::matcher::DEFAULT_VENDOR_SUFFIXES;
use crate::error::{Result, WheelInputError};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub profiles: ProfilesConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device profile store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ProfilesConfig {
    #[serde(default = "default_profiles_dir")]
    pub dir: String,
}

/// Device name matching configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MatcherConfig {
    /// Normalized suffixes stripped from device names before comparison.
    #[serde(default = "default_vendor_suffixes")]
    pub vendor_suffixes: Vec<String>,
}

/// Controller session configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_poll_period_ms")]
    pub poll_period_ms: u64,

    #[serde(default = "default_precision_digits")]
    pub precision_digits: u32,

    /// 0 disables the periodic presence check.
    #[serde(default = "default_presence_check_interval_ms")]
    pub presence_check_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Empty disables file logging.
    #[serde(default)]
    pub log_dir: String,
}

// Default value functions
fn default_profiles_dir() -> String { "./profiles".to_string() }

fn default_vendor_suffixes() -> Vec<String> {
    DEFAULT_VENDOR_SUFFIXES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_poll_period_ms() -> u64 { 10 }
fn default_precision_digits() -> u32 { 2 }
fn default_presence_check_interval_ms() -> u64 { 1000 }

fn default_log_level() -> String { "info".to_string() }

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self { dir: default_profiles_dir() }
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self { vendor_suffixes: default_vendor_suffixes() }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_period_ms: default_poll_period_ms(),
            precision_digits: default_precision_digits(),
            presence_check_interval_ms: default_presence_check_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: String::new(),
        }
    }
}

impl SessionConfig {
    /// Poll tick period.
    #[must_use]
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }

    /// Presence check period, `None` when disabled.
    #[must_use]
    pub fn presence_check_interval(&self) -> Option<Duration> {
        match self.presence_check_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use wheel_input::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from `path` if it exists, defaults otherwise.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.profiles.dir.is_empty() {
            return Err(invalid("profiles dir cannot be empty"));
        }

        for suffix in &self.matcher.vendor_suffixes {
            if suffix.is_empty() {
                return Err(invalid("vendor_suffixes cannot contain an empty suffix"));
            }
            if suffix.contains(' ') || suffix.chars().any(|c| c.is_uppercase()) {
                return Err(invalid(format!(
                    "vendor suffix '{}' must be normalized (lower-case, underscores)",
                    suffix
                )));
            }
        }

        if self.session.poll_period_ms == 0 || self.session.poll_period_ms > 1000 {
            return Err(invalid("poll_period_ms must be between 1 and 1000"));
        }

        if self.session.precision_digits > 6 {
            return Err(invalid("precision_digits must be between 0 and 6"));
        }

        let presence = self.session.presence_check_interval_ms;
        if presence != 0 && !(10..=60000).contains(&presence) {
            return Err(invalid(
                "presence_check_interval_ms must be 0 (disabled) or between 10 and 60000",
            ));
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("log level must be one of: trace, debug, info, warn, error"));
        }

        Ok(())
    }
}

fn invalid(msg: impl std::fmt::Display) -> WheelInputError {
    WheelInputError::Config(toml::de::Error::custom(msg))
}
