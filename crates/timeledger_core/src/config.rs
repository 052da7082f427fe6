//! Engine configuration.
//!
//! # Responsibility
//! - Load engine settings from JSON with defaults for every field.
//! - Reject settings the engine cannot run with before any work starts.

use crate::calendar::{parse_timezone, DEFAULT_CENTER_TIMEZONE};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "cannot read engine config: {err}"),
            Self::Parse(err) => write!(f, "cannot parse engine config: {err}"),
            Self::Invalid(message) => write!(f, "invalid engine config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// IANA zone every center's local dates and times are read in.
    pub timezone: String,
    /// Lead used when a center stores a negative `exception_lead_days`.
    pub default_exception_lead_days: u32,
    pub cache_ttl_secs: u64,
    /// Cap for enumerating open-ended rules in recurrence edits.
    pub recurrence_horizon_days: u32,
    pub log_level: String,
    pub log_dir: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_CENTER_TIMEZONE.name().to_string(),
            default_exception_lead_days: 14,
            cache_ttl_secs: 600,
            recurrence_horizon_days: 365,
            log_level: crate::logging::default_log_level().to_string(),
            log_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_timezone(&self.timezone).map_err(|err| ConfigError::Invalid(err.to_string()))?;
        if self.cache_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "cache_ttl_secs must be positive".to_string(),
            ));
        }
        if self.recurrence_horizon_days == 0 {
            return Err(ConfigError::Invalid(
                "recurrence_horizon_days must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tz(&self) -> Tz {
        parse_timezone(&self.timezone).unwrap_or(DEFAULT_CENTER_TIMEZONE)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
