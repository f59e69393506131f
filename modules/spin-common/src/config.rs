use std::env;
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SpinError};

/// Default capacity of the channel between two stages on different contexts.
pub const DEFAULT_STAGE_BUFFER: usize = 16;

/// Runtime tuning for a feedback loop.
///
/// Deserializes with defaults for missing fields so it can be embedded in a
/// larger application config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Capacity of each context-switch channel.
    pub stage_buffer: usize,
    /// Upper bound on concurrently executing commands. `None` = unbounded.
    pub max_in_flight: Option<usize>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            stage_buffer: DEFAULT_STAGE_BUFFER,
            max_in_flight: None,
        }
    }
}

impl LoopConfig {
    /// Load configuration from `SPIN_STAGE_BUFFER` and `SPIN_MAX_IN_FLIGHT`.
    /// Unset variables fall back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            stage_buffer: parse_var(&lookup, "SPIN_STAGE_BUFFER")?
                .unwrap_or(defaults.stage_buffer),
            max_in_flight: parse_var(&lookup, "SPIN_MAX_IN_FLIGHT")?.or(defaults.max_in_flight),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stage_buffer == 0 {
            return Err(SpinError::Config(
                "stage_buffer must be at least 1".to_string(),
            ));
        }
        if self.max_in_flight == Some(0) {
            return Err(SpinError::Config(
                "max_in_flight must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn log(&self) {
        info!(
            stage_buffer = self.stage_buffer,
            max_in_flight = ?self.max_in_flight,
            "Loop configuration"
        );
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|e| SpinError::Config(format!("{key}={raw:?} is invalid: {e}")))
}
