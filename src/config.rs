//! Tunables of the scheduling core.
//!
//! Every field has a default, so an empty `[scheduler]` table is valid.

use crate::entry::EntryRules;
use crate::slot::{SlotGrid, DEFAULT_SLOT_MINUTES};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_WINDOW_SECS: u64 = 3600;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("slot_minutes = {0} does not divide the hour")]
    SlotGrid(u32),

    #[error("tick_seconds = {tick} must be between 1 and the slot length ({slot} s) and divide it")]
    Tick { tick: u64, slot: u64 },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{0} is out of range")]
    OutOfRange(&'static str),

    #[error("temperature range {min}..={max} is empty")]
    TemperatureRange { min: f64, max: f64 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClimateConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub temperature: TemperatureRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_slot_minutes")]
    pub slot_minutes: u32,
    /// Defaults to the slot length.
    #[serde(default)]
    pub tick_seconds: Option<u64>,
    #[serde(default = "default_attribution_window_secs")]
    pub attribution_window_secs: u64,
    #[serde(default = "default_controller_timeout_secs")]
    pub controller_timeout_secs: u64,
    #[serde(default = "default_timezone_cache_ttl_secs")]
    pub timezone_cache_ttl_secs: u64,
    /// Carry yesterday's last entry over when a zone enters AUTO before the
    /// first entry of the day.
    #[serde(default)]
    pub auto_entry_lookback: bool,
}

fn default_slot_minutes() -> u32 {
    DEFAULT_SLOT_MINUTES
}

fn default_attribution_window_secs() -> u64 {
    10
}

fn default_controller_timeout_secs() -> u64 {
    10
}

fn default_timezone_cache_ttl_secs() -> u64 {
    crate::time_source::DEFAULT_TIMEZONE_TTL_SECS
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            slot_minutes: default_slot_minutes(),
            tick_seconds: None,
            attribution_window_secs: default_attribution_window_secs(),
            controller_timeout_secs: default_controller_timeout_secs(),
            timezone_cache_ttl_secs: default_timezone_cache_ttl_secs(),
            auto_entry_lookback: false,
        }
    }
}

impl SchedulerConfig {
    pub fn grid(&self) -> Result<SlotGrid, ConfigError> {
        SlotGrid::new(self.slot_minutes).ok_or(ConfigError::SlotGrid(self.slot_minutes))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds.unwrap_or(u64::from(self.slot_minutes) * 60))
    }

    pub fn attribution_window(&self) -> Duration {
        Duration::from_secs(self.attribution_window_secs.min(MAX_WINDOW_SECS))
    }

    pub fn controller_timeout(&self) -> Duration {
        Duration::from_secs(self.controller_timeout_secs)
    }

    pub fn timezone_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.timezone_cache_ttl_secs)
    }

    pub fn validate(&self) -> Result<SlotGrid, ConfigError> {
        let grid = self.grid()?;
        let tick = self.tick().as_secs();
        if tick == 0 || tick > grid.seconds() || grid.seconds() % tick != 0 {
            return Err(ConfigError::Tick { tick, slot: grid.seconds() });
        }
        if self.controller_timeout_secs == 0 {
            return Err(ConfigError::Zero("controller_timeout_secs"));
        }
        if self.attribution_window_secs == 0 {
            return Err(ConfigError::Zero("attribution_window_secs"));
        }
        if self.attribution_window_secs > MAX_WINDOW_SECS {
            return Err(ConfigError::OutOfRange("attribution_window_secs"));
        }
        Ok(grid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureRange {
    #[serde(default = "default_min")]
    pub min: f64,
    #[serde(default = "default_max")]
    pub max: f64,
}

fn default_min() -> f64 {
    5.0
}

fn default_max() -> f64 {
    30.0
}

impl Default for TemperatureRange {
    fn default() -> Self {
        TemperatureRange { min: default_min(), max: default_max() }
    }
}

impl ClimateConfig {
    /// Checks every section and returns the write-time entry rules.
    pub fn validate(&self) -> Result<EntryRules, ConfigError> {
        let grid = self.scheduler.validate()?;
        let TemperatureRange { min, max } = self.temperature;
        if !(min.is_finite() && max.is_finite() && min <= max) {
            return Err(ConfigError::TemperatureRange { min, max });
        }
        Ok(EntryRules { grid, min_temperature: min, max_temperature: max })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() -> anyhow::Result<()> {
        let config: ClimateConfig = toml::from_str("")?;
        assert_eq!(config, ClimateConfig::default());
        let rules = config.validate()?;
        assert_eq!(rules.grid.minutes(), 15);
        assert_eq!(config.scheduler.tick(), Duration::from_secs(900));
        assert_eq!(config.scheduler.timezone_cache_ttl(), Duration::from_secs(3600));
        Ok(())
    }

    #[test]
    fn partial_tables_keep_other_defaults() -> anyhow::Result<()> {
        let config: ClimateConfig = toml::from_str(
            r#"
            [scheduler]
            slot_minutes = 30
            tick_seconds = 60
            auto_entry_lookback = true

            [temperature]
            max = 25.0
            "#,
        )?;
        assert_eq!(config.scheduler.attribution_window(), Duration::from_secs(10));
        assert!(config.scheduler.auto_entry_lookback);
        let rules = config.validate()?;
        assert_eq!(rules.grid.minutes(), 30);
        assert_eq!(rules.min_temperature, 5.0);
        assert_eq!(rules.max_temperature, 25.0);
        Ok(())
    }

    #[test]
    fn invalid_settings_rejected() {
        let mut config = ClimateConfig::default();
        config.scheduler.slot_minutes = 7;
        assert_eq!(config.validate().unwrap_err(), ConfigError::SlotGrid(7));

        let mut config = ClimateConfig::default();
        config.scheduler.tick_seconds = Some(1200);
        assert!(matches!(config.validate(), Err(ConfigError::Tick { .. })));
        config.scheduler.tick_seconds = Some(7 * 60);
        assert!(matches!(config.validate(), Err(ConfigError::Tick { .. })));

        let mut config = ClimateConfig::default();
        config.temperature = TemperatureRange { min: 25.0, max: 20.0 };
        assert!(matches!(config.validate(), Err(ConfigError::TemperatureRange { .. })));
    }
}
