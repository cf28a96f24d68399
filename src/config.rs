//! Scheduler configuration, loaded from TOML.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Tunables for the scheduler and its blocking waits.
///
/// Every key is optional in the file; missing keys take the defaults below.
/// A zero `max_place_attempts` or `localization_timeout_ms` disables the bound.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Lateral offset subtracted from the part x when retreating to staging.
    pub staging_x_offset: f64,
    /// Placement attempts per product before it is reported failed.
    pub max_place_attempts: u32,
    /// Bound on waiting for a part observation, in milliseconds.
    pub localization_timeout_ms: u64,
    /// Slice used by blocking waits to re-check the shutdown signal.
    pub poll_interval_ms: u64,
    /// A sensor with no frame for this long is reported silent.
    pub sensor_silence_ms: u64,
    /// Lane ids known to the lane board.
    pub lanes: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            staging_x_offset: 0.4,
            max_place_attempts: 10,
            localization_timeout_ms: 30_000,
            poll_interval_ms: 50,
            sensor_silence_ms: 5_000,
            lanes: vec!["agv1".to_string(), "agv2".to_string()],
        }
    }
}

impl SchedulerConfig {
    /// Read, parse, and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lanes.is_empty() {
            return Err(ConfigError::Invalid("at least one lane is required".into()));
        }
        let mut seen = HashSet::new();
        for lane in &self.lanes {
            if lane.trim().is_empty() {
                return Err(ConfigError::Invalid("lane ids must not be empty".into()));
            }
            if !seen.insert(lane.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate lane id: {lane}")));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".into()));
        }
        if !self.staging_x_offset.is_finite() {
            return Err(ConfigError::Invalid("staging_x_offset must be finite".into()));
        }
        Ok(())
    }

    pub fn max_place_attempts(&self) -> Option<u32> {
        (self.max_place_attempts > 0).then_some(self.max_place_attempts)
    }

    pub fn localization_timeout(&self) -> Option<Duration> {
        (self.localization_timeout_ms > 0).then(|| Duration::from_millis(self.localization_timeout_ms))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sensor_silence(&self) -> Duration {
        Duration::from_millis(self.sensor_silence_ms)
    }
}
