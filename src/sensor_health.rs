//! Frame tracking and silence detection for localization sensors.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::SensorId;

struct HealthState {
    last_frame: HashMap<SensorId, Instant>,
    silent: HashSet<SensorId>,
}

/// Tracks when each sensor last delivered a frame and reports the ones that
/// have gone quiet for longer than a timeout.
pub struct SensorHealth {
    state: Mutex<HealthState>,
}

impl SensorHealth {
    fn overdue_sensors(state: &HealthState, now: Instant, timeout: Duration) -> Vec<SensorId> {
        state
            .last_frame
            .iter()
            .filter(|(_, last)| now.duration_since(**last) > timeout)
            .map(|(sensor, _)| sensor.clone())
            .collect()
    }

    pub fn new() -> Self {
        Self {
            state: Mutex::new(HealthState {
                last_frame: HashMap::new(),
                silent: HashSet::new(),
            }),
        }
    }

    /// Start tracking a sensor that has not delivered anything yet.
    pub fn register_sensor(&self, sensor: &str) {
        let mut guard = self.state.lock().expect("sensor health mutex poisoned");
        guard
            .last_frame
            .entry(sensor.to_string())
            .or_insert_with(Instant::now);
    }

    /// Record a frame; clears any prior silent mark for the sensor.
    pub fn record_frame(&self, sensor: &str) {
        let mut guard = self.state.lock().expect("sensor health mutex poisoned");
        guard.last_frame.insert(sensor.to_string(), Instant::now());
        guard.silent.remove(sensor);
    }

    /// Mark and return every sensor whose last frame exceeds the timeout.
    pub fn detect_silent(&self, timeout: Duration) -> HashSet<SensorId> {
        let mut guard = self.state.lock().expect("sensor health mutex poisoned");
        let overdue = Self::overdue_sensors(&guard, Instant::now(), timeout);
        guard.silent.extend(overdue);
        guard.silent.clone()
    }

    /// Number of sensors seen or registered so far.
    pub fn tracked(&self) -> usize {
        let guard = self.state.lock().expect("sensor health mutex poisoned");
        guard.last_frame.len()
    }

    #[cfg(test)]
    fn set_last_frame_for_test(&self, sensor: &str, instant: Instant) {
        let mut guard = self.state.lock().expect("sensor health mutex poisoned");
        guard.last_frame.insert(sensor.to_string(), instant);
    }
}

impl Default for SensorHealth {
    fn default() -> Self {
        Self::new()
    }
}
