//! Thread-safe store of the latest part observations, one frame per sensor.
//!
//! Sensor feeds push whole frames from their own threads; the build queue
//! claims parts out of the current frames, blocking until a matching (and,
//! for re-queries, strictly fresher) observation shows up.

use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::LocateError;
use crate::sensor_health::SensorHealth;
use crate::shutdown::ShutdownSignal;
use crate::types::{Part, PartSighting, SensorId};

struct LocatorState {
    frames: HashMap<SensorId, Vec<Part>>,
    next_seq: u64,
}

impl LocatorState {
    /// Remove and return the freshest part of the type newer than `newer_than`.
    fn take_freshest(&mut self, part_type: &str, newer_than: Option<u64>) -> Option<Part> {
        let min_seq = newer_than.unwrap_or(0);
        let (sensor, index, _) = self
            .frames
            .iter()
            .flat_map(|(sensor, parts)| {
                parts
                    .iter()
                    .enumerate()
                    .map(move |(index, part)| (sensor, index, part))
            })
            .filter(|(_, _, part)| part.part_type == part_type && part.seq > min_seq)
            .max_by_key(|(_, _, part)| part.seq)
            .map(|(sensor, index, part)| (sensor.clone(), index, part.seq))?;
        self.frames
            .get_mut(&sensor)
            .map(|parts| parts.swap_remove(index))
    }
}

/// Latest frame per sensor plus the sensors' liveness.
pub struct PartLocator {
    state: Mutex<LocatorState>,
    updated: Condvar,
    health: SensorHealth,
    poll: Duration,
}

impl PartLocator {
    pub fn new(poll: Duration) -> Self {
        Self {
            state: Mutex::new(LocatorState {
                frames: HashMap::new(),
                next_seq: 1,
            }),
            updated: Condvar::new(),
            health: SensorHealth::new(),
            poll,
        }
    }

    /// Track sensors up front so one that never reports is caught as silent.
    pub fn register_sensors<'a>(&self, sensors: impl IntoIterator<Item = &'a str>) {
        for sensor in sensors {
            self.health.register_sensor(sensor);
        }
    }

    /// Replace the sensor's current frame and wake blocked claimers.
    /// Each part is stamped with a fresh observation sequence number.
    pub fn observe_frame(&self, sensor: &str, sightings: Vec<PartSighting>) {
        let mut guard = self.state.lock().expect("locator mutex poisoned");
        let mut parts = Vec::with_capacity(sightings.len());
        for sighting in sightings {
            let seq = guard.next_seq;
            guard.next_seq += 1;
            parts.push(Part {
                part_type: sighting.part_type,
                pose: sighting.pose,
                source: sensor.to_string(),
                seq,
            });
        }
        debug!(sensor, parts = parts.len(), "frame observed");
        guard.frames.insert(sensor.to_string(), parts);
        drop(guard);
        self.health.record_frame(sensor);
        self.updated.notify_all();
    }

    /// Claim the freshest part of `part_type` observed after `newer_than`.
    ///
    /// Blocks until one is available, the timeout elapses, or shutdown fires.
    /// A fired shutdown wins even when a matching part is already visible.
    /// `None` for the timeout waits indefinitely. A claimed part is removed
    /// from its frame so it is never handed out twice.
    pub fn claim(
        &self,
        part_type: &str,
        newer_than: Option<u64>,
        timeout: Option<Duration>,
        shutdown: &ShutdownSignal,
    ) -> Result<Part, LocateError> {
        let start = Instant::now();
        let mut guard = self.state.lock().expect("locator mutex poisoned");
        loop {
            if shutdown.is_triggered() {
                return Err(LocateError::Cancelled);
            }
            if let Some(part) = guard.take_freshest(part_type, newer_than) {
                return Ok(part);
            }
            let mut wait = self.poll;
            if let Some(timeout) = timeout {
                let waited = start.elapsed();
                if waited >= timeout {
                    return Err(LocateError::TimedOut {
                        part_type: part_type.to_string(),
                        waited,
                    });
                }
                wait = wait.min(timeout - waited);
            }
            // Wait releases the lock and re-acquires it before returning.
            let (next, _) = self
                .updated
                .wait_timeout(guard, wait)
                .expect("condvar wait failed");
            guard = next;
        }
    }

    /// Number of unclaimed parts across all current frames.
    pub fn visible_parts(&self) -> usize {
        let guard = self.state.lock().expect("locator mutex poisoned");
        guard.frames.values().map(Vec::len).sum()
    }

    /// Sensors whose last frame is older than `timeout`.
    pub fn silent_sensors(&self, timeout: Duration) -> HashSet<SensorId> {
        self.health.detect_silent(timeout)
    }

    pub fn tracked_sensors(&self) -> usize {
        self.health.tracked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pose;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;

    fn sighting(part_type: &str, x: f64) -> PartSighting {
        PartSighting::new(part_type, Pose::from_translation(x, 0.0, 0.0))
    }

    #[test]
    fn claims_freshest_matching_part_once() {
        let locator = PartLocator::new(Duration::from_millis(5));
        let shutdown = ShutdownSignal::new();
        locator.observe_frame("cam1", vec![sighting("gear", 1.0), sighting("pulley", 2.0)]);
        locator.observe_frame("cam2", vec![sighting("gear", 3.0)]);

        let first = locator
            .claim("gear", None, Some(Duration::from_millis(10)), &shutdown)
            .expect("first gear");
        assert_eq!(first.source, "cam2");
        let second = locator
            .claim("gear", None, Some(Duration::from_millis(10)), &shutdown)
            .expect("second gear");
        assert_eq!(second.source, "cam1");
        assert!(second.seq < first.seq);

        // Both gears are claimed; a third claim must time out.
        let err = locator
            .claim("gear", None, Some(Duration::from_millis(20)), &shutdown)
            .expect_err("gear claimed twice");
        assert!(matches!(err, LocateError::TimedOut { .. }));
        assert_eq!(locator.visible_parts(), 1);
    }

    #[test]
    fn newer_than_skips_stale_observations() {
        let locator = PartLocator::new(Duration::from_millis(5));
        let shutdown = ShutdownSignal::new();
        locator.observe_frame("cam1", vec![sighting("gear", 1.0)]);
        let stale = locator
            .claim("gear", None, None, &shutdown)
            .expect("gear");
        locator.observe_frame("cam1", vec![sighting("gear", 1.0)]);
        let fresh = locator
            .claim("gear", Some(stale.seq), Some(Duration::from_millis(10)), &shutdown)
            .expect("fresh gear");
        assert!(fresh.seq > stale.seq);
    }

    #[test]
    fn claim_wakes_on_new_frame() {
        let locator = Arc::new(PartLocator::new(Duration::from_millis(500)));
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let claimer = Arc::clone(&locator);
        let handle = thread::spawn(move || {
            ready_tx.send(()).expect("ready");
            let part = claimer
                .claim("disk", None, Some(Duration::from_secs(2)), &ShutdownSignal::new())
                .expect("disk");
            done_tx.send(part.source).expect("done");
        });

        ready_rx.recv_timeout(Duration::from_secs(1)).expect("ready");
        locator.observe_frame("cam7", vec![sighting("disk", 0.5)]);
        let source = done_rx.recv_timeout(Duration::from_secs(1)).expect("claimed");
        assert_eq!(source, "cam7");
        handle.join().expect("claimer panicked");
    }

    #[test]
    fn claim_unblocks_on_shutdown() {
        let locator = Arc::new(PartLocator::new(Duration::from_millis(5)));
        let shutdown = ShutdownSignal::new();
        let (done_tx, done_rx) = mpsc::channel();

        let claimer = Arc::clone(&locator);
        let signal = shutdown.clone();
        let handle = thread::spawn(move || {
            let result = claimer.claim("disk", None, None, &signal);
            done_tx.send(result).expect("done");
        });

        shutdown.trigger();
        let result = done_rx.recv_timeout(Duration::from_secs(1)).expect("unblocked");
        assert_eq!(result, Err(LocateError::Cancelled));
        handle.join().expect("claimer panicked");
    }

    #[test]
    fn shutdown_wins_over_visible_part() {
        let locator = PartLocator::new(Duration::from_millis(5));
        locator.observe_frame("cam1", vec![sighting("disk", 0.0)]);
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();

        let result = locator.claim("disk", None, None, &shutdown);

        assert_eq!(result, Err(LocateError::Cancelled));
        assert_eq!(locator.visible_parts(), 1);
    }

    #[test]
    fn unreported_sensor_is_silent() {
        let locator = PartLocator::new(Duration::from_millis(5));
        locator.register_sensors(["cam1", "cam2"]);
        locator.observe_frame("cam1", Vec::new());
        thread::sleep(Duration::from_millis(30));
        locator.observe_frame("cam1", Vec::new());
        let silent = locator.silent_sensors(Duration::from_millis(20));
        assert!(silent.contains("cam2"));
        assert!(!silent.contains("cam1"));
        assert_eq!(locator.tracked_sensors(), 2);
    }
}
