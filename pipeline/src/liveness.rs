//! Vehicle liveness tracking
//!
//! Every accepted report first sweeps an update-ordered registry from the
//! oldest entry, then touches its own vehicle. A vehicle whose last
//! accepted report is older than the timeout is removed and reported to
//! the matcher as unpredictable; a vehicle waiting out a scheduled layover
//! is exempt and gets a fresh timeout instead. Sweeping before the touch
//! means a vehicle returning after a long silence is declared unpredictable
//! for that silence even when its own report is what triggers the sweep.
//!
//! The sweep's reference time is the incoming report's fix time, not the
//! wall clock. Playback runs therefore time out vehicles at the same points
//! in the recorded stream as the live run did, and a live feed behaves the
//! same because its fix times track the wall clock.
//!
//! The registry is an ordered map keyed by a monotonically increasing touch
//! sequence plus a vehicle-id index, so peeking the oldest entry and moving
//! an entry to the end are both cheap. The sweep stops at the first fresh
//! entry: everything behind it is newer still.

use crate::metrics::Metrics;
use chrono::{DateTime, Duration, Utc};
use reitti_core::{AvlReport, MatchingEngine, VehicleStatus};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Clone, Copy)]
struct Entry {
    seq: u64,
    last_time: DateTime<Utc>,
}

#[derive(Default)]
struct Registry {
    /// touch sequence -> vehicle id, oldest first
    by_seq: BTreeMap<u64, String>,
    /// vehicle id -> current entry
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

impl Registry {
    /// Insert or refresh a vehicle, moving it to the newest position.
    fn touch(&mut self, vehicle_id: &str, time: DateTime<Utc>) {
        let seq = self.next_seq;
        self.next_seq += 1;

        if let Some(old) = self.entries.insert(
            vehicle_id.to_string(),
            Entry {
                seq,
                last_time: time,
            },
        ) {
            self.by_seq.remove(&old.seq);
        }
        self.by_seq.insert(seq, vehicle_id.to_string());
    }

    fn remove(&mut self, vehicle_id: &str) -> Option<Entry> {
        let entry = self.entries.remove(vehicle_id)?;
        self.by_seq.remove(&entry.seq);
        Some(entry)
    }

    fn oldest(&self) -> Option<(String, Entry)> {
        let (_, vehicle_id) = self.by_seq.iter().next()?;
        let entry = self.entries.get(vehicle_id)?;
        Some((vehicle_id.clone(), *entry))
    }
}

/// Detects vehicles that have stopped reporting.
pub struct LivenessSweeper {
    registry: tokio::sync::Mutex<Registry>,
    timeout: Duration,
    matcher: Arc<dyn MatchingEngine>,
    status: Arc<dyn VehicleStatus>,
}

impl LivenessSweeper {
    /// Create a sweeper.
    ///
    /// `timeout` is how long a tracked vehicle may go without an accepted
    /// report before it is marked unpredictable.
    pub fn new(
        timeout: std::time::Duration,
        matcher: Arc<dyn MatchingEngine>,
        status: Arc<dyn VehicleStatus>,
    ) -> Self {
        Self {
            registry: tokio::sync::Mutex::new(Registry::default()),
            timeout: Duration::from_std(timeout).unwrap_or(Duration::MAX),
            matcher,
            status,
        }
    }

    /// Record an accepted report and sweep for timed-out vehicles.
    ///
    /// Sweeps are serialized by the registry lock; the matcher call for a
    /// timed-out vehicle happens under it, which is fine because timeouts
    /// are rare relative to report volume.
    pub async fn observe(&self, report: &AvlReport) {
        let now = report.time;
        let mut registry = self.registry.lock().await;

        // Sweep before touching the incoming vehicle: if it went silent past
        // the timeout, its stale entry must be retired like any other before
        // the new report re-registers it.
        while let Some((vehicle_id, entry)) = registry.oldest() {
            if now - entry.last_time <= self.timeout {
                // Oldest entry is fresh, so everything behind it is too.
                break;
            }

            if self.status.is_waiting_at_layover(&vehicle_id) {
                // Layover vehicles legitimately go quiet. Give the vehicle
                // a full fresh timeout measured from this report's time.
                debug!(
                    vehicle_id = %vehicle_id,
                    last_seen = %entry.last_time,
                    "timeout deferred, vehicle waiting at layover"
                );
                registry.touch(&vehicle_id, now);
                continue;
            }

            registry.remove(&vehicle_id);
            warn!(
                vehicle_id = %vehicle_id,
                last_seen = %entry.last_time,
                silent_for = %(now - entry.last_time),
                "vehicle timed out, marking unpredictable"
            );
            if let Some(m) = Metrics::get() {
                m.record_vehicle_timed_out();
            }
            if let Err(e) = self
                .matcher
                .mark_unpredictable(&vehicle_id, entry.last_time)
                .await
            {
                error!(
                    vehicle_id = %vehicle_id,
                    error = %e,
                    "failed to mark vehicle unpredictable"
                );
            }
        }

        registry.touch(&report.vehicle_id, now);

        if let Some(m) = Metrics::get() {
            m.set_tracked_vehicles(registry.entries.len());
        }
    }

    /// Stop tracking a vehicle without marking it unpredictable, for when
    /// it is retired externally (end of service, reassignment).
    pub async fn forget(&self, vehicle_id: &str) {
        let mut registry = self.registry.lock().await;
        registry.remove(vehicle_id);
    }

    /// Number of currently tracked vehicles.
    pub async fn tracked(&self) -> usize {
        self.registry.lock().await.entries.len()
    }

    /// Last accepted fix time for a tracked vehicle.
    pub async fn last_seen(&self, vehicle_id: &str) -> Option<DateTime<Utc>> {
        self.registry
            .lock()
            .await
            .entries
            .get(vehicle_id)
            .map(|e| e.last_time)
    }
}
