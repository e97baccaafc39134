//! Staleness filtering for queued reports
//!
//! Under backpressure a report can sit in the queue while newer reports for
//! the same vehicle arrive behind it. Processing it then would waste matcher
//! time on an obsolete position. The [`StalenessQueue`] remembers the newest
//! enqueued fix time per vehicle; at dequeue, a task strictly older than
//! that is discarded without processing.
//!
//! # Memory Behavior
//!
//! The map holds one entry per vehicle ever enqueued and keeps it after
//! dequeue: an older report still sitting in the queue must be recognized
//! as superseded even once the newest one has been consumed. Memory is
//! bounded by fleet size, the same scale as the processor's acceptance map.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reitti_core::AvlReport;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::OwnedSemaphorePermit;

/// One unit of queued work: a report plus the admission permit that holds
/// its in-flight slot. Dropping the task (processed or discarded) releases
/// the slot.
pub(crate) struct DispatchTask {
    pub report: AvlReport,
    pub permit: OwnedSemaphorePermit,
}

/// Newest-enqueued fix time per vehicle.
pub struct StalenessQueue {
    /// vehicle id -> newest fix time currently enqueued
    newest: Mutex<HashMap<String, DateTime<Utc>>>,
    /// Count of reports discarded at dequeue as superseded
    superseded: AtomicU64,
}

impl StalenessQueue {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self {
            newest: Mutex::new(HashMap::new()),
            superseded: AtomicU64::new(0),
        }
    }

    /// Record a report entering the queue.
    ///
    /// Keeps the newest fix time even if reports arrive out of order.
    pub fn record_enqueue(&self, report: &AvlReport) {
        let mut newest = self.newest.lock();
        let slot = newest
            .entry(report.vehicle_id.clone())
            .or_insert(report.time);
        if report.time > *slot {
            *slot = report.time;
        }
    }

    /// Decide whether a dequeued report should be processed.
    ///
    /// Returns false when a strictly newer report for the same vehicle has
    /// been enqueued; the caller discards the task. Equal timestamps pass:
    /// the processor's acceptance check is what prevents double-applying a
    /// duplicate.
    pub fn admit(&self, report: &AvlReport) -> bool {
        let newest = self.newest.lock();
        match newest.get(&report.vehicle_id) {
            Some(&latest) if report.time < latest => {
                self.superseded.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    vehicle_id = %report.vehicle_id,
                    report_time = %report.time,
                    newest_time = %latest,
                    "superseded report discarded at dequeue"
                );
                false
            }
            _ => true,
        }
    }

    /// Count of reports discarded as superseded.
    pub fn superseded_count(&self) -> u64 {
        self.superseded.load(Ordering::Relaxed)
    }

    /// Number of vehicles with a report currently tracked.
    ///
    /// Snapshot at the time of the call; may change immediately after.
    pub fn tracked(&self) -> usize {
        self.newest.lock().len()
    }
}

impl Default for StalenessQueue {
    fn default() -> Self {
        Self::new()
    }
}
