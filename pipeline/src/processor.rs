//! Per-report processing stage
//!
//! The processor is the single gate between raw feed data and the
//! downstream collaborators. For each report it:
//!
//! 1. validates the fields,
//! 2. enforces per-vehicle time monotonicity against the last accepted
//!    report (equal or older is discarded, which also makes redelivery
//!    idempotent),
//! 3. optionally skips reports arriving faster than the configured minimum
//!    gap (without advancing the acceptance timestamp),
//! 4. stamps `processed_at`,
//! 5. persists,
//! 6. updates the liveness sweeper and forwards to the matcher.
//!
//! Sink failures are logged and counted, never propagated: a worker must
//! survive a flaky database or matcher.

use crate::liveness::LivenessSweeper;
use crate::metrics::Metrics;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reitti_core::{AvlReport, MatchingEngine, ReportStore};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// What the processor did with a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Passed all checks; persisted and forwarded.
    Accepted,
    /// Failed field validation.
    Invalid,
    /// Not strictly newer than the vehicle's last accepted report.
    Stale,
    /// Newer, but inside the minimum gap; skipped without advancing the
    /// acceptance timestamp.
    Throttled,
}

/// Validates, deduplicates and forwards reports.
pub struct ReportProcessor {
    /// vehicle id -> fix time of the last accepted report
    last_accepted: Mutex<HashMap<String, DateTime<Utc>>>,
    store: Arc<dyn ReportStore>,
    matcher: Arc<dyn MatchingEngine>,
    sweeper: Arc<LivenessSweeper>,
    min_gap: chrono::Duration,
}

impl ReportProcessor {
    /// Create a processor wired to its collaborators.
    ///
    /// `min_gap` of zero disables the inter-report throttle.
    pub fn new(
        store: Arc<dyn ReportStore>,
        matcher: Arc<dyn MatchingEngine>,
        sweeper: Arc<LivenessSweeper>,
        min_gap: chrono::Duration,
    ) -> Self {
        Self {
            last_accepted: Mutex::new(HashMap::new()),
            store,
            matcher,
            sweeper,
            min_gap,
        }
    }

    /// Process one report end to end.
    pub async fn process(&self, report: AvlReport) -> Disposition {
        let now = Utc::now();

        if let Err(e) = report.validate_at(now) {
            warn!(
                vehicle_id = %report.vehicle_id,
                source = report.source_label(),
                error = %e,
                "invalid report discarded"
            );
            if let Some(m) = Metrics::get() {
                m.record_discarded("invalid");
            }
            return Disposition::Invalid;
        }

        // Acceptance check under a short lock; the await points below run
        // with the lock released.
        {
            let mut last = self.last_accepted.lock();
            match last.get(&report.vehicle_id) {
                Some(&prev) if report.time <= prev => {
                    debug!(
                        vehicle_id = %report.vehicle_id,
                        report_time = %report.time,
                        last_accepted = %prev,
                        "stale report discarded"
                    );
                    if let Some(m) = Metrics::get() {
                        m.record_discarded("stale");
                    }
                    return Disposition::Stale;
                }
                Some(&prev)
                    if self.min_gap > chrono::Duration::zero()
                        && report.time < prev + self.min_gap =>
                {
                    // The stored timestamp intentionally stays at `prev`:
                    // the gate measures from the last accepted report, not
                    // the last seen one.
                    debug!(
                        vehicle_id = %report.vehicle_id,
                        report_time = %report.time,
                        last_accepted = %prev,
                        "report inside minimum gap, skipped"
                    );
                    if let Some(m) = Metrics::get() {
                        m.record_discarded("throttled");
                    }
                    return Disposition::Throttled;
                }
                _ => {
                    last.insert(report.vehicle_id.clone(), report.time);
                }
            }
        }

        let report = report.with_processed_at(now);

        if let Err(e) = self.store.persist(&report).await {
            error!(
                vehicle_id = %report.vehicle_id,
                sink = self.store.name(),
                error = %e,
                "persist failed"
            );
            if let Some(m) = Metrics::get() {
                m.record_sink_error(self.store.name());
            }
        }

        self.sweeper.observe(&report).await;

        if let Err(e) = self.matcher.apply(&report).await {
            error!(
                vehicle_id = %report.vehicle_id,
                sink = self.matcher.name(),
                error = %e,
                "forward to matcher failed"
            );
            if let Some(m) = Metrics::get() {
                m.record_sink_error(self.matcher.name());
            }
        }

        if let Some(m) = Metrics::get() {
            m.record_accepted();
        }
        Disposition::Accepted
    }

    /// Fix time of the last accepted report for a vehicle, if any.
    pub fn last_accepted_time(&self, vehicle_id: &str) -> Option<DateTime<Utc>> {
        self.last_accepted.lock().get(vehicle_id).copied()
    }
}
