//! Downstream collaborator traits
//!
//! The pipeline does not persist reports or run vehicle matching itself;
//! it hands accepted reports to implementations of these traits. Keeping
//! them here (rather than in `reitti-pipeline`) lets store and matcher
//! crates depend only on the small core crate.

use crate::error::SinkError;
use crate::report::AvlReport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Persistence seam for accepted reports.
///
/// Called by the processor after a report passes validation and the
/// per-vehicle acceptance check, with `processed_at` already stamped.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Short name for logging and metrics.
    fn name(&self) -> &'static str;

    /// Persist one accepted report.
    async fn persist(&self, report: &AvlReport) -> Result<(), SinkError>;
}

/// The downstream consumer of accepted reports.
///
/// In a full transit deployment this is the spatial matcher / prediction
/// engine. The pipeline only needs two things from it: apply an accepted
/// report, and retire a vehicle whose reports have stopped coming.
#[async_trait]
pub trait MatchingEngine: Send + Sync {
    /// Short name for logging and metrics.
    fn name(&self) -> &'static str;

    /// Apply one accepted report.
    async fn apply(&self, report: &AvlReport) -> Result<(), SinkError>;

    /// Mark a vehicle unpredictable because no report has been accepted for
    /// it within the liveness timeout.
    ///
    /// `last_seen` is the fix time of the vehicle's last accepted report.
    /// The default implementation does nothing, for matchers that handle
    /// silence on their own.
    async fn mark_unpredictable(
        &self,
        vehicle_id: &str,
        last_seen: DateTime<Utc>,
    ) -> Result<(), SinkError> {
        let _ = (vehicle_id, last_seen);
        Ok(())
    }
}

/// Cheap per-vehicle state queries the liveness sweeper needs.
///
/// Synchronous on purpose: the sweeper calls this while scanning under its
/// lock, so implementations must answer from in-memory state.
pub trait VehicleStatus: Send + Sync {
    /// Whether the vehicle is currently waiting out a scheduled layover.
    /// Such vehicles legitimately stop reporting and are exempt from the
    /// liveness timeout.
    fn is_waiting_at_layover(&self, vehicle_id: &str) -> bool;
}

// Arc-wrapped collaborators are collaborators too, so callers can keep a
// handle to what they install in the pipeline.

#[async_trait]
impl<T: ReportStore + ?Sized> ReportStore for std::sync::Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn persist(&self, report: &AvlReport) -> Result<(), SinkError> {
        (**self).persist(report).await
    }
}

#[async_trait]
impl<T: MatchingEngine + ?Sized> MatchingEngine for std::sync::Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn apply(&self, report: &AvlReport) -> Result<(), SinkError> {
        (**self).apply(report).await
    }

    async fn mark_unpredictable(
        &self,
        vehicle_id: &str,
        last_seen: DateTime<Utc>,
    ) -> Result<(), SinkError> {
        (**self).mark_unpredictable(vehicle_id, last_seen).await
    }
}

impl<T: VehicleStatus + ?Sized> VehicleStatus for std::sync::Arc<T> {
    fn is_waiting_at_layover(&self, vehicle_id: &str) -> bool {
        (**self).is_waiting_at_layover(vehicle_id)
    }
}

/// Status source that reports no layovers. The default when the deployment
/// has no schedule data wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLayovers;

impl VehicleStatus for NoLayovers {
    fn is_waiting_at_layover(&self, _vehicle_id: &str) -> bool {
        false
    }
}

/// In-memory report store.
///
/// Holds accepted reports in arrival order. Useful for tests and for
/// deployments that only want the live stream, not history.
#[derive(Debug, Default)]
pub struct MemoryReportStore {
    reports: Mutex<Vec<AvlReport>>,
}

impl MemoryReportStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted reports.
    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    /// Whether the store holds no reports.
    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }

    /// Snapshot of all persisted reports, in arrival order.
    pub fn snapshot(&self) -> Vec<AvlReport> {
        self.reports.lock().clone()
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn persist(&self, report: &AvlReport) -> Result<(), SinkError> {
        self.reports.lock().push(report.clone());
        Ok(())
    }
}

/// Matching engine that logs and drops everything. The default sink when
/// no matcher is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMatchingEngine;

#[async_trait]
impl MatchingEngine for NullMatchingEngine {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn apply(&self, report: &AvlReport) -> Result<(), SinkError> {
        tracing::trace!(vehicle_id = %report.vehicle_id, time = %report.time, "report dropped by null matcher");
        Ok(())
    }
}
