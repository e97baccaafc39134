//! The canonical AVL report
//!
//! An [`AvlReport`] is one vehicle-location observation after feed-specific
//! parsing: vehicle id, GPS fix, timestamp, plus optional speed, heading and
//! assignment data. Reports are immutable once built; the only field that is
//! ever stamped later is `processed_at`, set exactly once when the pipeline
//! accepts the report.
//!
//! Validation is separated from construction: feeds build reports from
//! whatever the wire gives them, and the processor decides whether the
//! values are usable via [`AvlReport::validate_at`].

use crate::error::ValidationError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a report's `assignment_id` should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentKind {
    /// No assignment information in the feed.
    #[default]
    Unset,
    /// Assignment id is a block id.
    Block,
    /// Assignment id is a route id.
    Route,
    /// Assignment id is a trip id.
    Trip,
    /// Assignment id is a trip short name.
    TripShortName,
    /// Keep whatever assignment the vehicle already had.
    Previous,
}

impl fmt::Display for AssignmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssignmentKind::Unset => "unset",
            AssignmentKind::Block => "block",
            AssignmentKind::Route => "route",
            AssignmentKind::Trip => "trip",
            AssignmentKind::TripShortName => "trip_short_name",
            AssignmentKind::Previous => "previous",
        };
        f.write_str(s)
    }
}

/// One canonical vehicle-location observation.
///
/// # Example
///
/// ```
/// use reitti_core::AvlReport;
/// use chrono::Utc;
///
/// let report = AvlReport::new("bus-1503", Utc::now(), 60.1699, 24.9384)
///     .with_speed(8.3)
///     .with_heading(270.0);
/// assert_eq!(report.vehicle_id, "bus-1503");
/// assert!(report.processed_at.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvlReport {
    /// Vehicle identifier, unique within the fleet.
    pub vehicle_id: String,

    /// GPS fix time reported by the vehicle.
    pub time: DateTime<Utc>,

    /// Latitude in degrees, [-90, 90].
    pub latitude: f64,

    /// Longitude in degrees, [-180, 180].
    pub longitude: f64,

    /// Speed in meters per second, if the feed provides it.
    #[serde(default)]
    pub speed: Option<f32>,

    /// Heading in degrees clockwise from north, [0, 360), if provided.
    #[serde(default)]
    pub heading: Option<f32>,

    /// Feed or source identifier, for logging and metrics.
    #[serde(default)]
    pub source: Option<String>,

    /// Assignment identifier, interpreted per `assignment_kind`.
    #[serde(default)]
    pub assignment_id: Option<String>,

    /// How to interpret `assignment_id`.
    #[serde(default)]
    pub assignment_kind: AssignmentKind,

    /// When the pipeline accepted this report. `None` until then.
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

/// Reports older than this relative to the validation instant are rejected.
const MAX_REPORT_AGE_YEARS: i64 = 10;

/// Reports more than this far in the future are rejected.
const MAX_FUTURE_SKEW_SECS: i64 = 60;

impl AvlReport {
    /// Create a report with the required fields. Optional fields start unset.
    pub fn new(
        vehicle_id: impl Into<String>,
        time: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            time,
            latitude,
            longitude,
            speed: None,
            heading: None,
            source: None,
            assignment_id: None,
            assignment_kind: AssignmentKind::Unset,
            processed_at: None,
        }
    }

    /// Set the speed in meters per second.
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Set the heading in degrees clockwise from north.
    pub fn with_heading(mut self, heading: f32) -> Self {
        self.heading = Some(heading);
        self
    }

    /// Set the feed/source identifier.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attach an assignment.
    pub fn with_assignment(mut self, id: impl Into<String>, kind: AssignmentKind) -> Self {
        self.assignment_id = Some(id.into());
        self.assignment_kind = kind;
        self
    }

    /// Stamp the acceptance time. Called once by the processor.
    pub fn with_processed_at(mut self, at: DateTime<Utc>) -> Self {
        self.processed_at = Some(at);
        self
    }

    /// The source label, or `"unknown"` when the feed did not set one.
    pub fn source_label(&self) -> &str {
        self.source.as_deref().unwrap_or("unknown")
    }

    /// Check the report fields against a validation instant.
    ///
    /// `now` is passed in rather than read from the clock so that playback
    /// and tests validate against a deterministic instant.
    ///
    /// Rejections:
    /// - empty vehicle id
    /// - fix time more than ten years before `now`
    /// - fix time more than one minute after `now`
    /// - latitude/longitude outside valid ranges, or not finite
    /// - negative or non-finite speed
    /// - heading outside [0, 360) (non-finite heading is treated as unset
    ///   by feeds, so it is rejected here)
    pub fn validate_at(&self, now: DateTime<Utc>) -> Result<(), ValidationError> {
        if self.vehicle_id.trim().is_empty() {
            return Err(ValidationError::MissingVehicleId);
        }

        if self.time < now - Duration::days(365 * MAX_REPORT_AGE_YEARS) {
            return Err(ValidationError::TooOld { time: self.time });
        }
        if self.time > now + Duration::seconds(MAX_FUTURE_SKEW_SECS) {
            return Err(ValidationError::InFuture { time: self.time });
        }

        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ValidationError::BadLatitude(self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ValidationError::BadLongitude(self.longitude));
        }

        if let Some(speed) = self.speed {
            if !speed.is_finite() || speed < 0.0 {
                return Err(ValidationError::BadSpeed(speed));
            }
        }
        if let Some(heading) = self.heading {
            if !heading.is_finite() || !(0.0..360.0).contains(&heading) {
                return Err(ValidationError::BadHeading(heading));
            }
        }

        Ok(())
    }
}

// Display shows the identity fields only; optional data is for structured logs.
impl fmt::Display for AvlReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AvlReport[{} @ {} ({:.5}, {:.5})]",
            self.vehicle_id, self.time, self.latitude, self.longitude
        )
    }
}
