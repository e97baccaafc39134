//! Error types shared across the reitti pipeline

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Why a report failed field validation.
///
/// Validation happens in the processor, before the per-vehicle acceptance
/// check. An invalid report is discarded and logged; it never reaches the
/// store or the matcher.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Vehicle id was empty or whitespace.
    #[error("report has no vehicle id")]
    MissingVehicleId,

    /// Fix time is implausibly far in the past (clock reset on the vehicle,
    /// or a feed replaying ancient data).
    #[error("report time {time} is implausibly old")]
    TooOld {
        /// The rejected fix time.
        time: DateTime<Utc>,
    },

    /// Fix time is beyond the tolerated clock skew into the future.
    #[error("report time {time} is in the future")]
    InFuture {
        /// The rejected fix time.
        time: DateTime<Utc>,
    },

    /// Latitude outside [-90, 90] or not finite.
    #[error("latitude {0} out of range")]
    BadLatitude(f64),

    /// Longitude outside [-180, 180] or not finite.
    #[error("longitude {0} out of range")]
    BadLongitude(f64),

    /// Speed negative or not finite.
    #[error("speed {0} invalid")]
    BadSpeed(f32),

    /// Heading outside [0, 360) or not finite.
    #[error("heading {0} invalid")]
    BadHeading(f32),
}

/// Error type for feed operations.
///
/// A feed error fails one polling cycle, never the poller: the poller logs
/// it and tries again on the next cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Fetching raw data from the feed failed.
    ///
    /// Examples: connection refused, DNS failure, non-2xx response.
    #[error("feed fetch failed: {0}")]
    Fetch(String),

    /// Raw data could not be parsed into reports.
    #[error("feed parse failed: {0}")]
    Parse(String),

    /// The fetch did not complete within the configured timeout.
    #[error("feed fetch timed out after {elapsed_ms}ms")]
    Timeout {
        /// How long the fetch ran before being cut off.
        elapsed_ms: u64,
    },
}

/// Error type for downstream collaborators (store, matcher).
///
/// These are logged and counted by the processor; they do not fail the
/// worker that encountered them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Persisting a report failed.
    #[error("store failed: {0}")]
    Store(String),

    /// The matching engine rejected or failed to apply a report.
    #[error("match failed: {0}")]
    Match(String),

    /// The collaborator is not ready to take requests yet.
    #[error("sink not ready")]
    NotReady,
}
