//! Pipeline configuration
//!
//! Flat config struct, loadable from `REITTI_*` environment variables.
//! Every field has a default so a bare environment still runs.

use crate::error::{PipelineError, Result};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Fewest workers the dispatcher will run.
pub const MIN_WORKERS: usize = 1;

/// Most workers the dispatcher will run. Values above this are clamped,
/// not rejected: a misconfigured fleet should keep ingesting.
pub const MAX_WORKERS: usize = 100;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Structured JSON lines, for log shippers.
    Json,
    /// Human-readable output, for development.
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(PipelineError::Config(format!(
                "unknown log format {other:?}, expected \"json\" or \"pretty\""
            ))),
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct AvlConfig {
    /// Seconds between feed poll cycles.
    pub poll_interval_secs: u64,

    /// Milliseconds a feed fetch may take before it is abandoned.
    pub feed_timeout_msecs: u64,

    /// Requested worker count. Clamped to [`MIN_WORKERS`]..=[`MAX_WORKERS`]
    /// at use; see [`AvlConfig::worker_count`].
    pub num_worker_threads: usize,

    /// Queue capacity. In-flight bound is `max_queue_size + workers`.
    pub max_queue_size: usize,

    /// Seconds without an accepted report before a vehicle is marked
    /// unpredictable.
    pub vehicle_timeout_secs: u64,

    /// Whether reports go through the queue and worker pool. When false,
    /// each report is processed inline by the submitting task.
    pub use_queueing: bool,

    /// Minimum seconds between accepted reports per vehicle. Reports that
    /// arrive faster are skipped. 0 disables the gate.
    pub min_time_between_reports_secs: u64,

    /// Log output format.
    pub log_format: LogFormat,

    /// Default log level when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for AvlConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            feed_timeout_msecs: 10_000,
            num_worker_threads: 1,
            max_queue_size: 350,
            vehicle_timeout_secs: 360,
            use_queueing: true,
            min_time_between_reports_secs: 0,
            log_format: LogFormat::default(),
            log_level: "info".to_string(),
        }
    }
}

impl AvlConfig {
    /// Load configuration from `REITTI_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            poll_interval_secs: env_parse("REITTI_POLL_INTERVAL_SECS", defaults.poll_interval_secs)?,
            feed_timeout_msecs: env_parse("REITTI_FEED_TIMEOUT_MSECS", defaults.feed_timeout_msecs)?,
            num_worker_threads: env_parse(
                "REITTI_NUM_WORKER_THREADS",
                defaults.num_worker_threads,
            )?,
            max_queue_size: env_parse("REITTI_MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            vehicle_timeout_secs: env_parse(
                "REITTI_VEHICLE_TIMEOUT_SECS",
                defaults.vehicle_timeout_secs,
            )?,
            use_queueing: env_parse("REITTI_USE_QUEUEING", defaults.use_queueing)?,
            min_time_between_reports_secs: env_parse(
                "REITTI_MIN_TIME_BETWEEN_REPORTS_SECS",
                defaults.min_time_between_reports_secs,
            )?,
            log_format: env_parse("REITTI_LOG_FORMAT", defaults.log_format)?,
            log_level: env_parse("REITTI_LOG_LEVEL", defaults.log_level)?,
        })
    }

    /// The worker count the dispatcher actually runs: the configured value
    /// clamped to [`MIN_WORKERS`]..=[`MAX_WORKERS`], with a warning when the
    /// configured value was out of range.
    pub fn worker_count(&self) -> usize {
        let clamped = self.num_worker_threads.clamp(MIN_WORKERS, MAX_WORKERS);
        if clamped != self.num_worker_threads {
            warn!(
                configured = self.num_worker_threads,
                effective = clamped,
                "worker count out of range, clamping"
            );
        }
        clamped
    }

    /// Interval between poll cycles.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Per-fetch timeout.
    pub fn feed_timeout(&self) -> Duration {
        Duration::from_millis(self.feed_timeout_msecs)
    }

    /// Liveness timeout.
    pub fn vehicle_timeout(&self) -> Duration {
        Duration::from_secs(self.vehicle_timeout_secs)
    }

    /// Minimum gap between accepted reports per vehicle. Zero disables it.
    pub fn min_report_gap(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.min_time_between_reports_secs as i64)
    }
}

/// Parse an env var, using the default when the variable is unset.
fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| PipelineError::Config(format!("{key}={raw:?}: {e}"))),
        Err(_) => Ok(default),
    }
}
