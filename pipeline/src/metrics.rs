//! Prometheus metrics for the pipeline

use crate::error::{PipelineError, Result};
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global metrics instance
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// All pipeline metrics
pub struct Metrics {
    /// Reports received from feeds or direct submission (by source)
    pub reports_received: CounterVec,

    /// Reports accepted by the processor
    pub reports_accepted: Counter,

    /// Reports discarded (by reason: invalid, stale, superseded, throttled)
    pub reports_discarded: CounterVec,

    /// Persist/forward failures (by sink name)
    pub sink_errors: CounterVec,

    /// Vehicles marked unpredictable by the liveness sweeper
    pub vehicles_timed_out: Counter,

    /// Poll cycles (by feed, outcome: ok, error, timeout)
    pub poll_cycles: CounterVec,

    /// Reports currently queued or executing
    pub in_flight: Gauge,

    /// Vehicles currently tracked by the liveness sweeper
    pub tracked_vehicles: Gauge,
}

impl Metrics {
    /// Initialize metrics (call once at startup)
    ///
    /// Returns error if metric registration fails.
    pub fn init() -> Result<&'static Metrics> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let metrics = Metrics {
            reports_received: register_counter_vec!(
                "reitti_reports_received_total",
                "Total AVL reports received",
                &["source"]
            )
            .map_err(|e| PipelineError::Metrics(format!("reports_received: {e}")))?,

            reports_accepted: register_counter!(
                "reitti_reports_accepted_total",
                "Total AVL reports accepted by the processor"
            )
            .map_err(|e| PipelineError::Metrics(format!("reports_accepted: {e}")))?,

            reports_discarded: register_counter_vec!(
                "reitti_reports_discarded_total",
                "Total AVL reports discarded",
                &["reason"]
            )
            .map_err(|e| PipelineError::Metrics(format!("reports_discarded: {e}")))?,

            sink_errors: register_counter_vec!(
                "reitti_sink_errors_total",
                "Total persist/forward failures",
                &["sink"]
            )
            .map_err(|e| PipelineError::Metrics(format!("sink_errors: {e}")))?,

            vehicles_timed_out: register_counter!(
                "reitti_vehicles_timed_out_total",
                "Total vehicles marked unpredictable after the liveness timeout"
            )
            .map_err(|e| PipelineError::Metrics(format!("vehicles_timed_out: {e}")))?,

            poll_cycles: register_counter_vec!(
                "reitti_poll_cycles_total",
                "Total feed poll cycles",
                &["feed", "outcome"]
            )
            .map_err(|e| PipelineError::Metrics(format!("poll_cycles: {e}")))?,

            in_flight: register_gauge!(
                "reitti_reports_in_flight",
                "Reports currently queued or executing"
            )
            .map_err(|e| PipelineError::Metrics(format!("in_flight: {e}")))?,

            tracked_vehicles: register_gauge!(
                "reitti_tracked_vehicles",
                "Vehicles currently tracked by the liveness sweeper"
            )
            .map_err(|e| PipelineError::Metrics(format!("tracked_vehicles: {e}")))?,
        };

        let _ = METRICS.set(metrics);

        METRICS
            .get()
            .ok_or_else(|| PipelineError::Metrics("failed to initialize metrics".to_string()))
    }

    /// Get the global metrics instance
    ///
    /// Returns None if metrics haven't been initialized yet.
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }

    /// Record a received report
    pub fn record_received(&self, source: &str) {
        self.reports_received.with_label_values(&[source]).inc();
    }

    /// Record an accepted report
    pub fn record_accepted(&self) {
        self.reports_accepted.inc();
    }

    /// Record a discarded report
    pub fn record_discarded(&self, reason: &str) {
        self.reports_discarded.with_label_values(&[reason]).inc();
    }

    /// Record a sink failure
    pub fn record_sink_error(&self, sink: &str) {
        self.sink_errors.with_label_values(&[sink]).inc();
    }

    /// Record a vehicle timing out
    pub fn record_vehicle_timed_out(&self) {
        self.vehicles_timed_out.inc();
    }

    /// Record the outcome of one poll cycle
    pub fn record_poll_cycle(&self, feed: &str, outcome: &str) {
        self.poll_cycles.with_label_values(&[feed, outcome]).inc();
    }

    /// Update the in-flight gauge
    pub fn set_in_flight(&self, count: usize) {
        self.in_flight.set(count as f64);
    }

    /// Update the tracked-vehicles gauge
    pub fn set_tracked_vehicles(&self, count: usize) {
        self.tracked_vehicles.set(count as f64);
    }
}

/// Gather all metrics and encode as Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_init() {
        // Metrics::init() may fail if already initialized from another test
        // so we just check get() works after any successful init
        let _ = Metrics::init();
        if let Some(metrics) = Metrics::get() {
            metrics.record_received("test-feed");
            metrics.record_discarded("stale");
            metrics.set_in_flight(3);
        }
    }

    #[test]
    fn test_gather_renders_text() {
        let _ = Metrics::init();
        if let Some(metrics) = Metrics::get() {
            // Vec families only render once they have at least one sample.
            metrics.record_received("gather-test");
            let text = gather();
            assert!(text.contains("reitti_reports_received_total"));
        }
    }
}
