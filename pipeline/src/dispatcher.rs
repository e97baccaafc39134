//! Bounded dispatch of reports to the worker pool
//!
//! The dispatcher owns the admission gate and the workers. Capacity is a
//! semaphore with `max_queue_size + workers` permits: a permit is taken at
//! submission and released only when the task finishes executing or is
//! discarded as superseded, so the bound covers queued AND executing work.
//! When every permit is out, `submit` waits — backpressure propagates to
//! the poller, which simply polls late.
//!
//! With queueing disabled the dispatcher has no workers and no queue; each
//! report is processed inline by the submitting task.

use crate::config::AvlConfig;
use crate::error::{PipelineError, Result};
use crate::metrics::Metrics;
use crate::processor::ReportProcessor;
use crate::queue::{DispatchTask, StalenessQueue};
use parking_lot::Mutex;
use reitti_core::AvlReport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Bounded worker pool with staleness filtering.
pub struct BoundedDispatcher {
    processor: Arc<ReportProcessor>,
    queue: Arc<StalenessQueue>,
    /// None when queueing is disabled or after shutdown.
    tx: Mutex<Option<mpsc::Sender<DispatchTask>>>,
    semaphore: Arc<Semaphore>,
    max_in_flight: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    /// Queueing disabled: no workers, submit processes inline.
    inline: bool,
}

impl BoundedDispatcher {
    /// Create the dispatcher and spawn its workers.
    pub fn new(processor: Arc<ReportProcessor>, config: &AvlConfig) -> Self {
        let workers = config.worker_count();
        let max_in_flight = config.max_queue_size + workers;
        let queue = Arc::new(StalenessQueue::new());
        let semaphore = Arc::new(Semaphore::new(max_in_flight));

        if !config.use_queueing {
            info!("queueing disabled, reports processed inline");
            return Self {
                processor,
                queue,
                tx: Mutex::new(None),
                semaphore,
                max_in_flight,
                workers: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                inline: true,
            };
        }

        let (tx, rx) = mpsc::channel::<DispatchTask>(max_in_flight);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let handles = (0..workers)
            .map(|id| {
                let rx = Arc::clone(&rx);
                let queue = Arc::clone(&queue);
                let processor = Arc::clone(&processor);
                tokio::spawn(worker_loop(id, rx, queue, processor))
            })
            .collect();

        info!(
            workers,
            max_in_flight,
            queue_capacity = config.max_queue_size,
            "dispatcher started"
        );

        Self {
            processor,
            queue,
            tx: Mutex::new(Some(tx)),
            semaphore,
            max_in_flight,
            workers: Mutex::new(handles),
            closed: AtomicBool::new(false),
            inline: false,
        }
    }

    /// Submit one report.
    ///
    /// Waits while the in-flight bound is saturated. Returns
    /// [`PipelineError::Closed`] after shutdown.
    pub async fn submit(&self, report: AvlReport) -> Result<()> {
        if let Some(m) = Metrics::get() {
            m.record_received(report.source_label());
        }

        if self.closed.load(Ordering::Acquire) {
            return Err(PipelineError::Closed);
        }

        let tx = self.tx.lock().clone();
        let Some(tx) = tx else {
            if self.inline {
                // Inline mode: no workers, the submitting task does the work.
                self.processor.process(report).await;
                return Ok(());
            }
            // Queueing mode with the sender gone: shutdown won the race
            // against the closed-flag check above.
            return Err(PipelineError::Closed);
        };

        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::Closed)?;

        self.queue.record_enqueue(&report);
        tx.send(DispatchTask { report, permit })
            .await
            .map_err(|_| PipelineError::Closed)?;

        if let Some(m) = Metrics::get() {
            m.set_in_flight(self.in_flight());
        }
        Ok(())
    }

    /// Reports currently queued or executing.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.semaphore.available_permits()
    }

    /// The staleness filter, for inspection.
    pub fn staleness_queue(&self) -> &StalenessQueue {
        &self.queue
    }

    /// Stop accepting reports, drain the queue, and wait for the workers.
    ///
    /// Dropping the sender closes the channel; workers process what is
    /// already queued and exit when it runs dry.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.tx.lock().take();
        // Closing the semaphore wakes submitters blocked on admission.
        self.semaphore.close();

        let handles: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.await;
        }
        info!("dispatcher stopped");
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<DispatchTask>>>,
    queue: Arc<StalenessQueue>,
    processor: Arc<ReportProcessor>,
) {
    debug!(worker = id, "worker started");
    loop {
        // Hold the receiver lock only while waiting for a task, never while
        // processing one, so the other workers keep draining the queue.
        let task = { rx.lock().await.recv().await };
        let Some(task) = task else {
            break;
        };

        let DispatchTask { report, permit } = task;
        if queue.admit(&report) {
            processor.process(report).await;
        } else if let Some(m) = Metrics::get() {
            m.record_discarded("superseded");
        }
        drop(permit);
    }
    debug!(worker = id, "worker stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::liveness::LivenessSweeper;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use parking_lot::Mutex as PlMutex;
    use reitti_core::{
        MatchingEngine, MemoryReportStore, NoLayovers, SinkError,
    };
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Matcher whose `apply` can be blocked to keep a worker busy.
    struct GatedMatcher {
        applied: PlMutex<Vec<AvlReport>>,
        gate: Notify,
        gated: std::sync::atomic::AtomicBool,
    }

    impl GatedMatcher {
        fn new() -> Self {
            Self {
                applied: PlMutex::new(Vec::new()),
                gate: Notify::new(),
                gated: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn close_gate(&self) {
            self.gated.store(true, std::sync::atomic::Ordering::SeqCst);
        }

        fn open_gate(&self) {
            self.gated.store(false, std::sync::atomic::Ordering::SeqCst);
            self.gate.notify_waiters();
        }
    }

    #[async_trait]
    impl MatchingEngine for GatedMatcher {
        fn name(&self) -> &'static str {
            "gated"
        }

        async fn apply(&self, report: &AvlReport) -> std::result::Result<(), SinkError> {
            while self.gated.load(std::sync::atomic::Ordering::SeqCst) {
                self.gate.notified().await;
            }
            self.applied.lock().push(report.clone());
            Ok(())
        }
    }

    fn make_dispatcher(
        config: &AvlConfig,
    ) -> (Arc<BoundedDispatcher>, Arc<GatedMatcher>, Arc<MemoryReportStore>) {
        let store = Arc::new(MemoryReportStore::new());
        let matcher = Arc::new(GatedMatcher::new());
        let sweeper = Arc::new(LivenessSweeper::new(
            Duration::from_secs(360),
            matcher.clone(),
            Arc::new(NoLayovers),
        ));
        let processor = Arc::new(ReportProcessor::new(
            store.clone(),
            matcher.clone(),
            sweeper,
            ChronoDuration::zero(),
        ));
        let dispatcher = Arc::new(BoundedDispatcher::new(processor, config));
        (dispatcher, matcher, store)
    }

    fn report_at(vehicle: &str, time: DateTime<Utc>) -> AvlReport {
        AvlReport::new(vehicle, time, 60.17, 24.94)
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_submitted_report_is_processed() {
        let config = AvlConfig::default();
        let (dispatcher, matcher, store) = make_dispatcher(&config);

        dispatcher
            .submit(report_at("v1", Utc::now()))
            .await
            .unwrap();
        settle().await;

        assert_eq!(store.len(), 1);
        assert_eq!(matcher.applied.lock().len(), 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_inline_mode_processes_in_submit() {
        let config = AvlConfig {
            use_queueing: false,
            ..Default::default()
        };
        let (dispatcher, _, store) = make_dispatcher(&config);

        // No workers exist; submit must have done the work itself.
        dispatcher
            .submit(report_at("v1", Utc::now()))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_blocks_when_saturated() {
        let config = AvlConfig {
            max_queue_size: 1,
            num_worker_threads: 1,
            ..Default::default()
        };
        // max_in_flight = 2: one executing + one queued.
        let (dispatcher, matcher, _) = make_dispatcher(&config);
        matcher.close_gate();

        let base = Utc::now();
        dispatcher.submit(report_at("a", base)).await.unwrap();
        dispatcher
            .submit(report_at("b", base + ChronoDuration::seconds(1)))
            .await
            .unwrap();
        settle().await;
        assert_eq!(dispatcher.in_flight(), 2);

        // Third submit must wait for a permit.
        let blocked = tokio::time::timeout(
            Duration::from_millis(100),
            dispatcher.submit(report_at("c", base + ChronoDuration::seconds(2))),
        )
        .await;
        assert!(blocked.is_err(), "submit should block at the bound");

        // Releasing the worker frees capacity.
        matcher.open_gate();
        tokio::time::timeout(
            Duration::from_secs(5),
            dispatcher.submit(report_at("c", base + ChronoDuration::seconds(2))),
        )
        .await
        .expect("submit should proceed after capacity frees")
        .unwrap();

        settle().await;
        dispatcher.shutdown().await;
        assert_eq!(matcher.applied.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_superseded_report_skipped_by_worker() {
        let config = AvlConfig {
            max_queue_size: 4,
            num_worker_threads: 1,
            ..Default::default()
        };
        let (dispatcher, matcher, store) = make_dispatcher(&config);
        matcher.close_gate();

        let base = Utc::now();
        // Occupy the single worker.
        dispatcher.submit(report_at("blocker", base)).await.unwrap();
        settle().await;

        // Two reports for v1 queue up behind it; the older one must be
        // discarded at dequeue.
        dispatcher
            .submit(report_at("v1", base + ChronoDuration::seconds(10)))
            .await
            .unwrap();
        dispatcher
            .submit(report_at("v1", base + ChronoDuration::seconds(20)))
            .await
            .unwrap();

        matcher.open_gate();
        settle().await;
        dispatcher.shutdown().await;

        assert_eq!(dispatcher.staleness_queue().superseded_count(), 1);
        let stored = store.snapshot();
        let v1_times: Vec<_> = stored
            .iter()
            .filter(|r| r.vehicle_id == "v1")
            .map(|r| r.time)
            .collect();
        assert_eq!(v1_times, vec![base + ChronoDuration::seconds(20)]);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let config = AvlConfig::default();
        let (dispatcher, _, _) = make_dispatcher(&config);

        dispatcher.shutdown().await;
        let result = dispatcher.submit(report_at("v1", Utc::now())).await;
        assert!(matches!(result, Err(PipelineError::Closed)));
    }

    #[tokio::test]
    async fn test_sender_gone_mid_shutdown_rejects_instead_of_inlining() {
        let config = AvlConfig::default();
        let (dispatcher, _, store) = make_dispatcher(&config);

        // A submitter can pass the closed-flag check just before shutdown
        // takes the sender. Emulate that interleaving: sender gone, flag
        // not yet observed. The report must be rejected, not processed
        // inline by the submitting task.
        dispatcher.tx.lock().take();
        let result = dispatcher.submit(report_at("v1", Utc::now())).await;

        assert!(matches!(result, Err(PipelineError::Closed)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_workers_survive_invalid_reports() {
        let config = AvlConfig {
            num_worker_threads: 2,
            ..Default::default()
        };
        let (dispatcher, _, store) = make_dispatcher(&config);

        // Invalid (empty vehicle id) then valid: the worker that handled
        // the invalid one must still be alive to process more.
        dispatcher
            .submit(AvlReport::new("", Utc::now(), 60.0, 24.0))
            .await
            .unwrap();
        dispatcher
            .submit(report_at("ok", Utc::now()))
            .await
            .unwrap();
        settle().await;
        dispatcher.shutdown().await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot()[0].vehicle_id, "ok");
    }
}
