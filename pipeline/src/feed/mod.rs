//! AVL feeds and the polling loop
//!
//! A feed turns one fetch into a batch of [`AvlReport`]s; the
//! [`FeedPoller`] drives it on a fixed cadence and hands every report to
//! the dispatcher.
//!
//! # Built-in feeds
//!
//! - [`JsonUrlFeed`] - polls a URL returning a JSON array of reports
//! - [`PlaybackFeed`] - replays pre-built batches, then reports exhaustion

mod json;
mod playback;

pub use json::JsonUrlFeed;
pub use playback::PlaybackFeed;

use crate::config::AvlConfig;
use crate::dispatcher::BoundedDispatcher;
use crate::metrics::Metrics;
use async_trait::async_trait;
use reitti_core::{AvlReport, FeedError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// A source of AVL reports.
///
/// Implementations parse whatever their wire format is and return canonical
/// reports; the poller owns timing, timeouts and error handling.
#[async_trait]
pub trait AvlFeed: Send + Sync {
    /// Short name for logging and metrics.
    fn name(&self) -> &'static str;

    /// Fetch the current batch of reports.
    ///
    /// An empty batch is a normal outcome (no vehicles moved, feed window
    /// empty). Errors fail this cycle only.
    async fn fetch(&self) -> Result<Vec<AvlReport>, FeedError>;

    /// Whether the feed has permanently run out of data.
    ///
    /// Live feeds never exhaust; playback feeds do. Once true, the poller
    /// finishes the cycle and stops.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// Drives one feed on a fixed cadence.
///
/// Each cycle fetches (bounded by the feed timeout), submits every report,
/// then sleeps for `poll_interval - elapsed`. A cycle that overran the
/// interval logs a warning and polls again immediately. Fetch failures
/// never stop the loop.
pub struct FeedPoller {
    feed: Arc<dyn AvlFeed>,
    dispatcher: Arc<BoundedDispatcher>,
    interval: Duration,
    fetch_timeout: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl FeedPoller {
    /// Create a poller for one feed.
    pub fn new(
        feed: Arc<dyn AvlFeed>,
        dispatcher: Arc<BoundedDispatcher>,
        config: &AvlConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            feed,
            dispatcher,
            interval: config.poll_interval(),
            fetch_timeout: config.feed_timeout(),
            shutdown_rx,
        }
    }

    /// Run until shutdown or feed exhaustion.
    pub async fn run(mut self) {
        info!(
            feed = self.feed.name(),
            interval_secs = self.interval.as_secs(),
            "feed poller started"
        );

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            let started = Instant::now();
            if self.poll_once().await.is_err() {
                // Dispatcher is gone; nothing left to feed.
                break;
            }

            if self.feed.is_exhausted() {
                info!(feed = self.feed.name(), "feed exhausted, poller stopping");
                break;
            }

            let elapsed = started.elapsed();
            match self.interval.checked_sub(elapsed) {
                Some(remaining) => {
                    tokio::select! {
                        _ = tokio::time::sleep(remaining) => {}
                        _ = self.shutdown_rx.changed() => break,
                    }
                }
                None => {
                    warn!(
                        feed = self.feed.name(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        interval_ms = self.interval.as_millis() as u64,
                        "poll cycle overran the interval, polling again immediately"
                    );
                }
            }
        }

        info!(feed = self.feed.name(), "feed poller stopped");
    }

    /// One fetch-and-submit cycle. `Err` means the dispatcher is closed.
    async fn poll_once(&self) -> Result<(), ()> {
        let feed = self.feed.name();
        match tokio::time::timeout(self.fetch_timeout, self.feed.fetch()).await {
            Err(_) => {
                warn!(
                    feed,
                    timeout_ms = self.fetch_timeout.as_millis() as u64,
                    "feed fetch timed out"
                );
                if let Some(m) = Metrics::get() {
                    m.record_poll_cycle(feed, "timeout");
                }
            }
            Ok(Err(e)) => {
                error!(feed, error = %e, "feed fetch failed");
                if let Some(m) = Metrics::get() {
                    m.record_poll_cycle(feed, "error");
                }
            }
            Ok(Ok(reports)) => {
                debug!(feed, count = reports.len(), "fetched reports");
                for report in reports {
                    if let Err(e) = self.dispatcher.submit(report).await {
                        error!(feed, error = %e, "dispatcher rejected report, poller stopping");
                        return Err(());
                    }
                }
                if let Some(m) = Metrics::get() {
                    m.record_poll_cycle(feed, "ok");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::liveness::LivenessSweeper;
    use crate::processor::ReportProcessor;
    use chrono::Utc;
    use parking_lot::Mutex as PlMutex;
    use reitti_core::{MemoryReportStore, NoLayovers, NullMatchingEngine};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn make_dispatcher(config: &AvlConfig) -> (Arc<BoundedDispatcher>, Arc<MemoryReportStore>) {
        let store = Arc::new(MemoryReportStore::new());
        let matcher = Arc::new(NullMatchingEngine);
        let sweeper = Arc::new(LivenessSweeper::new(
            config.vehicle_timeout(),
            matcher.clone(),
            Arc::new(NoLayovers),
        ));
        let processor = Arc::new(ReportProcessor::new(
            store.clone(),
            matcher,
            sweeper,
            chrono::Duration::zero(),
        ));
        (Arc::new(BoundedDispatcher::new(processor, config)), store)
    }

    /// Feed that records the (tokio) instant of every fetch and can fail
    /// the first N cycles or delay each fetch.
    struct ScriptedFeed {
        fetch_times: PlMutex<Vec<Instant>>,
        fail_first: AtomicU32,
        delay: Duration,
        batch_offset: AtomicU32,
    }

    impl ScriptedFeed {
        fn new() -> Self {
            Self {
                fetch_times: PlMutex::new(Vec::new()),
                fail_first: AtomicU32::new(0),
                delay: Duration::ZERO,
                batch_offset: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl AvlFeed for ScriptedFeed {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch(&self) -> Result<Vec<AvlReport>, FeedError> {
            self.fetch_times.lock().push(Instant::now());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(FeedError::Fetch("scripted failure".to_string()));
            }
            let n = self.batch_offset.fetch_add(1, Ordering::SeqCst);
            Ok(vec![AvlReport::new(
                "v1",
                Utc::now() + chrono::Duration::seconds(n as i64),
                60.17,
                24.94,
            )])
        }
    }

    fn poller_for(
        feed: Arc<dyn AvlFeed>,
        dispatcher: Arc<BoundedDispatcher>,
        config: &AvlConfig,
    ) -> (FeedPoller, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (FeedPoller::new(feed, dispatcher, config, rx), tx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_cadence_subtracts_fetch_time() {
        let config = AvlConfig {
            poll_interval_secs: 15,
            feed_timeout_msecs: 10_000,
            ..Default::default()
        };
        let (dispatcher, _) = make_dispatcher(&config);
        let feed = Arc::new(ScriptedFeed {
            delay: Duration::from_secs(5),
            ..ScriptedFeed::new()
        });
        let (poller, shutdown_tx) = poller_for(feed.clone(), dispatcher, &config);

        let handle = tokio::spawn(poller.run());
        // Let three cycles start: t=0, t=15, t=30 (5s fetch + 10s sleep).
        tokio::time::sleep(Duration::from_secs(31)).await;
        shutdown_tx.send(true).unwrap();
        let _ = handle.await;

        let times = feed.fetch_times.lock().clone();
        assert!(times.len() >= 3, "expected 3 cycles, got {}", times.len());
        assert_eq!((times[1] - times[0]).as_secs(), 15);
        assert_eq!((times[2] - times[1]).as_secs(), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_errors_do_not_stop_the_loop() {
        let config = AvlConfig {
            poll_interval_secs: 15,
            ..Default::default()
        };
        let (dispatcher, store) = make_dispatcher(&config);
        let feed = Arc::new(ScriptedFeed::new());
        feed.fail_first.store(2, Ordering::SeqCst);
        let (poller, shutdown_tx) = poller_for(feed.clone(), dispatcher.clone(), &config);

        let handle = tokio::spawn(poller.run());
        // Cycles at 0 and 15 fail; the one at 30 succeeds.
        tokio::time::sleep(Duration::from_secs(31)).await;
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        shutdown_tx.send(true).unwrap();
        let _ = handle.await;
        dispatcher.shutdown().await;

        assert_eq!(feed.fetch_times.lock().len(), 3);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_cut_off_at_timeout() {
        let config = AvlConfig {
            poll_interval_secs: 15,
            feed_timeout_msecs: 2_000,
            ..Default::default()
        };
        let (dispatcher, store) = make_dispatcher(&config);
        let feed = Arc::new(ScriptedFeed {
            delay: Duration::from_secs(60),
            ..ScriptedFeed::new()
        });
        let (poller, shutdown_tx) = poller_for(feed.clone(), dispatcher, &config);

        let handle = tokio::spawn(poller.run());
        tokio::time::sleep(Duration::from_secs(16)).await;
        shutdown_tx.send(true).unwrap();
        let _ = handle.await;

        // Both cycles were abandoned at the 2s timeout; nothing stored.
        assert!(feed.fetch_times.lock().len() >= 2);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_cycle_polls_again_immediately() {
        let config = AvlConfig {
            poll_interval_secs: 2,
            feed_timeout_msecs: 60_000,
            ..Default::default()
        };
        let (dispatcher, _) = make_dispatcher(&config);
        // 5s fetch against a 2s interval: every cycle overruns.
        let feed = Arc::new(ScriptedFeed {
            delay: Duration::from_secs(5),
            ..ScriptedFeed::new()
        });
        let (poller, shutdown_tx) = poller_for(feed.clone(), dispatcher, &config);

        let handle = tokio::spawn(poller.run());
        tokio::time::sleep(Duration::from_secs(11)).await;
        shutdown_tx.send(true).unwrap();
        let _ = handle.await;

        // Back-to-back cycles at 0, 5, 10: no sleep in between.
        let times = feed.fetch_times.lock().clone();
        assert!(times.len() >= 3, "expected 3 cycles, got {}", times.len());
        assert_eq!((times[1] - times[0]).as_secs(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_drains_and_stops() {
        let config = AvlConfig {
            poll_interval_secs: 15,
            ..Default::default()
        };
        let (dispatcher, store) = make_dispatcher(&config);

        let base = Utc::now();
        let feed = Arc::new(PlaybackFeed::new(vec![
            vec![AvlReport::new("v1", base, 60.0, 24.0)],
            vec![AvlReport::new(
                "v1",
                base + chrono::Duration::seconds(10),
                60.0,
                24.0,
            )],
        ]));
        let (poller, _shutdown_tx) = poller_for(feed, dispatcher.clone(), &config);

        // Exhaustion ends run() without any shutdown signal. The second
        // batch comes out on the next cycle, 15 virtual seconds later.
        tokio::time::timeout(std::time::Duration::from_secs(60), poller.run())
            .await
            .expect("poller should stop on exhaustion");

        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        dispatcher.shutdown().await;
        assert_eq!(store.len(), 2);
    }
}
