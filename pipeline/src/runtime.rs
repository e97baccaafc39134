//! Pipeline assembly and process runtime
//!
//! [`Pipeline`] is the builder: wire in a store, a matcher, a layover
//! source and any number of feeds, then [`Pipeline::build`] returns a
//! [`PipelineHandle`] (direct report submission + shutdown) and a
//! [`PipelineRunner`] that drives the pollers to completion.
//!
//! [`run()`] is the zero-boilerplate entry point for binaries: env config,
//! tracing, metrics, signal handling.
//!
//! ```ignore
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     reitti_pipeline::run(|pipeline| {
//!         let feed = JsonUrlFeed::new("https://example.net/avl", Duration::from_secs(10))?;
//!         Ok(pipeline.feed(feed))
//!     })
//!     .await
//! }
//! ```

use crate::config::{AvlConfig, LogFormat};
use crate::dispatcher::BoundedDispatcher;
use crate::error::Result;
use crate::feed::{AvlFeed, FeedPoller};
use crate::liveness::LivenessSweeper;
use crate::metrics::Metrics;
use crate::processor::ReportProcessor;
use reitti_core::{
    AvlReport, MatchingEngine, MemoryReportStore, NoLayovers, NullMatchingEngine, ReportStore,
    VehicleStatus,
};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Builder for a runnable pipeline.
///
/// Defaults: in-memory store, no-op matcher, no layover data, no feeds.
/// A pipeline without feeds is still useful: reports can be injected
/// directly through the [`PipelineHandle`].
pub struct Pipeline {
    config: AvlConfig,
    store: Arc<dyn ReportStore>,
    matcher: Arc<dyn MatchingEngine>,
    status: Arc<dyn VehicleStatus>,
    feeds: Vec<Arc<dyn AvlFeed>>,
}

impl Pipeline {
    /// Start building a pipeline with the given configuration.
    pub fn new(config: AvlConfig) -> Self {
        Self {
            config,
            store: Arc::new(MemoryReportStore::new()),
            matcher: Arc::new(NullMatchingEngine),
            status: Arc::new(NoLayovers),
            feeds: Vec::new(),
        }
    }

    /// Set the report store.
    pub fn store(mut self, store: impl ReportStore + 'static) -> Self {
        self.store = Arc::new(store);
        self
    }

    /// Set the matching engine.
    pub fn matcher(mut self, matcher: impl MatchingEngine + 'static) -> Self {
        self.matcher = Arc::new(matcher);
        self
    }

    /// Set the layover status source.
    pub fn vehicle_status(mut self, status: impl VehicleStatus + 'static) -> Self {
        self.status = Arc::new(status);
        self
    }

    /// Add a feed. Each feed gets its own poller.
    pub fn feed(mut self, feed: impl AvlFeed + 'static) -> Self {
        self.feeds.push(Arc::new(feed));
        self
    }

    /// Wire everything together.
    pub fn build(self) -> (PipelineHandle, PipelineRunner) {
        let sweeper = Arc::new(LivenessSweeper::new(
            self.config.vehicle_timeout(),
            Arc::clone(&self.matcher),
            Arc::clone(&self.status),
        ));
        let processor = Arc::new(ReportProcessor::new(
            self.store,
            self.matcher,
            sweeper,
            self.config.min_report_gap(),
        ));
        let dispatcher = Arc::new(BoundedDispatcher::new(processor, &self.config));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        let pollers = self
            .feeds
            .into_iter()
            .map(|feed| {
                FeedPoller::new(
                    feed,
                    Arc::clone(&dispatcher),
                    &self.config,
                    shutdown_rx.clone(),
                )
            })
            .collect();

        (
            PipelineHandle {
                dispatcher: Arc::clone(&dispatcher),
                shutdown_tx: Arc::clone(&shutdown_tx),
            },
            PipelineRunner {
                dispatcher,
                pollers,
                _shutdown_tx: shutdown_tx,
                shutdown_rx,
            },
        )
    }
}

/// Handle for injecting reports and requesting shutdown.
#[derive(Clone)]
pub struct PipelineHandle {
    dispatcher: Arc<BoundedDispatcher>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl PipelineHandle {
    /// Submit one report directly, bypassing the feeds. Waits while the
    /// in-flight bound is saturated, like any feed submission.
    pub async fn submit(&self, report: AvlReport) -> Result<()> {
        self.dispatcher.submit(report).await
    }

    /// Ask the pipeline to stop. [`PipelineRunner::run`] then drains and
    /// returns.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Owns the pollers and drives the pipeline to completion.
pub struct PipelineRunner {
    dispatcher: Arc<BoundedDispatcher>,
    pollers: Vec<FeedPoller>,
    // Keeps the shutdown channel alive even if every handle is dropped.
    _shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl PipelineRunner {
    /// Run until every poller finishes (shutdown or feed exhaustion), then
    /// stop the dispatcher. A pipeline without feeds runs until shutdown.
    pub async fn run(mut self) -> Result<()> {
        if self.pollers.is_empty() {
            info!("no feeds configured, accepting direct submissions until shutdown");
            while !*self.shutdown_rx.borrow() {
                if self.shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
        } else {
            let handles: Vec<_> = self
                .pollers
                .drain(..)
                .map(|poller| tokio::spawn(poller.run()))
                .collect();
            for handle in handles {
                let _ = handle.await;
            }
        }

        self.dispatcher.shutdown().await;
        Ok(())
    }
}

/// Run a pipeline with configuration from the environment.
///
/// Loads `REITTI_*` env vars, initialises tracing and metrics, calls your
/// closure to wire up the pipeline, then runs it with graceful shutdown on
/// SIGINT/SIGTERM.
pub async fn run<F>(configure: F) -> anyhow::Result<()>
where
    F: FnOnce(Pipeline) -> anyhow::Result<Pipeline>,
{
    let config = AvlConfig::from_env()?;
    init_tracing(&config);

    info!(
        poll_interval_secs = config.poll_interval_secs,
        workers = config.worker_count(),
        max_queue_size = config.max_queue_size,
        vehicle_timeout_secs = config.vehicle_timeout_secs,
        use_queueing = config.use_queueing,
        "starting reitti"
    );

    Metrics::init()?;

    let pipeline = configure(Pipeline::new(config))?;
    let (handle, runner) = pipeline.build();

    let mut runner_task = tokio::spawn(runner.run());

    tokio::select! {
        _ = shutdown_signal() => {
            handle.shutdown();
            match (&mut runner_task).await {
                Ok(result) => result?,
                Err(e) => tracing::error!(error = %e, "runner task failed"),
            }
        }
        result = &mut runner_task => {
            // Feeds exhausted on their own (playback runs end this way).
            result??;
        }
    }

    info!("reitti shutdown complete");
    Ok(())
}

/// Initialise the tracing subscriber based on config.
fn init_tracing(config: &AvlConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.log_format {
        LogFormat::Json => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        LogFormat::Pretty => {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
