//! reitti-pipeline - real-time AVL ingestion
//!
//! Takes vehicle-location reports from polled feeds (or direct submission),
//! filters out stale and duplicate positions, bounds the work in flight so
//! a slow downstream backpressures the poller instead of exhausting memory,
//! and notices when vehicles stop reporting.
//!
//! # Architecture
//!
//! ```text
//! Feed ──► FeedPoller ──► BoundedDispatcher ──► workers
//!            (cadence,      (admission gate,       │
//!             timeouts)      staleness filter)     ▼
//!                                           ReportProcessor
//!                                       (validate, dedup, stamp)
//!                                               │        │
//!                                               ▼        ▼
//!                                          ReportStore  MatchingEngine
//!                                                         ▲
//!                                          LivenessSweeper┘
//!                                        (timeout → unpredictable)
//! ```
//!
//! Three pieces of per-vehicle state exist, each behind its own lock:
//! the staleness filter's newest-enqueued map, the processor's
//! last-accepted map, and the sweeper's update-ordered registry. They
//! answer different questions and are never locked together.
//!
//! # Quick start
//!
//! ```ignore
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     reitti_pipeline::run(|pipeline| {
//!         let feed = JsonUrlFeed::new("https://example.net/avl", Duration::from_secs(10))?;
//!         Ok(pipeline.feed(feed).matcher(MyMatcher::connect()?))
//!     })
//!     .await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod feed;
pub mod liveness;
pub mod metrics;
pub mod prelude;
pub mod processor;
mod queue;
pub mod runtime;

pub use config::{AvlConfig, LogFormat};
pub use dispatcher::BoundedDispatcher;
pub use error::{PipelineError, Result};
pub use feed::{AvlFeed, FeedPoller, JsonUrlFeed, PlaybackFeed};
pub use liveness::LivenessSweeper;
pub use processor::{Disposition, ReportProcessor};
pub use queue::StalenessQueue;
pub use runtime::{run, Pipeline, PipelineHandle, PipelineRunner};
