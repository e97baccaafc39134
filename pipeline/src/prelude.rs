//! Convenience re-exports for pipeline binaries
//!
//! ```ignore
//! use reitti_pipeline::prelude::*;
//! ```

pub use crate::config::{AvlConfig, LogFormat};
pub use crate::error::{PipelineError, Result};
pub use crate::feed::{AvlFeed, JsonUrlFeed, PlaybackFeed};
pub use crate::runtime::{run, Pipeline, PipelineHandle, PipelineRunner};

pub use reitti_core::{
    AssignmentKind, AvlReport, FeedError, MatchingEngine, MemoryReportStore, ReportStore,
    SinkError, ValidationError, VehicleStatus,
};

pub use async_trait::async_trait;
