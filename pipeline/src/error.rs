//! Pipeline-level error type

use reitti_core::{FeedError, SinkError};
use thiserror::Error;

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Top-level error for pipeline construction and operation.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration error (bad env var, invalid value).
    #[error("configuration error: {0}")]
    Config(String),

    /// A feed operation failed.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// A downstream sink operation failed.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// The dispatcher has been shut down; no more reports are accepted.
    #[error("dispatcher is shut down")]
    Closed,

    /// Metrics registration failed.
    #[error("metrics error: {0}")]
    Metrics(String),
}
