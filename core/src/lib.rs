//! reitti-core - Core types for the reitti AVL ingestion pipeline
//!
//! This crate provides the types shared between the pipeline and the
//! deployment-specific collaborators (stores, matchers, feeds):
//!
//! - [`AvlReport`] - the canonical vehicle-location record
//! - [`ReportStore`] / [`MatchingEngine`] traits - async seams to
//!   persistence and the downstream matcher
//! - [`VehicleStatus`] trait - layover queries for the liveness sweeper
//! - [`ValidationError`], [`FeedError`], [`SinkError`] - error types
//!
//! # Why this crate exists
//!
//! A store or matcher implementation needs `AvlReport` and the trait it
//! implements, nothing else. Without `reitti-core` it would have to depend
//! on `reitti-pipeline`, while the pipeline wants to ship default
//! implementations of those same traits - a cycle. Extracting the shared
//! types here breaks it:
//!
//! ```text
//! reitti-core ◄── reitti-pipeline
//!     ▲
//!     └────────── your store / matcher crate
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

mod error;
mod report;
mod sink;

pub use error::{FeedError, SinkError, ValidationError};
pub use report::{AssignmentKind, AvlReport};
pub use sink::{
    MatchingEngine, MemoryReportStore, NoLayovers, NullMatchingEngine, ReportStore, VehicleStatus,
};
