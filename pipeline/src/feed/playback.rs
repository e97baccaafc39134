//! Batch playback feed
//!
//! Replays pre-built report batches, one batch per poll cycle, then reports
//! itself exhausted so the poller stops cleanly. Used for recorded-data
//! runs and for testing the pipeline without a live feed.

use super::AvlFeed;
use async_trait::async_trait;
use parking_lot::Mutex;
use reitti_core::{AvlReport, FeedError};
use std::collections::VecDeque;

/// Feed that hands out prepared batches until they run out.
pub struct PlaybackFeed {
    batches: Mutex<VecDeque<Vec<AvlReport>>>,
}

impl PlaybackFeed {
    /// Create a feed that replays `batches` in order.
    pub fn new(batches: Vec<Vec<AvlReport>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
        }
    }

    /// Batches not yet fetched.
    pub fn remaining(&self) -> usize {
        self.batches.lock().len()
    }
}

#[async_trait]
impl AvlFeed for PlaybackFeed {
    fn name(&self) -> &'static str {
        "playback"
    }

    async fn fetch(&self) -> Result<Vec<AvlReport>, FeedError> {
        Ok(self.batches.lock().pop_front().unwrap_or_default())
    }

    fn is_exhausted(&self) -> bool {
        self.batches.lock().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn batch(vehicle: &str) -> Vec<AvlReport> {
        vec![AvlReport::new(vehicle, Utc::now(), 60.0, 24.0)]
    }

    #[tokio::test]
    async fn test_batches_replayed_in_order() {
        let feed = PlaybackFeed::new(vec![batch("a"), batch("b")]);
        assert!(!feed.is_exhausted());
        assert_eq!(feed.remaining(), 2);

        assert_eq!(feed.fetch().await.unwrap()[0].vehicle_id, "a");
        assert!(!feed.is_exhausted());

        assert_eq!(feed.fetch().await.unwrap()[0].vehicle_id, "b");
        assert!(feed.is_exhausted());

        // Fetching past the end yields empty batches, not errors.
        assert!(feed.fetch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_feed_starts_exhausted() {
        let feed = PlaybackFeed::new(vec![]);
        assert!(feed.is_exhausted());
    }
}
