//! JSON-over-HTTP feed
//!
//! Polls a URL that returns a JSON array of canonical reports. Gzip
//! responses are accepted and decompressed transparently.

use super::AvlFeed;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reitti_core::{AvlReport, FeedError};
use std::time::Duration;
use tracing::debug;

/// Feed that GETs a URL and parses a JSON array of [`AvlReport`]s.
///
/// The HTTP client carries its own timeout as a backstop; the poller's
/// fetch timeout is the one that normally fires first.
pub struct JsonUrlFeed {
    url: String,
    client: reqwest::Client,
}

impl JsonUrlFeed {
    /// Create a feed for `url` with the given request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| PipelineError::Config(format!("http client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    fn parse(&self, body: &Bytes) -> std::result::Result<Vec<AvlReport>, FeedError> {
        serde_json::from_slice(body).map_err(|e| FeedError::Parse(e.to_string()))
    }
}

#[async_trait]
impl AvlFeed for JsonUrlFeed {
    fn name(&self) -> &'static str {
        "json-url"
    }

    async fn fetch(&self) -> std::result::Result<Vec<AvlReport>, FeedError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FeedError::Fetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| FeedError::Fetch(e.to_string()))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| FeedError::Fetch(e.to_string()))?;
        debug!(url = %self.url, bytes = body.len(), "feed response received");

        self.parse(&body)
    }
}
