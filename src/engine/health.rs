use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

use super::FeedStore;
use crate::feed::FetchError;
use crate::storage::{Feed, StoreError};

/// Whether the latest fetch of a feed succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Broken,
}

impl HealthState {
    pub fn of(feed: &Feed) -> Self {
        if feed.healthy {
            HealthState::Healthy
        } else {
            HealthState::Broken
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Healthy => f.write_str("healthy"),
            HealthState::Broken => f.write_str("broken"),
        }
    }
}

/// Writes fetch outcomes through to the store.
///
/// Broken feeds get no backoff beyond the selector's once-a-day rule.
#[derive(Clone)]
pub struct HealthTracker {
    store: Arc<dyn FeedStore>,
}

impl HealthTracker {
    pub fn new(store: Arc<dyn FeedStore>) -> Self {
        Self { store }
    }

    pub async fn record_failure(&self, feed: &Feed, error: &FetchError) -> Result<HealthState, StoreError> {
        self.store.mark_broken(feed.id, &error.cause.to_string()).await?;
        if HealthState::of(feed) == HealthState::Healthy {
            tracing::info!(feed_id = feed.id, url = %feed.url, "Feed became broken");
        }
        Ok(HealthState::Broken)
    }

    /// Successful fetch and detection; `watermark` is set only when it
    /// advanced.
    pub async fn record_success(
        &self,
        feed: &Feed,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<HealthState, StoreError> {
        match watermark {
            Some(watermark) => self.store.set_watermark_and_healthy(feed.id, watermark).await?,
            None => self.store.mark_checked_no_change(feed.id).await?,
        }
        if HealthState::of(feed) == HealthState::Broken {
            tracing::info!(feed_id = feed.id, url = %feed.url, "Feed recovered");
        }
        Ok(HealthState::Healthy)
    }
}
