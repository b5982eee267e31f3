use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::storage::{Database, Feed, StoreError, Subscriber};

/// The persistence operations the update engine needs.
///
/// Every mutating call stamps the feed's last-checked time with the store's
/// own clock.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Feeds due for a refresh, at most `max_count` of them.
    async fn list_due_feeds(&self, max_count: usize) -> Result<Vec<Feed>, StoreError>;

    async fn subscribers_of(&self, feed_id: i64) -> Result<Vec<Subscriber>, StoreError>;

    async fn set_watermark_and_healthy(
        &self,
        feed_id: i64,
        watermark: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn mark_broken(&self, feed_id: i64, reason: &str) -> Result<(), StoreError>;

    async fn mark_checked_no_change(&self, feed_id: i64) -> Result<(), StoreError>;
}

#[async_trait]
impl FeedStore for Database {
    async fn list_due_feeds(&self, max_count: usize) -> Result<Vec<Feed>, StoreError> {
        self.due_feeds_at(max_count, Utc::now()).await
    }

    async fn subscribers_of(&self, feed_id: i64) -> Result<Vec<Subscriber>, StoreError> {
        self.feed_subscribers(feed_id).await
    }

    async fn set_watermark_and_healthy(
        &self,
        feed_id: i64,
        watermark: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.advance_watermark_at(feed_id, watermark, Utc::now()).await
    }

    async fn mark_broken(&self, feed_id: i64, reason: &str) -> Result<(), StoreError> {
        let failures = self.record_failure_at(feed_id, reason, Utc::now()).await?;
        tracing::debug!(feed_id = feed_id, failures = failures, "Feed marked broken");
        Ok(())
    }

    async fn mark_checked_no_change(&self, feed_id: i64) -> Result<(), StoreError> {
        self.record_success_at(feed_id, Utc::now()).await
    }
}
