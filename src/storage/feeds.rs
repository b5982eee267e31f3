use chrono::{DateTime, NaiveTime, Utc};

use super::schema::Database;
use super::types::{Feed, StoreError, Subscriber, FEED_COLUMNS};

/// Start of the UTC day containing `now`. Broken feeds become due again once
/// their last check falls before this instant.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Inserts a feed unless one with the same URL exists, then returns the
    /// stored row either way.
    pub async fn insert_feed(&self, title: &str, slug: &str, url: &str) -> Result<Feed, StoreError> {
        sqlx::query("INSERT INTO feeds (title, slug, url) VALUES (?, ?, ?) ON CONFLICT(url) DO NOTHING")
            .bind(title)
            .bind(slug)
            .bind(url)
            .execute(&self.pool)
            .await?;

        self.feed_by_url(url)
            .await?
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))
    }

    pub async fn feed_by_url(&self, url: &str) -> Result<Option<Feed>, StoreError> {
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds f WHERE f.url = ?");
        let feed = sqlx::query_as::<_, Feed>(&sql)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn feed_by_id(&self, feed_id: i64) -> Result<Option<Feed>, StoreError> {
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds f WHERE f.id = ?");
        let feed = sqlx::query_as::<_, Feed>(&sql)
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    /// Feeds due for a refresh as of `now`.
    ///
    /// A feed is due when it has at least one subscriber and is either
    /// healthy, never checked, or was last checked before today (UTC). Never
    /// checked feeds come first, then the stalest; at most `max_count` rows.
    pub async fn due_feeds_at(
        &self,
        max_count: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Feed>, StoreError> {
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            SELECT {FEED_COLUMNS}
            FROM feeds f
            WHERE EXISTS (SELECT 1 FROM subscriptions s WHERE s.feed_id = f.id)
              AND (f.healthy = 1 OR f.last_checked IS NULL OR f.last_checked < ?)
            ORDER BY f.last_checked IS NOT NULL, f.last_checked, f.id
            LIMIT ?
        "#
        );
        let feeds = sqlx::query_as::<_, Feed>(&sql)
            .bind(start_of_day(now))
            .bind(i64::try_from(max_count).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    /// Everyone subscribed to `feed_id`, in subscription order.
    pub async fn feed_subscribers(&self, feed_id: i64) -> Result<Vec<Subscriber>, StoreError> {
        let subscribers = sqlx::query_as::<_, Subscriber>(
            r#"
            SELECT sub.id, sub.locale
            FROM subscriptions s
            INNER JOIN subscribers sub ON sub.id = s.subscriber_id
            WHERE s.feed_id = ?
            ORDER BY s.created_at, s.rowid
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(subscribers)
    }

    /// Records a successful check that advanced the watermark.
    ///
    /// The stored watermark never moves backwards, even if called with an
    /// older timestamp.
    pub async fn advance_watermark_at(
        &self,
        feed_id: i64,
        watermark: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE feeds SET
                last_published = CASE
                    WHEN last_published IS NULL OR last_published < ? THEN ?
                    ELSE last_published
                END,
                last_checked = ?,
                healthy = 1,
                consecutive_failures = 0,
                last_error = NULL
            WHERE id = ?
        "#,
        )
        .bind(watermark)
        .bind(watermark)
        .bind(now)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records a failed fetch and returns the new failure streak length.
    pub async fn record_failure_at(
        &self,
        feed_id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE feeds SET
                healthy = 0,
                last_checked = ?,
                consecutive_failures = consecutive_failures + 1,
                last_error = ?
            WHERE id = ?
            RETURNING consecutive_failures
        "#,
        )
        .bind(now)
        .bind(reason)
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(n,)| n).unwrap_or(0))
    }

    /// Records a successful check that found nothing new.
    pub async fn record_success_at(&self, feed_id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE feeds SET
                last_checked = ?,
                healthy = 1,
                consecutive_failures = 0,
                last_error = NULL
            WHERE id = ?
        "#,
        )
        .bind(now)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
