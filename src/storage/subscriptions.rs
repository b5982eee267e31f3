use chrono::Utc;

use super::schema::Database;
use super::types::{Feed, Stats, StoreError, Subscriber, FEED_COLUMNS};

impl Database {
    // ========================================================================
    // Subscription Operations
    // ========================================================================

    /// Subscribes `subscriber_id` to `feed_id`, registering the subscriber
    /// (or updating its locale) on the way.
    ///
    /// Returns `false` if the subscription already existed. When the feed
    /// gains its first subscriber its watermark and last check are reset to
    /// now and it is marked healthy, so the back catalogue is not replayed.
    pub async fn subscribe(
        &self,
        subscriber_id: i64,
        locale: &str,
        feed_id: i64,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO subscribers (id, locale, created_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET locale = excluded.locale
        "#,
        )
        .bind(subscriber_id)
        .bind(locale)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let (existing,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM subscriptions WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_one(&mut *tx)
                .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO subscriptions (subscriber_id, feed_id, created_at) VALUES (?, ?, ?)
            ON CONFLICT(subscriber_id, feed_id) DO NOTHING
        "#,
        )
        .bind(subscriber_id)
        .bind(feed_id)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if inserted && existing == 0 {
            sqlx::query(
                r#"
                UPDATE feeds SET
                    last_published = ?,
                    last_checked = ?,
                    healthy = 1,
                    consecutive_failures = 0,
                    last_error = NULL
                WHERE id = ?
            "#,
            )
            .bind(now)
            .bind(now)
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;
            tracing::debug!(feed_id = feed_id, "First subscriber, feed watermark reset");
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Returns `false` if there was nothing to remove.
    pub async fn unsubscribe(&self, subscriber_id: i64, feed_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE subscriber_id = ? AND feed_id = ?")
            .bind(subscriber_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Feeds `subscriber_id` is subscribed to, oldest subscription first.
    pub async fn subscriptions_of(&self, subscriber_id: i64) -> Result<Vec<Feed>, StoreError> {
        let sql = format!(
            r#"
            SELECT {FEED_COLUMNS}
            FROM subscriptions s
            INNER JOIN feeds f ON f.id = s.feed_id
            WHERE s.subscriber_id = ?
            ORDER BY s.created_at, s.rowid
        "#
        );
        let feeds = sqlx::query_as::<_, Feed>(&sql)
            .bind(subscriber_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    /// Finds one of the subscriber's feeds by exact URL or by slug.
    pub async fn find_subscription(
        &self,
        subscriber_id: i64,
        url_or_slug: &str,
    ) -> Result<Option<Feed>, StoreError> {
        let sql = format!(
            r#"
            SELECT {FEED_COLUMNS}
            FROM subscriptions s
            INNER JOIN feeds f ON f.id = s.feed_id
            WHERE s.subscriber_id = ? AND (f.url = ? OR f.slug = ?)
            ORDER BY f.url = ? DESC
            LIMIT 1
        "#
        );
        let feed = sqlx::query_as::<_, Feed>(&sql)
            .bind(subscriber_id)
            .bind(url_or_slug)
            .bind(url_or_slug)
            .bind(url_or_slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    /// Drops every subscription of `subscriber_id` and the subscriber itself.
    /// Returns how many subscriptions were removed.
    pub async fn remove_subscriber(&self, subscriber_id: i64) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM subscriptions WHERE subscriber_id = ?")
            .bind(subscriber_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM subscribers WHERE id = ?")
            .bind(subscriber_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(removed)
    }

    /// Every registered subscriber, including those left with no
    /// subscriptions, in id order.
    pub async fn all_subscribers(&self) -> Result<Vec<Subscriber>, StoreError> {
        let subscribers = sqlx::query_as::<_, Subscriber>("SELECT id, locale FROM subscribers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(subscribers)
    }

    pub async fn subscriber(&self, subscriber_id: i64) -> Result<Option<Subscriber>, StoreError> {
        let subscriber = sqlx::query_as::<_, Subscriber>("SELECT id, locale FROM subscribers WHERE id = ?")
            .bind(subscriber_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(subscriber)
    }

    pub async fn stats(&self) -> Result<Stats, StoreError> {
        let (subscribers,): (i64,) =
            sqlx::query_as("SELECT COUNT(DISTINCT subscriber_id) FROM subscriptions")
                .fetch_one(&self.pool)
                .await?;
        let (feeds,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feeds")
            .fetch_one(&self.pool)
            .await?;
        Ok(Stats { subscribers, feeds })
    }
}
