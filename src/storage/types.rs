use chrono::{DateTime, Utc};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Store failures with operator-friendly messages
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another process holds the database lock
    #[error("Another instance of feedrelay appears to be using the database. Stop it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return StoreError::InstanceLocked;
        }
        StoreError::Database(err)
    }
}

// SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Data Structures
// ============================================================================

/// A polled source as stored.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub url: String,
    pub healthy: bool,
    /// Stamped on every fetch attempt, successful or not.
    pub last_checked: Option<DateTime<Utc>>,
    /// Watermark: newest item timestamp ever judged for this feed.
    pub last_published: Option<DateTime<Utc>>,
    pub consecutive_failures: i64,
    pub last_error: Option<String>,
}

/// A notification recipient.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Subscriber {
    pub id: i64,
    /// Locale tag handed to the renderer, e.g. `en` or `ru`.
    pub locale: String,
}

/// Service-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Distinct subscribers with at least one subscription
    pub subscribers: i64,
    /// Feeds known to the store, subscribed or not
    pub feeds: i64,
}

pub(crate) const FEED_COLUMNS: &str = "f.id, f.title, f.slug, f.url, f.healthy, f.last_checked, \
     f.last_published, f.consecutive_failures, f.last_error";
