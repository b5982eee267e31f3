//! Subscriber-facing operations on top of the store.
//!
//! These are the command handlers behind `subscribe`, `unsubscribe`, `list`,
//! `import`, `forget`, `stats`, `broadcast` and `feedback`. They share the
//! SQLite store with the engine but keep no feed state of their own.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::feed::{OpmlEntry, Source};
use crate::notify::{
    Dispatch, NotifyReport, TemplateRenderer, FALLBACK_LOCALE, FEEDBACK_TEMPLATE, NOTICE_TEMPLATE,
};
use crate::storage::{Database, Feed, Stats};
use crate::util::{slugify, strip_control_chars, validate_address};

/// Longest operator announcement, in bytes.
pub const MAX_NOTICE_BYTES: usize = 2000;
/// Longest feedback message, in bytes.
pub const MAX_FEEDBACK_BYTES: usize = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("message is empty")]
    Empty,
    #[error("message is longer than {limit} bytes")]
    TooLong { limit: usize },
    #[error("no dispatcher configured for outgoing messages")]
    NotConfigured,
}

#[derive(Serialize)]
struct NoticeData<'a> {
    message: &'a str,
}

#[derive(Serialize)]
struct FeedbackData<'a> {
    subscriber: i64,
    message: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Created(Feed),
    AlreadySubscribed(Feed),
}

impl SubscribeOutcome {
    pub fn feed(&self) -> &Feed {
        match self {
            SubscribeOutcome::Created(feed) | SubscribeOutcome::AlreadySubscribed(feed) => feed,
        }
    }
}

/// Counts from a bulk import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub created: usize,
    pub existing: usize,
    /// Address and reason for each entry that could not be subscribed.
    pub failed: Vec<(String, String)>,
}

pub struct SubscriptionService {
    db: Database,
    source: Arc<dyn Source>,
    messaging: Option<(Arc<TemplateRenderer>, Arc<dyn Dispatch>)>,
}

impl SubscriptionService {
    pub fn new(db: Database, source: Arc<dyn Source>) -> Self {
        Self {
            db,
            source,
            messaging: None,
        }
    }

    /// Enables [`broadcast`](Self::broadcast) and [`feedback`](Self::feedback).
    pub fn with_messaging(mut self, renderer: Arc<TemplateRenderer>, dispatch: Arc<dyn Dispatch>) -> Self {
        self.messaging = Some((renderer, dispatch));
        self
    }

    /// Subscribes `subscriber_id` to the feed at `address`.
    ///
    /// A feed already in the store is reused as is. Otherwise the address is
    /// fetched once to confirm it is a feed and to learn its title.
    pub async fn subscribe(
        &self,
        subscriber_id: i64,
        address: &str,
        locale: &str,
    ) -> Result<SubscribeOutcome> {
        let url = validate_address(address)
            .with_context(|| format!("Refusing to subscribe to '{address}'"))?;
        let url = url.as_str();

        let feed = match self.db.feed_by_url(url).await? {
            Some(feed) => feed,
            None => self.create_feed(url).await?,
        };

        let created = self
            .db
            .subscribe(subscriber_id, locale, feed.id)
            .await
            .context("Failed to store subscription")?;

        // Re-read: a first subscription resets the watermark
        let feed = self.db.feed_by_id(feed.id).await?.unwrap_or(feed);

        if created {
            tracing::info!(subscriber_id, feed_id = feed.id, url = %feed.url, "Subscribed");
            Ok(SubscribeOutcome::Created(feed))
        } else {
            Ok(SubscribeOutcome::AlreadySubscribed(feed))
        }
    }

    async fn create_feed(&self, url: &str) -> Result<Feed> {
        let fetched = self
            .source
            .fetch(url)
            .await
            .with_context(|| format!("'{url}' could not be read as a feed"))?;

        let title = strip_control_chars(fetched.title.trim()).into_owned();
        let title = if title.is_empty() {
            host_of(url).unwrap_or_else(|| url.to_string())
        } else {
            title
        };
        let mut slug = slugify(&title);
        if slug.is_empty() {
            slug = host_of(url).map(|h| slugify(&h)).unwrap_or_default();
        }

        let feed = self
            .db
            .insert_feed(&title, &slug, url)
            .await
            .context("Failed to store feed")?;
        tracing::info!(feed_id = feed.id, url = %feed.url, slug = %feed.slug, "New feed registered");
        Ok(feed)
    }

    /// Removes one subscription, looked up by address or slug. Returns the
    /// feed that was dropped, or `None` if the subscriber had no such feed.
    pub async fn unsubscribe(&self, subscriber_id: i64, address_or_slug: &str) -> Result<Option<Feed>> {
        let wanted = address_or_slug.trim();
        // Stored addresses are in parsed form; slugs do not parse as URLs
        let wanted = match url::Url::parse(wanted) {
            Ok(url) => url.to_string(),
            Err(_) => wanted.to_string(),
        };
        let Some(feed) = self.db.find_subscription(subscriber_id, &wanted).await? else {
            return Ok(None);
        };

        self.db.unsubscribe(subscriber_id, feed.id).await?;
        tracing::info!(subscriber_id, feed_id = feed.id, "Unsubscribed");
        Ok(Some(feed))
    }

    pub async fn list(&self, subscriber_id: i64) -> Result<Vec<Feed>> {
        Ok(self.db.subscriptions_of(subscriber_id).await?)
    }

    /// Subscribes to every entry, continuing past individual failures.
    pub async fn import(
        &self,
        subscriber_id: i64,
        locale: &str,
        entries: &[OpmlEntry],
    ) -> Result<ImportReport> {
        let mut report = ImportReport::default();

        for entry in entries {
            match self.subscribe(subscriber_id, &entry.address, locale).await {
                Ok(SubscribeOutcome::Created(_)) => report.created += 1,
                Ok(SubscribeOutcome::AlreadySubscribed(_)) => report.existing += 1,
                Err(e) => {
                    tracing::warn!(url = %entry.address, error = %format!("{e:#}"), "Import entry skipped");
                    report.failed.push((entry.address.clone(), format!("{e:#}")));
                }
            }
        }

        Ok(report)
    }

    /// Drops all of a subscriber's subscriptions. Returns how many there were.
    pub async fn forget(&self, subscriber_id: i64) -> Result<u64> {
        let removed = self.db.remove_subscriber(subscriber_id).await?;
        tracing::info!(subscriber_id, removed, "Subscriber forgotten");
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<Stats> {
        Ok(self.db.stats().await?)
    }

    /// Sends an operator announcement to every registered subscriber, each
    /// in their own locale. Individual failures are logged and counted.
    pub async fn broadcast(&self, text: &str) -> Result<NotifyReport> {
        let message = checked_message(text, MAX_NOTICE_BYTES)?;
        let (renderer, dispatch) = self.messaging()?;

        let recipients = self.db.all_subscribers().await?;
        let mut rendered: HashMap<String, String> = HashMap::new();
        let mut report = NotifyReport::default();

        for recipient in &recipients {
            let text = match rendered.get(&recipient.locale) {
                Some(text) => text.clone(),
                None => {
                    let text = renderer
                        .render_data(&recipient.locale, NOTICE_TEMPLATE, &NoticeData { message })
                        .context("Failed to render announcement")?;
                    rendered.insert(recipient.locale.clone(), text.clone());
                    text
                }
            };

            match dispatch.send(recipient.id, text).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(subscriber_id = recipient.id, error = %e, "Failed to dispatch announcement");
                }
            }
        }

        tracing::info!(
            recipients = recipients.len(),
            sent = report.sent,
            failed = report.failed,
            "Announcement sent"
        );
        Ok(report)
    }

    /// Forwards a subscriber's message to the operator, rendered in the
    /// operator's locale when the operator is a known subscriber.
    pub async fn feedback(&self, subscriber_id: i64, text: &str, operator_id: i64) -> Result<()> {
        let message = checked_message(text, MAX_FEEDBACK_BYTES)?;
        let (renderer, dispatch) = self.messaging()?;

        let locale = self
            .db
            .subscriber(operator_id)
            .await?
            .map(|s| s.locale)
            .unwrap_or_else(|| FALLBACK_LOCALE.to_string());
        let data = FeedbackData {
            subscriber: subscriber_id,
            message,
        };
        let text = renderer
            .render_data(&locale, FEEDBACK_TEMPLATE, &data)
            .context("Failed to render feedback")?;

        dispatch
            .send(operator_id, text)
            .await
            .context("Failed to forward feedback")?;
        tracing::info!(subscriber_id, operator_id, "Feedback forwarded");
        Ok(())
    }

    fn messaging(&self) -> Result<(&TemplateRenderer, &dyn Dispatch), MessageError> {
        self.messaging
            .as_ref()
            .map(|(renderer, dispatch)| (renderer.as_ref(), dispatch.as_ref()))
            .ok_or(MessageError::NotConfigured)
    }
}

/// Trimmed message text, refused when empty or over `limit` bytes.
fn checked_message(text: &str, limit: usize) -> Result<&str, MessageError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(MessageError::Empty);
    }
    if text.len() > limit {
        return Err(MessageError::TooLong { limit });
    }
    Ok(text)
}

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}
