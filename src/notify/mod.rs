//! Fan-out of new feed items to subscribers.
//!
//! The [`Notifier`] renders each item once per subscriber locale and hands
//! one message per (item, subscriber) pair to a [`Dispatch`]. Rendering and
//! dispatch failures are logged and skipped; they never stop the fan-out.

mod dispatch;
mod render;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::feed::CandidateItem;
use crate::storage::{Feed, Subscriber};

pub use dispatch::{JsonLinesSink, OutboundMessage, OutboxDispatch, DEFAULT_OUTBOX_CAPACITY};
pub use render::{TemplateRenderer, FALLBACK_LOCALE, FEEDBACK_TEMPLATE, NOTICE_TEMPLATE};

/// Template used for new-item notifications.
pub const TOPIC_TEMPLATE: &str = "topic";

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The consumer side of the outbox is gone
    #[error("outbox closed")]
    Closed,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write message: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown template: {0}")]
    UnknownTemplate(String),
    #[error("invalid template: {0}")]
    Template(#[from] handlebars::TemplateError),
    #[error("failed to render template: {0}")]
    Render(#[from] handlebars::RenderError),
}

/// Transport for rendered messages.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn send(&self, subscriber_id: i64, text: String) -> Result<(), DispatchError>;
}

/// Turns a topic into message text for a locale.
pub trait Renderer: Send + Sync {
    fn render(&self, locale: &str, template: &str, topic: &Topic) -> Result<String, RenderError>;
}

/// Template data for one new item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub feed: String,
    pub title: String,
    pub text: String,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

impl Topic {
    pub fn new(feed: &Feed, item: &CandidateItem) -> Self {
        Self {
            feed: feed.title.clone(),
            title: item.title.clone(),
            text: item.excerpt.clone(),
            link: item.link.clone(),
            published: item.published,
        }
    }
}

/// Per-call delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub sent: usize,
    pub failed: usize,
}

pub struct Notifier {
    renderer: Arc<dyn Renderer>,
    dispatch: Arc<dyn Dispatch>,
}

impl Notifier {
    pub fn new(renderer: Arc<dyn Renderer>, dispatch: Arc<dyn Dispatch>) -> Self {
        Self { renderer, dispatch }
    }

    /// Sends every item to every subscriber, oldest item first.
    ///
    /// Exactly one `send` is attempted per (item, subscriber) pair whose text
    /// rendered successfully.
    pub async fn notify(
        &self,
        feed: &Feed,
        items: &[CandidateItem],
        subscribers: &[Subscriber],
    ) -> NotifyReport {
        let mut report = NotifyReport::default();
        if subscribers.is_empty() {
            return report;
        }

        let mut ordered: Vec<&CandidateItem> = items.iter().collect();
        ordered.sort_by_key(|item| item.published);

        for item in ordered {
            let topic = Topic::new(feed, item);
            let mut rendered: HashMap<&str, Option<String>> = HashMap::new();

            for subscriber in subscribers {
                let text = rendered
                    .entry(subscriber.locale.as_str())
                    .or_insert_with(|| {
                        match self.renderer.render(&subscriber.locale, TOPIC_TEMPLATE, &topic) {
                            Ok(text) => Some(text),
                            Err(e) => {
                                tracing::warn!(
                                    feed_id = feed.id,
                                    locale = %subscriber.locale,
                                    error = %e,
                                    "Failed to render notification"
                                );
                                None
                            }
                        }
                    })
                    .clone();

                let Some(text) = text else {
                    report.failed += 1;
                    continue;
                };

                match self.dispatch.send(subscriber.id, text).await {
                    Ok(()) => report.sent += 1,
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(
                            feed_id = feed.id,
                            subscriber_id = subscriber.id,
                            error = %e,
                            "Failed to dispatch notification"
                        );
                    }
                }
            }
        }

        report
    }
}
