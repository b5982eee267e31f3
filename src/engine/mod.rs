//! The feed update engine.
//!
//! A cycle selects the feeds due for a refresh and, one feed at a time,
//! fetches it, detects items newer than its watermark, persists the new
//! watermark and health, then notifies subscribers. A failing feed is
//! recorded as broken and the cycle moves on.
//!
//! The watermark is persisted before any notification is sent, so a crash
//! mid-cycle can lose notifications but never repeat them.

mod detector;
mod health;
mod scheduler;
mod store;

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use crate::feed::{CandidateItem, Source};
use crate::notify::Notifier;
use crate::storage::{Feed, StoreError};

pub use detector::{detect, Detection};
pub use health::{HealthState, HealthTracker};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use store::FeedStore;

/// What to do with a feed that has never had a watermark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FirstCheckPolicy {
    /// Record the newest item's timestamp and send nothing.
    #[default]
    Seed,
    /// Treat every dated item as new.
    Deliver,
}

/// Counters for one completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Feeds returned by the selector
    pub selected: usize,
    /// Feeds fetched and recorded healthy
    pub checked: usize,
    /// Feeds whose fetch failed
    pub failed: usize,
    /// Feeds dropped mid-way by a store error
    pub abandoned: usize,
    /// Feeds that produced at least one notification batch
    pub updated: usize,
    /// Messages accepted by the dispatcher
    pub sent: usize,
    /// True when a stop request cut the cycle short
    pub stopped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was already running.
    Skipped,
}

pub struct Engine {
    store: Arc<dyn FeedStore>,
    source: Arc<dyn Source>,
    notifier: Notifier,
    health: HealthTracker,
    feeds_per_cycle: usize,
    first_check: FirstCheckPolicy,
    cycle_lock: Mutex<()>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn FeedStore>,
        source: Arc<dyn Source>,
        notifier: Notifier,
        feeds_per_cycle: usize,
    ) -> Self {
        Self {
            health: HealthTracker::new(store.clone()),
            store,
            source,
            notifier,
            feeds_per_cycle,
            first_check: FirstCheckPolicy::default(),
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn with_first_check(mut self, policy: FirstCheckPolicy) -> Self {
        self.first_check = policy;
        self
    }

    /// Runs one full cycle.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, StoreError> {
        let (_stop_tx, stop_rx) = watch::channel(false);
        self.run_cycle_until(&stop_rx).await
    }

    /// Runs one cycle, checking `stop` before each feed.
    ///
    /// Returns `Skipped` without touching anything if a cycle is already in
    /// progress. A store failure while selecting feeds ends the cycle with
    /// an error; a store failure on one feed only abandons that feed.
    pub async fn run_cycle_until(
        &self,
        stop: &watch::Receiver<bool>,
    ) -> Result<CycleOutcome, StoreError> {
        let Ok(_running) = self.cycle_lock.try_lock() else {
            tracing::debug!("Cycle already in progress, skipping");
            return Ok(CycleOutcome::Skipped);
        };

        let feeds = self
            .store
            .list_due_feeds(self.feeds_per_cycle)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to select feeds for update"))?;

        let mut report = CycleReport {
            selected: feeds.len(),
            ..CycleReport::default()
        };
        tracing::info!(feeds = feeds.len(), "Update cycle started");

        for feed in &feeds {
            if *stop.borrow() {
                report.stopped = true;
                tracing::info!("Stop requested, ending cycle early");
                break;
            }
            if let Err(e) = self.process_feed(feed, &mut report).await {
                report.abandoned += 1;
                tracing::warn!(
                    feed_id = feed.id,
                    url = %feed.url,
                    error = %e,
                    "Store error, feed abandoned for this cycle"
                );
            }
        }

        tracing::info!(
            selected = report.selected,
            checked = report.checked,
            failed = report.failed,
            abandoned = report.abandoned,
            updated = report.updated,
            sent = report.sent,
            "Update cycle finished"
        );
        Ok(CycleOutcome::Completed(report))
    }

    async fn process_feed(&self, feed: &Feed, report: &mut CycleReport) -> Result<(), StoreError> {
        let fetched = match self.source.fetch(&feed.url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!(feed_id = feed.id, url = %feed.url, error = %e.cause, "Feed fetch failed");
                self.health.record_failure(feed, &e).await?;
                report.failed += 1;
                return Ok(());
            }
        };

        // Items dated in the future wait until their time comes, which keeps
        // the watermark at or below the check time.
        let now = Utc::now();
        let (current, deferred): (Vec<CandidateItem>, Vec<CandidateItem>) = fetched
            .items
            .into_iter()
            .partition(|item| item.published.map_or(true, |p| p <= now));
        if !deferred.is_empty() {
            tracing::debug!(feed_id = feed.id, deferred = deferred.len(), "Future-dated items deferred");
        }

        let previous = feed.last_published;
        let detection = detect(&current, previous);
        let watermark = detection.advanced(previous).then_some(detection.watermark).flatten();

        let seeding = previous.is_none() && self.first_check == FirstCheckPolicy::Seed;
        if seeding || detection.new_items.is_empty() {
            self.health.record_success(feed, watermark).await?;
            report.checked += 1;
            if seeding {
                tracing::info!(feed_id = feed.id, watermark = ?watermark, "Seeded feed watermark");
            } else {
                tracing::debug!(feed_id = feed.id, "No new items");
            }
            return Ok(());
        }

        let subscribers = self.store.subscribers_of(feed.id).await?;
        self.health.record_success(feed, watermark).await?;
        report.checked += 1;

        tracing::info!(
            feed_id = feed.id,
            url = %feed.url,
            items = detection.new_items.len(),
            subscribers = subscribers.len(),
            "New items found"
        );
        let sent = self
            .notifier
            .notify(feed, &detection.new_items, &subscribers)
            .await;
        report.updated += 1;
        report.sent += sent.sent;

        Ok(())
    }
}
