use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;

use super::{CycleOutcome, Engine};

/// Drives [`Engine`] cycles on a fixed interval.
pub struct Scheduler;

impl Scheduler {
    /// Spawns the cycle loop. The first cycle starts immediately.
    ///
    /// Cycles never overlap: the loop awaits each one before taking the next
    /// tick, and ticks missed while a cycle ran are dropped rather than
    /// replayed.
    pub fn start(engine: Arc<Engine>, interval: Duration) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let cycle_stop = stop_rx.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_secs = interval.as_secs(), "Scheduler started");

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        if *cycle_stop.borrow() {
                            break;
                        }
                        match engine.run_cycle_until(&cycle_stop).await {
                            Ok(CycleOutcome::Completed(_)) => {}
                            Ok(CycleOutcome::Skipped) => {
                                tracing::debug!("Tick skipped, previous cycle still running");
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Update cycle failed");
                            }
                        }
                    }
                }
            }

            tracing::info!("Scheduler stopped");
        });

        SchedulerHandle {
            stop_tx,
            task,
        }
    }
}

/// Control handle for a running [`Scheduler`].
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Asks the loop to stop. Safe to call any number of times.
    ///
    /// A running cycle finishes its current feed and then returns; no new
    /// cycle starts.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.stop();
        self.task.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FeedStore;
    use crate::feed::{FetchError, FetchedFeed, Source};
    use crate::notify::{Dispatch, DispatchError, Notifier, TemplateRenderer};
    use crate::storage::{Feed, StoreError, Subscriber};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store with no feeds that counts how often it was asked.
    #[derive(Default)]
    struct CountingStore {
        selections: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl FeedStore for CountingStore {
        async fn list_due_feeds(&self, _max_count: usize) -> Result<Vec<Feed>, StoreError> {
            self.selections.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(Vec::new())
        }
        async fn subscribers_of(&self, _feed_id: i64) -> Result<Vec<Subscriber>, StoreError> {
            Ok(Vec::new())
        }
        async fn set_watermark_and_healthy(
            &self,
            _feed_id: i64,
            _watermark: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            Ok(())
        }
        async fn mark_broken(&self, _feed_id: i64, _reason: &str) -> Result<(), StoreError> {
            Ok(())
        }
        async fn mark_checked_no_change(&self, _feed_id: i64) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct NeverSource;

    #[async_trait]
    impl Source for NeverSource {
        async fn fetch(&self, address: &str) -> Result<FetchedFeed, FetchError> {
            unreachable!("no feeds are ever selected, asked for {address}")
        }
    }

    struct NullDispatch;

    #[async_trait]
    impl Dispatch for NullDispatch {
        async fn send(&self, _subscriber_id: i64, _text: String) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    fn engine(store: Arc<CountingStore>) -> Arc<Engine> {
        let notifier = Notifier::new(Arc::new(TemplateRenderer::new()), Arc::new(NullDispatch));
        Arc::new(Engine::new(store, Arc::new(NeverSource), notifier, 5))
    }

    // The clock is paused in these tests: sleeps advance virtual time as
    // soon as every task is idle, so cycle counts are exact.

    #[tokio::test(start_paused = true)]
    async fn test_first_cycle_runs_immediately() {
        let store = Arc::new(CountingStore::default());
        let handle = Scheduler::start(engine(store.clone()), Duration::from_secs(3600));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.selections.load(Ordering::SeqCst), 1);

        // Nothing more until the hour is up
        tokio::time::sleep(Duration::from_secs(3000)).await;
        assert_eq!(store.selections.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(store.selections.load(Ordering::SeqCst), 2);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_repeat_until_stopped() {
        let store = Arc::new(CountingStore::default());
        let handle = Scheduler::start(engine(store.clone()), Duration::from_secs(50));

        // Ticks at 0, 50, 100 and 150 seconds
        tokio::time::sleep(Duration::from_secs(175)).await;
        handle.shutdown().await.unwrap();
        assert_eq!(store.selections.load(Ordering::SeqCst), 4);

        tokio::time::sleep(Duration::from_secs(500)).await;
        assert_eq!(store.selections.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycles_do_not_pile_up() {
        let store = Arc::new(CountingStore {
            delay: Duration::from_secs(100),
            ..CountingStore::default()
        });
        let handle = Scheduler::start(engine(store.clone()), Duration::from_secs(10));

        // Each cycle takes ten intervals; missed ticks are dropped, so
        // cycles start at 0, 100, 200 and 300 seconds
        tokio::time::sleep(Duration::from_secs(350)).await;
        assert_eq!(store.selections.load(Ordering::SeqCst), 4);

        // The cycle in flight finishes, no new one starts
        handle.shutdown().await.unwrap();
        assert_eq!(store.selections.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let store = Arc::new(CountingStore::default());
        let handle = Scheduler::start(engine(store.clone()), Duration::from_secs(3600));

        handle.stop();
        handle.stop();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handle.is_finished());
        // Stopped before the loop ever polled, so no cycle ran
        assert_eq!(store.selections.load(Ordering::SeqCst), 0);
        handle.shutdown().await.unwrap();
    }
}
