//! Integration tests for the subscriber commands: subscribe, list, import,
//! unsubscribe, forget, broadcast, feedback.
//!
//! Each test creates its own in-memory SQLite database. Feed fetches go to a
//! canned source since subscription refuses loopback addresses.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use feedrelay::feed::{opml, FetchError, FetchFailure, FetchedFeed, Source};
use feedrelay::notify::{NotifyReport, OutboxDispatch, TemplateRenderer};
use feedrelay::storage::{Database, Stats};
use feedrelay::subscriptions::{MessageError, SubscribeOutcome, SubscriptionService};
use feedrelay::util::extract_addresses;

#[derive(Default)]
struct CannedSource {
    titles: HashMap<String, String>,
    fetched: Mutex<Vec<String>>,
}

impl CannedSource {
    fn with(titles: &[(&str, &str)]) -> Self {
        Self {
            titles: titles
                .iter()
                .map(|(url, title)| (url.to_string(), title.to_string()))
                .collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Source for CannedSource {
    async fn fetch(&self, address: &str) -> Result<FetchedFeed, FetchError> {
        self.fetched.lock().unwrap().push(address.to_string());
        match self.titles.get(address) {
            Some(title) => Ok(FetchedFeed {
                title: title.clone(),
                items: Vec::new(),
            }),
            None => Err(FetchError::new(address, FetchFailure::HttpStatus(404))),
        }
    }
}

async fn setup(titles: &[(&str, &str)]) -> (SubscriptionService, Database, Arc<CannedSource>) {
    let db = Database::open(":memory:").await.unwrap();
    let source = Arc::new(CannedSource::with(titles));
    (SubscriptionService::new(db.clone(), source.clone()), db, source)
}

// ============================================================================
// Subscribe / list / unsubscribe
// ============================================================================

#[tokio::test]
async fn test_subscribe_from_free_form_arguments() {
    let (service, _, source) = setup(&[
        ("https://blog.rust-lang.org/feed.xml", "Rust Blog"),
        ("https://this-week-in-rust.org/rss.xml", "This Week in Rust"),
    ])
    .await;

    let args = "add https://blog.rust-lang.org/feed.xml and https://this-week-in-rust.org/rss.xml https://example.com";
    let addresses = extract_addresses(args);
    assert_eq!(addresses.len(), 2);

    for address in &addresses {
        let outcome = service.subscribe(42, address, "en").await.unwrap();
        assert!(matches!(outcome, SubscribeOutcome::Created(_)));
    }

    let slugs: Vec<String> = service
        .list(42)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.slug)
        .collect();
    assert_eq!(slugs, vec!["rust-blog", "this-week-in-rust"]);
    assert_eq!(source.fetched.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_shared_feed_between_subscribers() {
    let (service, db, source) = setup(&[("https://news.example.com/rss", "News")]).await;

    service.subscribe(1, "https://news.example.com/rss", "en").await.unwrap();
    service.subscribe(2, "https://news.example.com/rss", "ru").await.unwrap();

    assert_eq!(source.fetched.lock().unwrap().len(), 1);
    assert_eq!(service.stats().await.unwrap(), Stats { subscribers: 2, feeds: 1 });

    let feed = db.feed_by_url("https://news.example.com/rss").await.unwrap().unwrap();
    let locales: Vec<String> = db
        .feed_subscribers(feed.id)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.locale)
        .collect();
    assert_eq!(locales, vec!["en", "ru"]);

    // Dropping one subscriber leaves the other in place
    service.unsubscribe(1, "news").await.unwrap().unwrap();
    assert_eq!(service.stats().await.unwrap(), Stats { subscribers: 1, feeds: 1 });
    assert_eq!(db.feed_subscribers(feed.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unreachable_feed_not_stored() {
    let (service, db, _) = setup(&[]).await;

    let err = service
        .subscribe(1, "https://gone.example.com/rss", "en")
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("404"));
    assert!(db.feed_by_url("https://gone.example.com/rss").await.unwrap().is_none());
    assert!(service.list(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unsubscribe_unknown_feed() {
    let (service, _, _) = setup(&[]).await;
    assert!(service.unsubscribe(1, "nothing-here").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unsubscribe_with_address_as_subscribed() {
    let (service, _, _) = setup(&[("https://news.example.com/rss", "News")]).await;

    service.subscribe(4, "HTTPS://News.Example.com:443/rss", "en").await.unwrap();
    let dropped = service
        .unsubscribe(4, "HTTPS://News.Example.com:443/rss")
        .await
        .unwrap();
    assert_eq!(dropped.map(|f| f.url), Some("https://news.example.com/rss".to_string()));
    assert!(service.list(4).await.unwrap().is_empty());
}

// ============================================================================
// OPML import and forget
// ============================================================================

#[tokio::test]
async fn test_import_then_forget() {
    let (service, _, _) = setup(&[
        ("https://a.example.com/rss", "Alpha"),
        ("https://b.example.com/atom", "Beta"),
    ])
    .await;

    let dir = std::env::temp_dir().join("feedrelay_import_lifecycle");
    std::fs::create_dir_all(&dir).unwrap();
    let file = dir.join("subs.opml");
    std::fs::write(
        &file,
        r#"<?xml version="1.0"?>
<opml version="2.0">
  <head><title>subs</title></head>
  <body>
    <outline text="Tech">
      <outline text="Alpha" xmlUrl="https://a.example.com/rss"/>
      <outline text="Beta" xmlUrl="https://b.example.com/atom"/>
    </outline>
    <outline text="Dead" xmlUrl="https://dead.example.com/rss"/>
    <outline text="Local" xmlUrl="http://127.0.0.1/rss"/>
  </body>
</opml>"#,
    )
    .unwrap();

    let entries = opml::read_file(&file).await.unwrap();
    // The loopback entry is dropped while parsing
    assert_eq!(entries.len(), 3);

    let report = service.import(9, "en", &entries).await.unwrap();
    assert_eq!(report.created, 2);
    assert_eq!(report.existing, 0);
    assert_eq!(report.failed.len(), 1);

    // Importing the same file again changes nothing
    let again = service.import(9, "en", &entries).await.unwrap();
    assert_eq!(again.created, 0);
    assert_eq!(again.existing, 2);

    assert_eq!(service.forget(9).await.unwrap(), 2);
    assert!(service.list(9).await.unwrap().is_empty());
    assert_eq!(service.stats().await.unwrap(), Stats { subscribers: 0, feeds: 2 });

    std::fs::remove_dir_all(&dir).ok();
}

// ============================================================================
// Operator messages
// ============================================================================

#[tokio::test]
async fn test_broadcast_and_feedback_through_outbox() {
    let (service, _, _) = setup(&[("https://news.example.com/rss", "News")]).await;
    let (outbox, mut rx) = OutboxDispatch::new(16);
    let service = service.with_messaging(Arc::new(TemplateRenderer::new()), Arc::new(outbox));

    service.subscribe(1, "https://news.example.com/rss", "en").await.unwrap();
    service.subscribe(2, "https://news.example.com/rss", "ru").await.unwrap();
    service.forget(2).await.unwrap();
    service.subscribe(3, "https://news.example.com/rss", "de").await.unwrap();

    let report = service.broadcast("New server tonight").await.unwrap();
    assert_eq!(report, NotifyReport { sent: 2, failed: 0 });

    service.feedback(3, "Danke!", 1).await.unwrap();

    let rejected = service.feedback(3, "", 1).await.unwrap_err();
    assert_eq!(rejected.downcast_ref::<MessageError>(), Some(&MessageError::Empty));

    drop(service);
    let mut sent = Vec::new();
    while let Some(message) = rx.recv().await {
        sent.push((message.subscriber_id, message.text));
    }
    assert_eq!(
        sent,
        vec![
            (1, "Announcement\n\nNew server tonight".to_string()),
            // No German templates, so English is used
            (3, "Announcement\n\nNew server tonight".to_string()),
            (1, "Feedback from subscriber 3\n\nDanke!".to_string()),
        ]
    );
}
