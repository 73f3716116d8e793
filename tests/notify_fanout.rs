// tests/notify_fanout.rs
//
// Fan-out from the processor: failures are counted per channel, never
// retried, and never hold up the other channels or the pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use court_feed_processor::error::NotifyError;
use court_feed_processor::ingest::types::NormalizedItem;
use court_feed_processor::notify::{Notification, NotificationChannel, NotifierMux};
use court_feed_processor::{FeedProcessor, ProcessorConfig};

#[derive(Default)]
struct Recording {
    seen: Mutex<Vec<Notification>>,
}

#[async_trait::async_trait]
impl NotificationChannel for Recording {
    fn name(&self) -> &str {
        "recording"
    }
    async fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        self.seen.lock().unwrap().push(n.clone());
        Ok(())
    }
}

struct Failing {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl NotificationChannel for Failing {
    fn name(&self) -> &str {
        "failing"
    }
    async fn send(&self, _n: &Notification) -> Result<(), NotifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(NotifyError::Transport {
            channel: "failing".into(),
            message: "connection reset".into(),
        })
    }
}

struct Hanging;

#[async_trait::async_trait]
impl NotificationChannel for Hanging {
    fn name(&self) -> &str {
        "hanging"
    }
    async fn send(&self, _n: &Notification) -> Result<(), NotifyError> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(())
    }
}

fn item(id: &str) -> NormalizedItem {
    NormalizedItem {
        source_tag: "doj".into(),
        url: format!("https://www.justice.gov/opa/pr/{id}"),
        title: "Hacker sentenced".into(),
        body: "Federal case involves cyber intrusion".into(),
        published_at: Utc::now(),
        external_id: id.into(),
    }
}

#[tokio::test]
async fn one_failing_channel_does_not_stop_the_others() {
    let recording = Arc::new(Recording::default());
    let failing = Arc::new(Failing {
        calls: AtomicUsize::new(0),
    });
    let mux = NotifierMux::new(Duration::from_millis(100))
        .with_channel(failing.clone())
        .with_channel(Arc::new(Hanging))
        .with_channel(recording.clone());
    let config = ProcessorConfig {
        keywords: vec!["cyber".into()],
        ..Default::default()
    };
    let p = FeedProcessor::builder(config).notifier(mux).build().unwrap();

    let hits = p.ingest(&item("pr-1"));
    assert_eq!(hits.len(), 1);
    let report = p.deliver(&hits[0]).await;

    assert_eq!(report.delivered, vec!["recording".to_string()]);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(failing.calls.load(Ordering::SeqCst), 1, "no retry");

    let seen = recording.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].title, "[cyber] Hacker sentenced");
    assert_eq!(seen[0].link, "https://www.justice.gov/opa/pr/pr-1");
    assert!(seen[0].body.contains("Classification: EPHEMERAL_STREAM_DATA"));

    let stats = p.get_stats();
    assert_eq!(stats.notifications_sent, 1);
    assert_eq!(stats.notifications_failed, 2);
}

#[tokio::test]
async fn process_item_returns_before_slow_channels_finish() {
    let recording = Arc::new(Recording::default());
    let mux = NotifierMux::new(Duration::from_secs(30))
        .with_channel(Arc::new(Hanging))
        .with_channel(recording.clone());
    let config = ProcessorConfig {
        keywords: vec!["cyber".into()],
        ..Default::default()
    };
    let p = FeedProcessor::builder(config).notifier(mux).build().unwrap();

    let started = std::time::Instant::now();
    let hits = p.process_item(&item("pr-2"));
    assert_eq!(hits.len(), 1);
    assert!(started.elapsed() < Duration::from_secs(1));

    for _ in 0..100 {
        if p.get_stats().notifications_sent == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(p.get_stats().notifications_sent, 1);
    assert_eq!(recording.seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn hit_rejected_by_full_store_is_never_notified() {
    let recording = Arc::new(Recording::default());
    let config = ProcessorConfig {
        keywords: vec!["cyber".into()],
        max_hits: Some(1),
        ..Default::default()
    };
    let p = FeedProcessor::builder(config)
        .notifier(NotifierMux::new(Duration::from_secs(5)).with_channel(recording.clone()))
        .build()
        .unwrap();

    assert_eq!(p.process_item(&item("pr-a")).len(), 1);
    assert!(p.process_item(&item("pr-b")).is_empty());
    p.drain_notifications().await;

    let seen = recording.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].link, "https://www.justice.gov/opa/pr/pr-a");
    let stats = p.get_stats();
    assert_eq!(stats.notifications_sent, 1);
    assert_eq!(stats.hits_lost, 1);
}

struct Slow {
    delay: Duration,
    done: AtomicUsize,
}

#[async_trait::async_trait]
impl NotificationChannel for Slow {
    fn name(&self) -> &str {
        "slow"
    }
    async fn send(&self, _n: &Notification) -> Result<(), NotifyError> {
        tokio::time::sleep(self.delay).await;
        self.done.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_notifications() {
    let slow = Arc::new(Slow {
        delay: Duration::from_millis(100),
        done: AtomicUsize::new(0),
    });
    let config = ProcessorConfig {
        keywords: vec!["cyber".into()],
        ..Default::default()
    };
    let p = FeedProcessor::builder(config)
        .notifier(NotifierMux::new(Duration::from_secs(5)).with_channel(slow.clone()))
        .build()
        .unwrap();

    assert_eq!(p.process_item(&item("pr-1")).len(), 1);
    assert_eq!(p.process_item(&item("pr-2")).len(), 1);
    assert_eq!(slow.done.load(Ordering::SeqCst), 0);

    p.shutdown().await;
    assert_eq!(slow.done.load(Ordering::SeqCst), 2);
    assert_eq!(p.get_stats().notifications_sent, 2);
}
