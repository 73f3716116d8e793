// tests/store_expiry.rs
//
// Lazy and active expiry of the ephemeral store, with a manual clock.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use court_feed_processor::clock::{Clock, ManualClock};
use court_feed_processor::error::StoreError;
use court_feed_processor::ingest::types::NormalizedItem;
use court_feed_processor::manifest::ManifestHeader;
use court_feed_processor::store::{EphemeralStore, HitFilter, MemoryStore};
use court_feed_processor::{FeedProcessor, Hit, ProcessorConfig};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap()
}

fn hit(seq: u32, keyword: &str, source: &str, created: DateTime<Utc>) -> Hit {
    let ttl = Duration::hours(24);
    let id = format!("20250304-{seq:04}");
    Hit {
        id: id.clone(),
        daily_sequence: seq,
        keyword: keyword.into(),
        source_tag: source.into(),
        source_url: format!("https://feeds.test/{seq}"),
        external_id: format!("x{seq}"),
        title: "t".into(),
        snippet: "s".into(),
        manifest: ManifestHeader::new(source, &format!("x{seq}"), "text", &id, created, ttl, ""),
        created_at: created,
        expires_at: created + ttl,
    }
}

#[test]
fn put_then_list_then_lazy_expiry_without_sweep() {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = MemoryStore::new(clock.clone());
    let h = hit(1, "cyber", "doj", clock.now());
    store.put(h.clone()).unwrap();

    assert_eq!(store.list(&HitFilter::default()).unwrap(), vec![h.clone()]);

    clock.set(h.expires_at);
    assert!(store.list(&HitFilter::default()).unwrap().is_empty());
    assert_eq!(store.live_count().unwrap(), 0);
    // Still physically present until a sweep runs.
    assert_eq!(store.raw_len(), 1);

    assert_eq!(store.delete_expired(clock.now()).unwrap(), 1);
    assert_eq!(store.raw_len(), 0);
}

#[test]
fn put_is_idempotent_on_id() {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = MemoryStore::new(clock.clone());
    let h = hit(1, "cyber", "doj", t0());
    store.put(h.clone()).unwrap();
    store.put(h).unwrap();
    assert_eq!(store.live_count().unwrap(), 1);
}

#[test]
fn filters_by_keyword_and_source() {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = MemoryStore::new(clock.clone());
    store.put(hit(1, "cyber", "doj", t0())).unwrap();
    store.put(hit(2, "corruption", "doj", t0())).unwrap();
    store.put(hit(3, "cyber", "courtlistener", t0())).unwrap();

    let cyber = HitFilter {
        keyword: Some("CYBER".into()),
        ..Default::default()
    };
    assert_eq!(store.list(&cyber).unwrap().len(), 2);

    let doj_cyber = HitFilter {
        keyword: Some("cyber".into()),
        source_tag: Some("doj".into()),
        limit: None,
    };
    let got = store.list(&doj_cyber).unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].daily_sequence, 1);
}

#[test]
fn capacity_limit_reclaims_expired_before_refusing() {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = MemoryStore::new(clock.clone()).with_capacity_limit(Some(2));
    store.put(hit(1, "cyber", "doj", t0())).unwrap();
    store.put(hit(2, "cyber", "doj", t0())).unwrap();
    assert_eq!(
        store.put(hit(3, "cyber", "doj", t0())),
        Err(StoreError::CapacityExceeded { max: 2 })
    );

    clock.advance(Duration::hours(25));
    store.put(hit(4, "cyber", "doj", clock.now())).unwrap();
    assert_eq!(store.live_count().unwrap(), 1);
}

#[test]
fn processor_counts_lost_hits_when_store_is_full() {
    let clock = Arc::new(ManualClock::new(t0()));
    let config = ProcessorConfig {
        keywords: vec!["cyber".into()],
        max_hits: Some(1),
        ..Default::default()
    };
    let p = FeedProcessor::builder(config)
        .clock(clock.clone())
        .build()
        .unwrap();

    let item = |id: &str| NormalizedItem {
        source_tag: "doj".into(),
        url: format!("https://feeds.test/{id}"),
        title: "cyber".into(),
        body: String::new(),
        published_at: t0(),
        external_id: id.into(),
    };
    assert_eq!(p.ingest(&item("a")).len(), 1);
    assert!(p.ingest(&item("b")).is_empty());

    let stats = p.get_stats();
    assert_eq!(stats.hits_found, 1);
    assert_eq!(stats.hits_lost, 1);
}

#[test]
fn sweep_removes_expired_and_allows_rematch() {
    let clock = Arc::new(ManualClock::new(t0()));
    let config = ProcessorConfig {
        keywords: vec!["cyber".into()],
        ttl_secs: 3600,
        ..Default::default()
    };
    let p = FeedProcessor::builder(config)
        .clock(clock.clone())
        .build()
        .unwrap();
    let it = NormalizedItem {
        source_tag: "doj".into(),
        url: "https://feeds.test/a".into(),
        title: "cyber".into(),
        body: String::new(),
        published_at: t0(),
        external_id: "a".into(),
    };
    assert_eq!(p.ingest(&it).len(), 1);

    clock.advance(Duration::hours(1));
    assert_eq!(p.sweep_expired().unwrap(), 1);
    let stats = p.get_stats();
    assert_eq!(stats.expired_swept, 1);
    assert_eq!(stats.last_cleanup, Some(clock.now()));

    // Sequence keeps counting; only the idempotency entry was forgotten.
    let again = p.ingest(&it);
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].daily_sequence, 2);
}
