// tests/metrics.rs
//
// Installs the global Prometheus recorder, so it lives in its own test binary
// and only runs with `--features strict-metrics`.
#![cfg(feature = "strict-metrics")]

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use chrono::Utc;
use court_feed_processor::ingest::types::NormalizedItem;
use court_feed_processor::metrics::Metrics;
use court_feed_processor::{FeedProcessor, ProcessorConfig};

#[tokio::test]
async fn metrics_endpoint_contains_pipeline_series() {
    let metrics = Metrics::init(86_400).expect("recorder installs once");
    let config = ProcessorConfig {
        keywords: vec!["cyber".into()],
        ..Default::default()
    };
    let p = FeedProcessor::builder(config).build().unwrap();
    let it = NormalizedItem {
        source_tag: "doj".into(),
        url: "https://x.test/a".into(),
        title: "cyber".into(),
        body: String::new(),
        published_at: Utc::now(),
        external_id: "a".into(),
    };
    p.ingest(&it);
    p.ingest(&it);
    p.sweep_expired().unwrap();

    let resp = metrics
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    for series in [
        "hit_ttl_secs",
        "pipeline_hits_total",
        "pipeline_duplicates_total",
        "cleanup_last_run_ts",
    ] {
        assert!(text.contains(series), "missing {series} in:\n{text}");
    }
    assert!(text.contains(r#"keyword="cyber""#));
}
