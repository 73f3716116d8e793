//! Court Feed Processor — Binary Entrypoint
//! Boots the feed processor and serves its control surface over Axum.

use std::sync::Arc;

use anyhow::Context;
use court_feed_processor::{config, init_tracing, metrics::Metrics, router, FeedProcessor};
use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = config::load_default().context("loading processor config")?;
    let ttl_secs = cfg.ttl_secs;
    let processor = Arc::new(FeedProcessor::from_config(cfg).context("building feed processor")?);

    processor.init().await;
    let started = processor.start().await;
    tracing::info!(started, "feed processor running");

    let mut app = router(Arc::clone(&processor));
    match Metrics::init(ttl_secs) {
        Ok(m) => app = app.merge(m.router()),
        Err(e) => tracing::warn!(error = ?e, "metrics disabled"),
    }

    Ok(app.into())
}
