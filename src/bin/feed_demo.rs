//! Demo that runs the bundled DOJ fixture through the whole pipeline with the
//! log channel only, then prints stats and the live hits.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use court_feed_processor::config::BackoffConfig;
use court_feed_processor::ingest::adapter::FeedAdapter;
use court_feed_processor::ingest::providers::rss::RssProvider;
use court_feed_processor::ingest::types::{Acquisition, FeedMode, FeedSource};
use court_feed_processor::notify::log::LogChannel;
use court_feed_processor::{init_tracing, FeedProcessor, ProcessorConfig};

const DOJ_XML: &str = include_str!("../../tests/fixtures/doj_rss.xml");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let source = FeedSource {
        source_tag: "doj".into(),
        mode: FeedMode::Poll,
        interval: Duration::from_secs(60),
        batch_size: 50,
        keywords: BTreeSet::new(),
    };
    let adapter = FeedAdapter::new(
        source,
        Acquisition::Poll(Box::new(RssProvider::from_fixture("doj", DOJ_XML))),
        BackoffConfig::default(),
    );

    let config = ProcessorConfig {
        keywords: vec!["cyber".into(), "corruption".into(), "antitrust".into()],
        ..Default::default()
    };
    let processor = Arc::new(
        FeedProcessor::builder(config)
            .adapter(adapter)
            .channel(Arc::new(LogChannel))
            .build()?,
    );

    processor.init().await;
    processor.start().await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    processor.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&processor.get_stats())?);
    for hit in processor.get_recent_hits(10) {
        println!("\n{} [{}] {}\n{}", hit.id, hit.keyword, hit.title, hit.manifest);
    }
    println!("feed-demo done");
    Ok(())
}
