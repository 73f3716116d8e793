// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod cleanup;
pub mod clock;
pub mod config;
pub mod error;
pub mod hit;
pub mod ingest;
pub mod manifest;
pub mod matcher;
pub mod metrics;
pub mod notify;
pub mod processor;
pub mod sequencer;
pub mod stats;
pub mod store;
pub mod watch;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::ProcessorConfig;
pub use crate::hit::Hit;
pub use crate::notify::NotifierMux;
pub use crate::processor::FeedProcessor;
pub use crate::stats::ProcessingStats;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` wins over the default
/// filter; `LOG_FORMAT=json` switches to JSON lines. Safe to call twice.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("court_feed_processor=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
