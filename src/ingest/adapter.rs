// src/ingest/adapter.rs
//! One adapter per feed: drives the provider's native acquisition loop on its
//! own task, normalizes payloads, and pushes items into the pipeline queue.
//!
//! Failure isolation:
//! - transient errors back off exponentially and never leave the task,
//! - malformed items are dropped and counted,
//! - `stop()` joins the task, so nothing is emitted after it returns.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::BackoffConfig;
use crate::error::FeedError;
use crate::ingest::types::{
    Acquisition, FeedMode, FeedSource, NormalizedItem, PollProvider, RawItem, StreamProvider,
};
use crate::ingest::{ensure_metrics_described, normalize_item};
use crate::stats::StatsCounters;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FeedHealth {
    pub source_tag: String,
    pub mode: FeedMode,
    pub status: HealthStatus,
    pub running: bool,
    pub consecutive_failures: u32,
    pub items_emitted: u64,
    pub malformed_dropped: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl FeedHealth {
    fn new(source: &FeedSource) -> Self {
        Self {
            source_tag: source.source_tag.clone(),
            mode: source.mode,
            status: HealthStatus::Up,
            running: false,
            consecutive_failures: 0,
            items_emitted: 0,
            malformed_dropped: 0,
            last_success: None,
            last_error: None,
        }
    }
}

struct Running {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<Acquisition>,
}

pub struct FeedAdapter {
    source: FeedSource,
    acquisition: Option<Acquisition>,
    backoff: BackoffConfig,
    request_timeout: Duration,
    health: Arc<Mutex<FeedHealth>>,
    stats: Option<Arc<StatsCounters>>,
    running: Option<Running>,
}

impl FeedAdapter {
    pub fn new(source: FeedSource, acquisition: Acquisition, backoff: BackoffConfig) -> Self {
        let health = Arc::new(Mutex::new(FeedHealth::new(&source)));
        Self {
            source,
            acquisition: Some(acquisition),
            backoff,
            request_timeout: Duration::from_secs(30),
            health,
            stats: None,
            running: None,
        }
    }

    /// Report malformed drops into the shared pipeline counters too.
    pub fn attach_stats(&mut self, stats: Arc<StatsCounters>) {
        self.stats = Some(stats);
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn source(&self) -> &FeedSource {
        &self.source
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn health(&self) -> FeedHealth {
        match self.health.lock() {
            Ok(h) => h.clone(),
            Err(_) => {
                tracing::error!(target: "ingest", source = %self.source.source_tag, "feed health mutex poisoned");
                FeedHealth::new(&self.source)
            }
        }
    }

    /// Shared view of the health record, readable while the adapter is
    /// borrowed elsewhere.
    pub(crate) fn health_cell(&self) -> Arc<Mutex<FeedHealth>> {
        Arc::clone(&self.health)
    }

    /// Spawn the acquisition loop. Returns `false` if already running or the
    /// provider was lost to a crashed task.
    pub fn start(&mut self, tx: mpsc::Sender<NormalizedItem>) -> bool {
        if self.running.is_some() {
            return false;
        }
        let Some(acquisition) = self.acquisition.take() else {
            tracing::error!(target: "ingest", source = %self.source.source_tag, "provider unavailable; adapter cannot restart");
            return false;
        };
        ensure_metrics_described();

        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = Emitter {
            source: self.source.clone(),
            tx,
            stop: stop_rx,
            health: Arc::clone(&self.health),
            stats: self.stats.clone(),
            failure_threshold: self.backoff.failure_threshold.max(1),
        };
        let backoff = self.backoff;
        let request_timeout = self.request_timeout;

        update_health(&self.health, &self.source.source_tag, |h| h.running = true);
        tracing::info!(target: "ingest", source = %self.source.source_tag, mode = ?self.source.mode, "feed adapter started");

        let task = tokio::spawn(async move {
            let mut ctx = ctx;
            match acquisition {
                Acquisition::Poll(p) => {
                    run_poll(p.as_ref(), &mut ctx, backoff, request_timeout).await;
                    Acquisition::Poll(p)
                }
                Acquisition::Stream(mut s) => {
                    run_stream(s.as_mut(), &mut ctx, backoff, request_timeout).await;
                    Acquisition::Stream(s)
                }
            }
        });
        self.running = Some(Running { stop_tx, task });
        true
    }

    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.stop_tx.send(true);
        match running.task.await {
            Ok(acq) => self.acquisition = Some(acq),
            Err(e) => {
                tracing::error!(target: "ingest", source = %self.source.source_tag, error = ?e, "feed task crashed")
            }
        }
        update_health(&self.health, &self.source.source_tag, |h| h.running = false);
        tracing::info!(target: "ingest", source = %self.source.source_tag, "feed adapter stopped");
    }
}

struct Emitter {
    source: FeedSource,
    tx: mpsc::Sender<NormalizedItem>,
    stop: watch::Receiver<bool>,
    health: Arc<Mutex<FeedHealth>>,
    stats: Option<Arc<StatsCounters>>,
    failure_threshold: u32,
}

impl Emitter {
    fn tag(&self) -> &str {
        &self.source.source_tag
    }

    fn stopping(&self) -> bool {
        *self.stop.borrow()
    }

    /// Resolves once stop was requested (or the controller went away).
    async fn stopped(&mut self) {
        while !*self.stop.borrow() {
            if self.stop.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `d` unless stop arrives first. Returns `false` on stop.
    async fn pause(&mut self, d: Duration) -> bool {
        tokio::select! {
            _ = self.stopped() => false,
            _ = tokio::time::sleep(d) => true,
        }
    }

    fn record_success(&self) {
        update_health(&self.health, self.tag(), |h| {
            if h.status == HealthStatus::Down {
                tracing::info!(target: "ingest", source = %h.source_tag, "feed recovered");
            }
            h.status = HealthStatus::Up;
            h.consecutive_failures = 0;
            h.last_success = Some(Utc::now());
        });
        gauge!("feed_up", "source" => self.tag().to_string()).set(1.0);
    }

    fn record_failure(&self, err: &FeedError) {
        counter!("feed_errors_total", "source" => self.tag().to_string()).increment(1);
        let threshold = self.failure_threshold;
        update_health(&self.health, self.tag(), |h| {
            h.consecutive_failures = h.consecutive_failures.saturating_add(1);
            h.last_error = Some(err.to_string());
            if h.consecutive_failures >= threshold && h.status == HealthStatus::Up {
                h.status = HealthStatus::Down;
                gauge!("feed_up", "source" => h.source_tag.clone()).set(0.0);
                tracing::error!(target: "ingest", source = %h.source_tag, failures = h.consecutive_failures, error = %err, "feed marked down");
            } else {
                tracing::warn!(target: "ingest", source = %h.source_tag, failures = h.consecutive_failures, error = %err, "feed error");
            }
        });
    }

    fn record_malformed(&self, err: &FeedError) {
        tracing::warn!(target: "ingest", source = %self.tag(), error = %err, "dropping malformed item");
        counter!("feed_malformed_total", "source" => self.tag().to_string()).increment(1);
        if let Some(stats) = &self.stats {
            stats.malformed();
        }
        update_health(&self.health, self.tag(), |h| h.malformed_dropped += 1);
    }

    /// Normalize and enqueue one payload. Returns `false` when the adapter
    /// must stop (stop requested or pipeline gone).
    async fn emit(&mut self, raw: RawItem) -> bool {
        if self.stopping() {
            return false;
        }
        let item = match normalize_item(self.tag(), raw, Utc::now()) {
            Ok(item) => item,
            Err(e) => {
                self.record_malformed(&e);
                return true;
            }
        };
        let tx = self.tx.clone();
        let sent = tokio::select! {
            biased;
            _ = self.stopped() => return false,
            r = tx.send(item) => r.is_ok(),
        };
        if !sent {
            tracing::debug!(target: "ingest", source = %self.tag(), "pipeline closed");
            return false;
        }
        counter!("feed_items_total", "source" => self.tag().to_string()).increment(1);
        update_health(&self.health, self.tag(), |h| h.items_emitted += 1);
        true
    }
}

/// Apply `f` to the health record. A poisoned record is logged and left alone;
/// health bookkeeping never stops the feed.
fn update_health(cell: &Mutex<FeedHealth>, source: &str, f: impl FnOnce(&mut FeedHealth)) {
    match cell.lock() {
        Ok(mut h) => f(&mut h),
        Err(_) => tracing::error!(target: "ingest", source, "feed health mutex poisoned; update skipped"),
    }
}

async fn run_poll(
    provider: &dyn PollProvider,
    ctx: &mut Emitter,
    backoff_cfg: BackoffConfig,
    request_timeout: Duration,
) {
    let mut backoff = backoff_cfg.policy();
    loop {
        if ctx.stopping() {
            return;
        }
        let t0 = std::time::Instant::now();
        let fetched = tokio::select! {
            _ = ctx.stopped() => return,
            r = tokio::time::timeout(request_timeout, provider.fetch_latest()) => r,
        };
        let wait = match fetched {
            Ok(Ok(mut raws)) => {
                histogram!("feed_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
                ctx.record_success();
                backoff.reset();
                raws.truncate(ctx.source.batch_size);
                tracing::debug!(target: "ingest", source = %ctx.tag(), items = raws.len(), "poll cycle");
                for raw in raws {
                    if !ctx.emit(raw).await {
                        return;
                    }
                }
                ctx.source.interval
            }
            Ok(Err(e)) => {
                ctx.record_failure(&e);
                backoff.next_delay()
            }
            Err(_) => {
                ctx.record_failure(&FeedError::Timeout {
                    source_tag: ctx.tag().to_string(),
                    after: request_timeout,
                });
                backoff.next_delay()
            }
        };
        if !ctx.pause(wait).await {
            return;
        }
    }
}

async fn run_stream(
    provider: &mut dyn StreamProvider,
    ctx: &mut Emitter,
    backoff_cfg: BackoffConfig,
    connect_timeout: Duration,
) {
    let mut backoff = backoff_cfg.policy();
    loop {
        let connected = tokio::select! {
            _ = ctx.stopped() => return,
            r = tokio::time::timeout(connect_timeout, provider.connect()) => r,
        };
        match connected {
            Ok(Ok(())) => {
                ctx.record_success();
                backoff.reset();
                // Read until the subscription breaks.
                loop {
                    let next = tokio::select! {
                        _ = ctx.stopped() => return,
                        n = provider.next_item() => n,
                    };
                    match next {
                        Some(Ok(raw)) => {
                            if !ctx.emit(raw).await {
                                return;
                            }
                        }
                        Some(Err(e)) if !e.is_transient() => ctx.record_malformed(&e),
                        Some(Err(e)) => {
                            ctx.record_failure(&e);
                            break;
                        }
                        None => {
                            ctx.record_failure(&FeedError::connection(ctx.tag(), "stream closed"));
                            break;
                        }
                    }
                }
            }
            Ok(Err(e)) => ctx.record_failure(&e),
            Err(_) => ctx.record_failure(&FeedError::Timeout {
                source_tag: ctx.tag().to_string(),
                after: connect_timeout,
            }),
        }
        if !ctx.pause(backoff.next_delay()).await {
            return;
        }
    }
}
