// src/processor.rs
//! # Feed Processor
//!
//! The long-lived service object. It owns the watch registry, sequencer,
//! store, notifier and counters, and exposes the control surface used by the
//! HTTP layer.
//!
//! Data path: adapters -> bounded queue -> pipeline workers -> matcher ->
//! sequencer -> store -> notifier (spawned, never awaited by the pipeline).
//!
//! Lifecycle:
//! - `init` starts the cleanup timer (runs until `shutdown`),
//! - `start` / `stop` drive the feed adapters and pipeline workers and may be
//!   called repeatedly,
//! - `shutdown` stops everything.

use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::cleanup::{CleanupScheduler, SweepTarget};
use crate::clock::{Clock, SystemClock};
use crate::config::ProcessorConfig;
use crate::error::{FeedError, StoreError};
use crate::hit::Hit;
use crate::ingest::adapter::{FeedAdapter, FeedHealth};
use crate::ingest::providers::push::PushHandle;
use crate::ingest::types::{NormalizedItem, RawItem};
use crate::ingest::{build_adapter, normalize_item};
use crate::matcher::match_scoped;
use crate::notify::{FanoutReport, NotificationChannel, NotifierMux};
use crate::sequencer::{MatchEvent, Sequencer};
use crate::stats::{ProcessingStats, StatsCounters};
use crate::store::{EphemeralStore, HitFilter, MemoryStore};
use crate::watch::{WatchKeyword, WatchRegistry};

/// State that must change together: sequence numbers and the keyword
/// counters they imply.
#[derive(Debug)]
pub struct Ledger {
    pub registry: WatchRegistry,
    pub sequencer: Sequencer,
}

#[derive(Default)]
struct Runtime {
    adapters: Vec<FeedAdapter>,
    workers: Vec<JoinHandle<()>>,
    cleanup: Option<CleanupScheduler>,
}

pub struct FeedProcessor {
    config: ProcessorConfig,
    clock: Arc<dyn Clock>,
    ledger: Arc<Mutex<Ledger>>,
    store: Arc<dyn EphemeralStore>,
    notifier: NotifierMux,
    stats: Arc<StatsCounters>,
    /// source_tag -> lowercased keyword scope (only non-empty scopes).
    scopes: HashMap<String, BTreeSet<String>>,
    push_handles: HashMap<String, PushHandle>,
    feed_health: Vec<Arc<Mutex<FeedHealth>>>,
    running: AtomicBool,
    runtime: tokio::sync::Mutex<Runtime>,
    fanouts: Mutex<JoinSet<()>>,
}

pub struct FeedProcessorBuilder {
    config: ProcessorConfig,
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn EphemeralStore>>,
    notifier: Option<NotifierMux>,
    extra_channels: Vec<Arc<dyn NotificationChannel>>,
    adapters: Vec<FeedAdapter>,
    push_handles: Vec<PushHandle>,
}

impl FeedProcessorBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn store(mut self, store: Arc<dyn EphemeralStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the channels built from `config.channels`.
    pub fn notifier(mut self, notifier: NotifierMux) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn channel(mut self, ch: Arc<dyn NotificationChannel>) -> Self {
        self.extra_channels.push(ch);
        self
    }

    pub fn adapter(mut self, adapter: FeedAdapter) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn push_handle(mut self, handle: PushHandle) -> Self {
        self.push_handles.push(handle);
        self
    }

    /// Build an adapter for every entry in `config.feeds`.
    pub fn with_configured_feeds(mut self) -> Result<Self> {
        for feed in &self.config.feeds {
            let (adapter, handle) = build_adapter(feed)
                .with_context(|| format!("building feed `{}`", feed.source_tag))?;
            self.adapters.push(adapter);
            self.push_handles.extend(handle);
        }
        Ok(self)
    }

    pub fn build(self) -> Result<FeedProcessor> {
        self.config.validate()?;
        let config = self.config;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let store = match self.store {
            Some(s) => s,
            None => Arc::new(
                MemoryStore::new(Arc::clone(&clock)).with_capacity_limit(config.max_hits),
            ),
        };
        let mut notifier = match self.notifier {
            Some(n) => n,
            None => NotifierMux::from_configs(&config.channels, config.notify_timeout())?,
        };
        for ch in self.extra_channels {
            notifier = notifier.with_channel(ch);
        }

        let stats = Arc::new(StatsCounters::new());
        let mut registry = WatchRegistry::with_keywords(config.all_keywords());
        let mut scopes = HashMap::new();
        let mut adapters = self.adapters;
        let mut feed_health = Vec::with_capacity(adapters.len());
        for adapter in &mut adapters {
            adapter.attach_stats(Arc::clone(&stats));
            feed_health.push(adapter.health_cell());
            let source = adapter.source();
            for kw in &source.keywords {
                registry.add(kw);
            }
            let scope: BTreeSet<String> = source
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();
            if !scope.is_empty() {
                scopes.insert(source.source_tag.clone(), scope);
            }
        }

        let sequencer = Sequencer::new(&config.sequence, config.ttl(), clock.now());
        let push_handles = self
            .push_handles
            .into_iter()
            .map(|h| (h.source_tag().to_string(), h))
            .collect();

        tracing::info!(
            target: "pipeline",
            feeds = adapters.len(),
            keywords = registry.len(),
            channels = notifier.len(),
            ttl_secs = config.ttl_secs,
            "feed processor built"
        );

        Ok(FeedProcessor {
            config,
            clock,
            ledger: Arc::new(Mutex::new(Ledger {
                registry,
                sequencer,
            })),
            store,
            notifier,
            stats,
            scopes,
            push_handles,
            feed_health,
            running: AtomicBool::new(false),
            runtime: tokio::sync::Mutex::new(Runtime {
                adapters,
                ..Default::default()
            }),
            fanouts: Mutex::new(JoinSet::new()),
        })
    }
}

impl FeedProcessor {
    pub fn builder(config: ProcessorConfig) -> FeedProcessorBuilder {
        FeedProcessorBuilder {
            config,
            clock: None,
            store: None,
            notifier: None,
            extra_channels: Vec::new(),
            adapters: Vec::new(),
            push_handles: Vec::new(),
        }
    }

    /// Production wiring: feeds and channels straight from configuration.
    pub fn from_config(config: ProcessorConfig) -> Result<Self> {
        Self::builder(config).with_configured_feeds()?.build()
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ---- lifecycle ----

    /// Start the cleanup timer. Idempotent.
    pub async fn init(&self) {
        let mut rt = self.runtime.lock().await;
        if rt.cleanup.is_none() {
            rt.cleanup = Some(CleanupScheduler::spawn(
                self.config.cleanup_interval(),
                self.sweep_target(),
            ));
        }
    }

    /// Start every feed adapter and the pipeline workers. Returns how many
    /// adapters were started; 0 when already running.
    pub async fn start(self: &Arc<Self>) -> usize {
        let mut rt = self.runtime.lock().await;
        if self.running.swap(true, Ordering::SeqCst) {
            return 0;
        }

        let (tx, rx) = mpsc::channel::<NormalizedItem>(self.config.queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker in 0..self.config.pipeline_workers {
            let this = Arc::clone(self);
            let rx = Arc::clone(&rx);
            rt.workers.push(tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(item) = next else { break };
                    this.process_item(&item);
                }
                tracing::debug!(target: "pipeline", worker, "pipeline worker exited");
            }));
        }

        let mut started = 0;
        for adapter in rt.adapters.iter_mut() {
            if adapter.start(tx.clone()) {
                self.stats.feed_started();
                started += 1;
            }
        }
        tracing::info!(target: "pipeline", started, workers = self.config.pipeline_workers, "processor started");
        started
    }

    /// Stop the adapters, then let the workers drain the queue. No item is
    /// emitted by any adapter after this returns.
    pub async fn stop(&self) {
        let mut rt = self.runtime.lock().await;
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        for adapter in rt.adapters.iter_mut() {
            adapter.stop().await;
        }
        // Every sender lived in an adapter task, so the workers see the
        // queue close once it is drained.
        for worker in rt.workers.drain(..) {
            if let Err(e) = worker.await {
                tracing::error!(target: "pipeline", error = ?e, "pipeline worker crashed");
            }
        }
        self.running.store(false, Ordering::SeqCst);
        tracing::info!(target: "pipeline", "processor stopped");
    }

    /// `stop`, then wait for in-flight notifications, then stop the
    /// cleanup timer.
    pub async fn shutdown(&self) {
        self.stop().await;
        let drained = self.drain_notifications().await;
        if drained > 0 {
            tracing::info!(target: "notify", drained, "in-flight notifications finished");
        }
        let cleanup = self.runtime.lock().await.cleanup.take();
        if let Some(c) = cleanup {
            c.stop().await;
        }
    }

    // ---- pipeline ----

    /// Match, sequence and store one item. Returns the hits that were
    /// stored; nothing is notified.
    pub fn ingest(&self, item: &NormalizedItem) -> Vec<Hit> {
        self.stats.item_received();
        let now = self.clock.now();

        // Store writes happen under the ledger lock so a concurrent manual
        // cleanup either sees these hits or runs entirely after them.
        let (stored, checkpoint) = {
            let Ok(mut guard) = self.ledger.lock() else {
                tracing::error!(target: "pipeline", source = %item.source_tag, id = %item.external_id, "ledger mutex poisoned; item skipped");
                return Vec::new();
            };
            let ledger = &mut *guard;
            let keywords = match_scoped(item, &ledger.registry, self.scopes.get(&item.source_tag));
            let mut stored = Vec::with_capacity(keywords.len());
            for keyword in &keywords {
                let event = MatchEvent { item, keyword };
                let Some(hit) = ledger.sequencer.assign(event, &mut ledger.registry, now) else {
                    tracing::debug!(target: "pipeline", source = %item.source_tag, id = %item.external_id, keyword = %keyword, "duplicate match suppressed");
                    self.stats.duplicate();
                    continue;
                };
                match self.store.put(hit.clone()) {
                    Ok(()) => {
                        self.stats.hit_stored(&hit.keyword);
                        tracing::info!(
                            target: "pipeline",
                            hit_id = %hit.id,
                            keyword = %hit.keyword,
                            source = %hit.source_tag,
                            content_hash = %hit.manifest.content_hash,
                            "hit stored"
                        );
                        stored.push(hit);
                    }
                    Err(e) => {
                        tracing::warn!(target: "pipeline", hit_id = %hit.id, error = %e, "hit lost: store rejected it");
                        self.stats.hit_lost();
                    }
                }
            }
            let checkpoint = if keywords.is_empty() {
                None
            } else {
                ledger.sequencer.checkpoint()
            };
            (stored, checkpoint)
        };

        if let Some(cp) = checkpoint {
            cp.save();
        }
        stored
    }

    /// `ingest` followed by a tracked fan-out of each stored hit. Must run
    /// inside a tokio runtime.
    pub fn process_item(&self, item: &NormalizedItem) -> Vec<Hit> {
        let stored = self.ingest(item);
        if !self.notifier.is_empty() {
            for hit in &stored {
                let notifier = self.notifier.clone();
                let stats = Arc::clone(&self.stats);
                let hit = hit.clone();
                self.track_fanout(async move {
                    let report = notifier.notify(&hit).await;
                    record_fanout(&stats, &report);
                });
            }
        }
        stored
    }

    fn track_fanout<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let Ok(mut fanouts) = self.fanouts.lock() else {
            tracing::error!(target: "notify", "fan-out set poisoned; notification dropped");
            return;
        };
        // Reap finished sends so the set only holds in-flight work.
        while let Some(done) = fanouts.try_join_next() {
            if let Err(e) = done {
                tracing::error!(target: "notify", error = ?e, "fan-out task panicked");
            }
        }
        fanouts.spawn(fut);
    }

    /// Wait for every in-flight fan-out. Each send is bounded by the
    /// notifier timeout.
    pub async fn drain_notifications(&self) -> usize {
        let mut pending = match self.fanouts.lock() {
            Ok(mut f) => std::mem::take(&mut *f),
            Err(_) => return 0,
        };
        let mut drained = 0;
        while let Some(done) = pending.join_next().await {
            drained += 1;
            if let Err(e) = done {
                tracing::error!(target: "notify", error = ?e, "fan-out task panicked");
            }
        }
        drained
    }

    /// Fan one hit out and wait for every channel to finish or time out.
    pub async fn deliver(&self, hit: &Hit) -> FanoutReport {
        let report = self.notifier.notify(hit).await;
        record_fanout(&self.stats, &report);
        report
    }

    /// Hand a raw item to a push-mode feed.
    pub fn push(&self, source_tag: &str, item: RawItem) -> Result<(), FeedError> {
        let handle = self
            .push_handles
            .get(source_tag)
            .ok_or_else(|| FeedError::connection(source_tag, "no push feed with this tag"))?;
        handle.try_push(item)
    }

    pub fn has_push_feed(&self, source_tag: &str) -> bool {
        self.push_handles.contains_key(source_tag)
    }

    /// Normalize and process a raw item directly, bypassing any adapter.
    pub fn submit_raw(&self, source_tag: &str, raw: RawItem) -> Result<Vec<Hit>, FeedError> {
        let item = normalize_item(source_tag, raw, self.clock.now()).inspect_err(|e| {
            tracing::warn!(target: "ingest", source = source_tag, error = %e, "malformed item dropped");
            self.stats.malformed();
        })?;
        Ok(self.process_item(&item))
    }

    // ---- control surface ----

    /// Flip a keyword's enabled flag. `None` when it is not registered.
    pub fn toggle_keyword(&self, keyword: &str) -> Option<bool> {
        let enabled = self.ledger.lock().ok()?.registry.toggle(keyword);
        if let Some(enabled) = enabled {
            tracing::info!(target: "pipeline", keyword, enabled, "keyword toggled");
        }
        enabled
    }

    /// Register a new enabled keyword. `false` if it was already present.
    pub fn add_keyword(&self, keyword: &str) -> bool {
        let added = self
            .ledger
            .lock()
            .map(|mut l| l.registry.add(keyword))
            .unwrap_or(false);
        if added {
            tracing::info!(target: "pipeline", keyword, "keyword added");
        }
        added
    }

    pub fn get_watch_keywords(&self) -> Vec<WatchKeyword> {
        self.ledger
            .lock()
            .map(|l| l.registry.snapshot())
            .unwrap_or_default()
    }

    /// Clear every hit regardless of expiry, restart the daily sequence,
    /// zero keyword counters and aggregate stats. Enabled flags survive.
    pub fn manual_cleanup(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let (removed, checkpoint) = {
            let mut ledger = self.ledger.lock().map_err(|_| StoreError::LockPoisoned)?;
            let removed = self.store.clear_all()?;
            ledger.sequencer.reset(now);
            ledger.registry.reset_counters();
            self.stats.reset(now);
            (removed, ledger.sequencer.checkpoint())
        };
        if let Some(cp) = checkpoint {
            cp.save();
        }
        tracing::warn!(target: "cleanup", removed, "manual cleanup: store cleared and sequence reset");
        Ok(removed)
    }

    /// Run one expiry sweep now, outside the timer.
    pub fn sweep_expired(&self) -> Result<usize, StoreError> {
        self.sweep_target().sweep()
    }

    pub fn get_stats(&self) -> ProcessingStats {
        let active = self.store.live_count().unwrap_or_else(|e| {
            tracing::warn!(target: "pipeline", error = %e, "live count unavailable");
            0
        });
        let feeds = self
            .feed_health
            .iter()
            .filter_map(|h| h.lock().ok().map(|h| h.clone()))
            .collect();
        self.stats.snapshot(active, feeds)
    }

    /// Up to `n` live hits, newest first.
    pub fn get_recent_hits(&self, n: usize) -> Vec<Hit> {
        self.list_hits(&HitFilter::recent(n)).unwrap_or_else(|e| {
            tracing::warn!(target: "pipeline", error = %e, "listing hits failed");
            Vec::new()
        })
    }

    pub fn list_hits(&self, filter: &HitFilter) -> Result<Vec<Hit>, StoreError> {
        self.store.list(filter)
    }

    fn sweep_target(&self) -> SweepTarget {
        SweepTarget {
            store: Arc::clone(&self.store),
            ledger: Arc::clone(&self.ledger),
            stats: Arc::clone(&self.stats),
            clock: Arc::clone(&self.clock),
        }
    }
}

fn record_fanout(stats: &StatsCounters, report: &FanoutReport) {
    for ch in &report.delivered {
        stats.notification_sent(ch);
    }
    for (ch, _) in &report.failed {
        stats.notification_failed(ch);
    }
}
