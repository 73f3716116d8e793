// src/cleanup.rs
//! Periodic active expiry.
//!
//! The sweep is a snapshot-and-delete over the store followed by pruning the
//! sequencer's idempotency ledger. It never touches sequence numbers or
//! keyword counters; that is what manual cleanup is for.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::processor::Ledger;
use crate::stats::StatsCounters;
use crate::store::EphemeralStore;

/// Everything a sweep reads or writes.
#[derive(Clone)]
pub struct SweepTarget {
    pub store: Arc<dyn EphemeralStore>,
    pub ledger: Arc<Mutex<Ledger>>,
    pub stats: Arc<StatsCounters>,
    pub clock: Arc<dyn Clock>,
}

impl SweepTarget {
    /// Remove expired hits as of `now`. Returns how many hits went.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let removed = self.store.delete_expired(now)?;
        let forgotten = match self.ledger.lock() {
            Ok(mut ledger) => ledger.sequencer.forget_expired(now),
            Err(_) => {
                tracing::error!(target: "cleanup", "ledger mutex poisoned; idempotency entries kept");
                0
            }
        };
        self.stats.cleanup_ran(now, removed);
        tracing::info!(target: "cleanup", removed, forgotten, "expired hits swept");
        Ok(removed)
    }

    pub fn sweep(&self) -> Result<usize, StoreError> {
        self.sweep_at(self.clock.now())
    }
}

/// Background sweep on a fixed interval, cancellable through `stop`.
pub struct CleanupScheduler {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CleanupScheduler {
    /// The first sweep happens one full `every` after spawning.
    pub fn spawn(every: Duration, target: SweepTarget) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            tracing::info!(target: "cleanup", every_secs = every.as_secs(), "cleanup scheduler running");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = target.sweep() {
                            tracing::warn!(target: "cleanup", error = %e, "sweep failed");
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!(target: "cleanup", "cleanup scheduler stopped");
        });
        Self { stop_tx, task }
    }

    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(target: "cleanup", error = ?e, "cleanup task crashed");
        }
    }
}
