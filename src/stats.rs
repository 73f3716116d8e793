// src/stats.rs
//! Aggregate pipeline counters. Every stage bumps these; only manual cleanup
//! resets them. Each bump is mirrored into a Prometheus series.

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::ingest::adapter::FeedHealth;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_hits_total", "Hits stored by the pipeline.");
        describe_counter!(
            "pipeline_duplicates_total",
            "Match events suppressed as already-seen (external id, keyword) pairs."
        );
        describe_counter!("store_lost_total", "Hits that failed to store.");
        describe_counter!("notify_sent_total", "Successful channel deliveries.");
        describe_counter!("notify_failed_total", "Failed channel deliveries.");
        describe_counter!("cleanup_expired_total", "Hits removed by the sweep.");
        describe_gauge!("cleanup_last_run_ts", "Unix ts of the last cleanup.");
    });
}

/// Snapshot returned to the control surface.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProcessingStats {
    pub feeds_started: u64,
    pub hits_found: u64,
    pub notifications_sent: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
    pub items_received: u64,
    pub malformed_dropped: u64,
    pub duplicates_suppressed: u64,
    pub hits_lost: u64,
    pub notifications_failed: u64,
    pub expired_swept: u64,
    pub active_hits: usize,
    pub feeds: Vec<FeedHealth>,
}

#[derive(Debug, Default)]
pub struct StatsCounters {
    feeds_started: AtomicU64,
    hits_found: AtomicU64,
    notifications_sent: AtomicU64,
    items_received: AtomicU64,
    malformed_dropped: AtomicU64,
    duplicates_suppressed: AtomicU64,
    hits_lost: AtomicU64,
    notifications_failed: AtomicU64,
    expired_swept: AtomicU64,
    last_cleanup: Mutex<Option<DateTime<Utc>>>,
}

impl StatsCounters {
    pub fn new() -> Self {
        ensure_metrics_described();
        Self::default()
    }

    pub fn feed_started(&self) {
        self.feeds_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn item_received(&self) {
        self.items_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed(&self) {
        self.malformed_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hit_stored(&self, keyword: &str) {
        self.hits_found.fetch_add(1, Ordering::Relaxed);
        counter!("pipeline_hits_total", "keyword" => keyword.to_string()).increment(1);
    }

    pub fn duplicate(&self) {
        self.duplicates_suppressed.fetch_add(1, Ordering::Relaxed);
        counter!("pipeline_duplicates_total").increment(1);
    }

    pub fn hit_lost(&self) {
        self.hits_lost.fetch_add(1, Ordering::Relaxed);
        counter!("store_lost_total").increment(1);
    }

    pub fn notification_sent(&self, channel: &str) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
        counter!("notify_sent_total", "channel" => channel.to_string()).increment(1);
    }

    pub fn notification_failed(&self, channel: &str) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
        counter!("notify_failed_total", "channel" => channel.to_string()).increment(1);
    }

    pub fn cleanup_ran(&self, at: DateTime<Utc>, expired: usize) {
        self.expired_swept.fetch_add(expired as u64, Ordering::Relaxed);
        self.set_last_cleanup(at);
        counter!("cleanup_expired_total").increment(expired as u64);
        gauge!("cleanup_last_run_ts").set(at.timestamp() as f64);
    }

    /// Zero every counter; `last_cleanup` becomes `at`.
    pub fn reset(&self, at: DateTime<Utc>) {
        for c in [
            &self.feeds_started,
            &self.hits_found,
            &self.notifications_sent,
            &self.items_received,
            &self.malformed_dropped,
            &self.duplicates_suppressed,
            &self.hits_lost,
            &self.notifications_failed,
            &self.expired_swept,
        ] {
            c.store(0, Ordering::Relaxed);
        }
        self.set_last_cleanup(at);
        gauge!("cleanup_last_run_ts").set(at.timestamp() as f64);
    }

    fn set_last_cleanup(&self, at: DateTime<Utc>) {
        match self.last_cleanup.lock() {
            Ok(mut g) => *g = Some(at),
            Err(_) => tracing::error!(target: "pipeline", "stats mutex poisoned; last cleanup not recorded"),
        }
    }

    pub fn snapshot(&self, active_hits: usize, feeds: Vec<FeedHealth>) -> ProcessingStats {
        ProcessingStats {
            feeds_started: self.feeds_started.load(Ordering::Relaxed),
            hits_found: self.hits_found.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            last_cleanup: self.last_cleanup.lock().map(|g| *g).unwrap_or_else(|_| {
                tracing::error!(target: "pipeline", "stats mutex poisoned; last cleanup unknown");
                None
            }),
            items_received: self.items_received.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            hits_lost: self.hits_lost.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            expired_swept: self.expired_swept.load(Ordering::Relaxed),
            active_hits,
            feeds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    #[test]
    fn reset_zeroes_counters_and_stamps_cleanup() {
        let s = StatsCounters::new();
        s.feed_started();
        s.hit_stored("cyber");
        s.notification_sent("log");
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap();
        s.reset(at);
        let snap = s.snapshot(0, vec![]);
        assert_eq!(
            (snap.feeds_started, snap.hits_found, snap.notifications_sent),
            (0, 0, 0)
        );
        assert_eq!(snap.last_cleanup, Some(at));
    }

    #[test]
    fn poisoned_cleanup_stamp_does_not_panic() {
        let s = Arc::new(StatsCounters::new());
        let poisoner = Arc::clone(&s);
        let _ = std::thread::spawn(move || {
            let _g = poisoner.last_cleanup.lock().unwrap();
            panic!("poison the stats mutex");
        })
        .join();

        let at = Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap();
        s.cleanup_ran(at, 2);
        s.hit_stored("cyber");
        let snap = s.snapshot(1, vec![]);
        assert_eq!(snap.last_cleanup, None);
        assert_eq!(snap.expired_swept, 2);
        assert_eq!(snap.hits_found, 1);
    }
}
