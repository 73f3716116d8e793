// src/store.rs
//! # Ephemeral Store
//!
//! Holds hits until they expire and never hands out an expired one.
//!
//! - Lazy expiry: every read filters against the clock, sweep or not.
//! - Active expiry: `delete_expired` is the sweep used by the cleanup task.
//! - `clear_all` ignores TTL and is reserved for manual cleanup.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::clock::Clock;
use crate::error::StoreError;
use crate::hit::Hit;

/// Optional narrowing for `list`. Results are always most-recent-first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HitFilter {
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default, alias = "source")]
    pub source_tag: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl HitFilter {
    pub fn recent(n: usize) -> Self {
        Self {
            limit: Some(n),
            ..Default::default()
        }
    }

    fn accepts(&self, hit: &Hit) -> bool {
        self.keyword
            .as_deref()
            .map_or(true, |k| hit.keyword.eq_ignore_ascii_case(k.trim()))
            && self
                .source_tag
                .as_deref()
                .map_or(true, |s| hit.source_tag.eq_ignore_ascii_case(s.trim()))
    }
}

pub trait EphemeralStore: Send + Sync {
    /// Insert a hit. Idempotent on `hit.id`.
    fn put(&self, hit: Hit) -> Result<(), StoreError>;

    /// Live hits matching `filter`, newest first.
    fn list(&self, filter: &HitFilter) -> Result<Vec<Hit>, StoreError>;

    /// Remove every hit with `expires_at <= now`; returns how many went.
    fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Remove everything regardless of expiry.
    fn clear_all(&self) -> Result<usize, StoreError>;

    /// Live (non-expired) hit count.
    fn live_count(&self) -> Result<usize, StoreError>;
}

/// Guarded in-memory map. Writers hold the lock only for the map operation.
pub struct MemoryStore {
    hits: RwLock<HashMap<String, Hit>>,
    clock: Arc<dyn Clock>,
    max_hits: Option<usize>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            hits: RwLock::new(HashMap::new()),
            clock,
            max_hits: None,
        }
    }

    pub fn with_capacity_limit(mut self, max_hits: Option<usize>) -> Self {
        self.max_hits = max_hits;
        self
    }

    /// Entries physically held, expired ones included.
    pub fn raw_len(&self) -> usize {
        self.hits.read().map(|m| m.len()).unwrap_or(0)
    }
}

impl EphemeralStore for MemoryStore {
    fn put(&self, hit: Hit) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut map = self.hits.write().map_err(|_| StoreError::LockPoisoned)?;
        if map.contains_key(&hit.id) {
            map.insert(hit.id.clone(), hit);
            return Ok(());
        }
        if let Some(max) = self.max_hits {
            if map.len() >= max {
                map.retain(|_, h| !h.is_expired(now));
            }
            if map.len() >= max {
                return Err(StoreError::CapacityExceeded { max });
            }
        }
        map.insert(hit.id.clone(), hit);
        Ok(())
    }

    fn list(&self, filter: &HitFilter) -> Result<Vec<Hit>, StoreError> {
        let now = self.clock.now();
        let mut out: Vec<Hit> = {
            let map = self.hits.read().map_err(|_| StoreError::LockPoisoned)?;
            map.values()
                .filter(|h| !h.is_expired(now) && filter.accepts(h))
                .cloned()
                .collect()
        };
        out.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.daily_sequence.cmp(&a.daily_sequence))
        });
        if let Some(n) = filter.limit {
            out.truncate(n);
        }
        Ok(out)
    }

    fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        // Snapshot under the read lock, then remove under a short write lock.
        let expired: Vec<String> = {
            let map = self.hits.read().map_err(|_| StoreError::LockPoisoned)?;
            map.values()
                .filter(|h| h.is_expired(now))
                .map(|h| h.id.clone())
                .collect()
        };
        if expired.is_empty() {
            return Ok(0);
        }
        let mut map = self.hits.write().map_err(|_| StoreError::LockPoisoned)?;
        let mut removed = 0;
        for id in expired {
            // Re-check: the id may have been replaced since the snapshot.
            if map.get(&id).is_some_and(|h| h.is_expired(now)) {
                map.remove(&id);
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn clear_all(&self) -> Result<usize, StoreError> {
        let mut map = self.hits.write().map_err(|_| StoreError::LockPoisoned)?;
        let n = map.len();
        map.clear();
        Ok(n)
    }

    fn live_count(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let map = self.hits.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(map.values().filter(|h| !h.is_expired(now)).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::manifest::ManifestHeader;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap()
    }

    fn hit(seq: u32, keyword: &str, created: DateTime<Utc>) -> Hit {
        let id = format!("20250304-{seq:04}");
        let ttl = Duration::hours(24);
        Hit {
            manifest: ManifestHeader::new("doj", "x", "text", &id, created, ttl, "https://x"),
            id,
            daily_sequence: seq,
            keyword: keyword.into(),
            source_tag: "doj".into(),
            source_url: "https://x".into(),
            external_id: format!("x-{seq}"),
            title: "t".into(),
            snippet: "s".into(),
            created_at: created,
            expires_at: created + ttl,
        }
    }

    #[test]
    fn put_is_idempotent_on_id() {
        let store = MemoryStore::new(Arc::new(ManualClock::new(t0())));
        store.put(hit(1, "cyber", t0())).unwrap();
        store.put(hit(1, "cyber", t0())).unwrap();
        assert_eq!(store.list(&HitFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn list_is_newest_first_and_filtered() {
        let store = MemoryStore::new(Arc::new(ManualClock::new(t0() + Duration::minutes(5))));
        store.put(hit(1, "cyber", t0())).unwrap();
        store.put(hit(2, "fraud", t0())).unwrap();
        store.put(hit(3, "cyber", t0() + Duration::minutes(1))).unwrap();

        let all = store.list(&HitFilter::default()).unwrap();
        let seqs: Vec<u32> = all.iter().map(|h| h.daily_sequence).collect();
        assert_eq!(seqs, vec![3, 2, 1]);

        let cyber = store
            .list(&HitFilter {
                keyword: Some("CYBER".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(cyber.len(), 2);
        assert_eq!(store.list(&HitFilter::recent(1)).unwrap()[0].daily_sequence, 3);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = MemoryStore::new(clock.clone());
        store.put(hit(1, "cyber", t0())).unwrap();
        store.put(hit(2, "cyber", t0() + Duration::hours(2))).unwrap();
        let removed = store.delete_expired(t0() + Duration::hours(25)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.raw_len(), 1);
    }

    #[test]
    fn capacity_reclaims_expired_before_failing() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = MemoryStore::new(clock.clone()).with_capacity_limit(Some(1));
        store.put(hit(1, "cyber", t0())).unwrap();
        assert_eq!(
            store.put(hit(2, "cyber", t0())),
            Err(StoreError::CapacityExceeded { max: 1 })
        );
        clock.advance(Duration::hours(24));
        store.put(hit(3, "cyber", clock.now())).unwrap();
        assert_eq!(store.raw_len(), 1);
    }

    #[test]
    fn clear_all_ignores_ttl() {
        let store = MemoryStore::new(Arc::new(ManualClock::new(t0())));
        store.put(hit(1, "cyber", t0())).unwrap();
        assert_eq!(store.clear_all().unwrap(), 1);
        assert_eq!(store.live_count().unwrap(), 0);
    }
}
