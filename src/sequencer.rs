// src/sequencer.rs
//! Turns match events into hits with collision-free, per-day ordered ids.
//!
//! The sequencer is plain state; callers serialize access (the processor
//! keeps it and the watch registry under one mutex) so a sequence number and
//! the keyword counters it implies are always updated together.
//!
//! Day boundaries are calendar days in UTC. The first hit after midnight UTC
//! starts again at 1.
//!
//! With `SequencePolicy::Persist` the sequencer only hands out
//! [`SequenceCheckpoint`]s; callers write them after releasing their lock.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::hit::Hit;
use crate::ingest::types::NormalizedItem;
use crate::manifest::ManifestHeader;
use crate::matcher::snippet;
use crate::watch::WatchRegistry;

const SNIPPET_RADIUS: usize = 120;

fn default_state_path() -> PathBuf {
    PathBuf::from("state/sequence.json")
}

/// What happens to the day counter across restarts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SequencePolicy {
    /// Always start the day at 1 on process start.
    #[default]
    ResetOnStart,
    /// Continue from the last value written to `state_path` when it is from today.
    Persist {
        #[serde(default = "default_state_path")]
        state_path: PathBuf,
    },
}

impl SequencePolicy {
    pub fn persist_default() -> Self {
        Self::Persist {
            state_path: default_state_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct PersistedSequence {
    day: NaiveDate,
    last: u32,
}

/// One (item, keyword) pair produced by the matcher.
#[derive(Debug, Clone, Copy)]
pub struct MatchEvent<'a> {
    pub item: &'a NormalizedItem,
    pub keyword: &'a str,
}

#[derive(Debug)]
pub struct Sequencer {
    day: NaiveDate,
    last: u32,
    ttl: Duration,
    /// (source_tag, external_id, lowercased keyword) -> expiry of the hit it produced.
    seen: HashMap<(String, String, String), DateTime<Utc>>,
    /// Bumped on every change to `(day, last)`.
    generation: u64,
    writer: Option<Arc<SequenceWriter>>,
}

/// Writes sequence state to disk, newest generation wins.
#[derive(Debug)]
pub struct SequenceWriter {
    path: PathBuf,
    written: Mutex<u64>,
}

impl SequenceWriter {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            written: Mutex::new(0),
        }
    }
}

/// A `(day, last)` value waiting to be written.
#[derive(Debug, Clone)]
pub struct SequenceCheckpoint {
    writer: Arc<SequenceWriter>,
    generation: u64,
    state: PersistedSequence,
}

impl SequenceCheckpoint {
    /// Write the state unless a newer checkpoint already reached disk.
    pub fn save(self) {
        let Ok(mut written) = self.writer.written.lock() else {
            tracing::warn!(target: "pipeline", "sequence writer mutex poisoned; state not saved");
            return;
        };
        if self.generation <= *written {
            return;
        }
        match save_state(&self.writer.path, &self.state) {
            Ok(()) => *written = self.generation,
            Err(e) => {
                tracing::warn!(target: "pipeline", error = ?e, path = %self.writer.path.display(), "sequence state not saved")
            }
        }
    }
}

impl Sequencer {
    pub fn new(policy: &SequencePolicy, ttl: Duration, now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        let mut seq = Self {
            day: today,
            last: 0,
            ttl,
            seen: HashMap::new(),
            generation: 0,
            writer: None,
        };
        if let SequencePolicy::Persist { state_path } = policy {
            match load_state(state_path) {
                Ok(Some(s)) if s.day == today => {
                    tracing::info!(target: "pipeline", day = %s.day, last = s.last, "resuming daily sequence");
                    seq.last = s.last;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(target: "pipeline", error = ?e, "sequence state unreadable; starting at 1")
                }
            }
            seq.writer = Some(Arc::new(SequenceWriter::new(state_path.clone())));
        }
        seq
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current day and last assigned value.
    pub fn current(&self) -> (NaiveDate, u32) {
        (self.day, self.last)
    }

    fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.day {
            tracing::info!(target: "pipeline", from = %self.day, to = %today, last = self.last, "daily sequence rollover");
            self.day = today;
            self.last = 0;
        }
    }

    /// Advance and return the next sequence value for `now`'s day.
    pub fn next(&mut self, now: DateTime<Utc>) -> u32 {
        self.roll_day(now);
        self.last += 1;
        self.generation += 1;
        self.last
    }

    pub fn hit_id(day: NaiveDate, sequence: u32) -> String {
        format!("{}-{:04}", day.format("%Y%m%d"), sequence)
    }

    /// Produce the hit for `event`, bumping the keyword's statistics in the
    /// same step. `None` when the pair was already turned into a live hit or
    /// the keyword is not registered.
    pub fn assign(
        &mut self,
        event: MatchEvent<'_>,
        registry: &mut WatchRegistry,
        now: DateTime<Utc>,
    ) -> Option<Hit> {
        let item = event.item;
        let key = (
            item.source_tag.clone(),
            item.external_id.clone(),
            event.keyword.trim().to_lowercase(),
        );
        if self.seen.get(&key).is_some_and(|exp| *exp > now) {
            return None;
        }
        let keyword = registry.get(event.keyword)?.keyword.clone();

        let sequence = self.next(now);
        registry.record_hit(&keyword, now);

        let id = Self::hit_id(self.day, sequence);
        let expires_at = now + self.ttl;
        let text = item.combined_text();
        let manifest = ManifestHeader::new(
            &item.source_tag,
            &item.external_id,
            &text,
            &id,
            now,
            self.ttl,
            &item.url,
        );
        self.seen.insert(key, expires_at);

        Some(Hit {
            id,
            daily_sequence: sequence,
            keyword,
            source_tag: item.source_tag.clone(),
            source_url: item.url.clone(),
            external_id: item.external_id.clone(),
            title: item.title.clone(),
            snippet: snippet(&text, event.keyword, SNIPPET_RADIUS),
            manifest,
            created_at: now,
            expires_at,
        })
    }

    /// Drop idempotency entries whose hits have expired.
    pub fn forget_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, exp| *exp > now);
        before - self.seen.len()
    }

    /// Manual cleanup: counter back to zero, ledger emptied.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.day = now.date_naive();
        self.last = 0;
        self.seen.clear();
        self.generation += 1;
    }

    /// The current `(day, last)` to write, when persistence is enabled.
    pub fn checkpoint(&self) -> Option<SequenceCheckpoint> {
        let writer = self.writer.as_ref()?;
        Some(SequenceCheckpoint {
            writer: Arc::clone(writer),
            generation: self.generation,
            state: PersistedSequence {
                day: self.day,
                last: self.last,
            },
        })
    }
}

fn load_state(path: &Path) -> Result<Option<PersistedSequence>> {
    if !path.exists() {
        return Ok(None);
    }
    let s = fs::read_to_string(path)
        .with_context(|| format!("reading sequence state {}", path.display()))?;
    let state = serde_json::from_str(&s).context("parsing sequence state")?;
    Ok(Some(state))
}

fn save_state(path: &Path, state: &PersistedSequence) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).context("creating sequence state dir")?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(state)?).context("writing sequence state")?;
    fs::rename(&tmp, path).context("replacing sequence state")?;
    Ok(())
}
