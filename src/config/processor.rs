// src/config/processor.rs
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::ingest::backoff::Backoff;
use crate::ingest::types::FeedMode;
use crate::sequencer::SequencePolicy;

fn default_ttl_secs() -> u64 {
    24 * 3600
}
fn default_cleanup_interval_secs() -> u64 {
    3600
}
fn default_queue_capacity() -> usize {
    256
}
fn default_pipeline_workers() -> usize {
    2
}
fn default_notify_timeout_secs() -> u64 {
    10
}
fn default_interval_seconds() -> u64 {
    300
}
fn default_batch_size() -> usize {
    50
}
fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Lifetime of every hit, in seconds.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Bound of the adapter -> matcher queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_pipeline_workers")]
    pub pipeline_workers: usize,
    /// Per-channel send bound.
    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,
    /// Optional cap on live hits held by the store.
    #[serde(default)]
    pub max_hits: Option<usize>,
    /// Initial watchlist (all enabled).
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub sequence: SequencePolicy,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            queue_capacity: default_queue_capacity(),
            pipeline_workers: default_pipeline_workers(),
            notify_timeout_secs: default_notify_timeout_secs(),
            max_hits: None,
            keywords: Vec::new(),
            sequence: SequencePolicy::default(),
            feeds: Vec::new(),
            channels: Vec::new(),
        }
    }
}

impl ProcessorConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs as i64)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    /// Configured keywords plus every feed's scoped keywords, deduplicated
    /// case-insensitively, first spelling wins.
    pub fn all_keywords(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.keywords
            .iter()
            .chain(self.feeds.iter().flat_map(|f| f.keywords.iter()))
            .map(|k| k.trim())
            .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
            .map(str::to_string)
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.ttl_secs == 0 {
            bail!("ttl_secs must be positive");
        }
        if self.cleanup_interval_secs == 0 {
            bail!("cleanup_interval_secs must be positive");
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be positive");
        }
        if self.pipeline_workers == 0 {
            bail!("pipeline_workers must be positive");
        }
        let mut tags = HashSet::new();
        for f in &self.feeds {
            f.validate()?;
            if !tags.insert(f.source_tag.to_lowercase()) {
                bail!("duplicate feed source_tag `{}`", f.source_tag);
            }
        }
        for c in &self.channels {
            if c.channel_type.trim().is_empty() {
                bail!("channel_type must not be empty");
            }
        }
        Ok(())
    }
}

/// Which concrete provider backs a feed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Rss,
    CourtListener,
    Push,
}

impl FeedKind {
    pub fn native_mode(self) -> FeedMode {
        match self {
            Self::Rss | Self::CourtListener => FeedMode::Poll,
            Self::Push => FeedMode::Stream,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    /// Consecutive failures before the feed reports `down`.
    pub failure_threshold: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            max_ms: 300_000,
            failure_threshold: 3,
        }
    }
}

impl BackoffConfig {
    pub fn policy(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.base_ms),
            Duration::from_millis(self.max_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub source_tag: String,
    pub mode: FeedMode,
    pub kind: FeedKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Scope of this feed; also seeds the watchlist.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Opaque; `env:NAME` is resolved at startup.
    #[serde(default)]
    pub credentials: Option<String>,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl FeedConfig {
    pub fn validate(&self) -> Result<()> {
        if self.source_tag.trim().is_empty() {
            bail!("feed source_tag must not be empty");
        }
        if self.kind.native_mode() != self.mode {
            bail!(
                "feed `{}`: kind {:?} only supports mode {:?}",
                self.source_tag,
                self.kind,
                self.kind.native_mode()
            );
        }
        if self.mode == FeedMode::Poll {
            if self.interval_seconds == 0 {
                bail!("feed `{}`: interval_seconds must be positive", self.source_tag);
            }
            if self.url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                bail!("feed `{}`: poll feeds need a url", self.source_tag);
            }
        }
        if self.batch_size == 0 {
            bail!("feed `{}`: batch_size must be positive", self.source_tag);
        }
        if self.backoff.base_ms == 0 || self.backoff.max_ms < self.backoff.base_ms {
            bail!("feed `{}`: backoff needs 0 < base_ms <= max_ms", self.source_tag);
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelConfig {
    /// "slack" | "discord" | "webhook" | "email" | "log"
    pub channel_type: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub credentials: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rss_feed() -> FeedConfig {
        FeedConfig {
            source_tag: "doj".into(),
            mode: FeedMode::Poll,
            kind: FeedKind::Rss,
            url: Some("https://www.justice.gov/news/rss?type=press_release&m=1".into()),
            interval_seconds: 300,
            batch_size: 50,
            keywords: vec!["Cyber".into(), "fraud".into()],
            request_timeout_secs: 30,
            credentials: None,
            backoff: BackoffConfig::default(),
        }
    }

    #[test]
    fn kind_mode_mismatch_is_rejected() {
        let mut f = rss_feed();
        f.mode = FeedMode::Stream;
        assert!(f.validate().is_err());
    }

    #[test]
    fn poll_feed_needs_url() {
        let mut f = rss_feed();
        f.url = None;
        assert!(f.validate().is_err());
    }

    #[test]
    fn duplicate_source_tags_rejected() {
        let cfg = ProcessorConfig {
            feeds: vec![rss_feed(), rss_feed()],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn all_keywords_merges_feed_scopes_case_insensitively() {
        let cfg = ProcessorConfig {
            keywords: vec!["cyber".into(), " corruption ".into()],
            feeds: vec![rss_feed()],
            ..Default::default()
        };
        assert_eq!(cfg.all_keywords(), vec!["cyber", "corruption", "fraud"]);
    }
}
