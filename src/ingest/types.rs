// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::FeedError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    Poll,
    Stream,
}

/// One external provider as configured at startup. Immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub source_tag: String,
    pub mode: FeedMode,
    pub interval: Duration,
    pub batch_size: usize,
    /// Lowercased keyword scope; empty means "whole watchlist".
    pub keywords: BTreeSet<String>,
}

/// Payload as a provider saw it, before normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawItem {
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    /// RFC 2822, RFC 3339 or plain `YYYY-MM-DD`.
    #[serde(default)]
    pub published: Option<String>,
}

/// Feed-agnostic record handed to the matcher. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedItem {
    pub source_tag: String,
    pub url: String,
    pub title: String,
    pub body: String,
    pub published_at: DateTime<Utc>,
    /// Provider-assigned id; pairs with the keyword for idempotency.
    pub external_id: String,
}

impl NormalizedItem {
    /// Title and body joined the way the matcher and the content hash see them.
    pub fn combined_text(&self) -> String {
        match (self.title.is_empty(), self.body.is_empty()) {
            (false, false) => format!("{}\n{}", self.title, self.body),
            (false, true) => self.title.clone(),
            _ => self.body.clone(),
        }
    }
}

/// Fixed-interval source: one request per cycle.
#[async_trait::async_trait]
pub trait PollProvider: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<RawItem>, FeedError>;
    fn name(&self) -> &str;
}

/// Standing subscription: items arrive one by one until the stream closes.
#[async_trait::async_trait]
pub trait StreamProvider: Send {
    async fn connect(&mut self) -> Result<(), FeedError>;
    /// `None` means the subscription ended and must be re-established.
    async fn next_item(&mut self) -> Option<Result<RawItem, FeedError>>;
    fn name(&self) -> &str;
}

/// The acquisition strategy an adapter drives.
pub enum Acquisition {
    Poll(Box<dyn PollProvider>),
    Stream(Box<dyn StreamProvider>),
}

impl Acquisition {
    pub fn mode(&self) -> FeedMode {
        match self {
            Self::Poll(_) => FeedMode::Poll,
            Self::Stream(_) => FeedMode::Stream,
        }
    }
}
