// src/hit.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::manifest::ManifestHeader;

/// TTL-bounded alert record. `expires_at == created_at + TTL` always holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hit {
    /// `{YYYYMMDD}-{sequence:04}`
    pub id: String,
    pub daily_sequence: u32,
    pub keyword: String,
    pub source_tag: String,
    pub source_url: String,
    pub external_id: String,
    pub title: String,
    pub snippet: String,
    pub manifest: ManifestHeader,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Hit {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
