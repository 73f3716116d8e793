// src/manifest.rs
//! Fixed-format provenance header attached to every hit.
//!
//! ```text
//! System ID: <source_tag>:<external_id>
//! Document Type: FEED_HIT
//! Content Hash: <sha256 of normalized title + body>
//! Composite ID: <hit id>
//! Classification: EPHEMERAL_STREAM_DATA
//! Created: <RFC 3339>
//! TTL: <e.g. 24h>
//! Source: <external url>
//! ```

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub const DOCUMENT_TYPE: &str = "FEED_HIT";
pub const CLASSIFICATION: &str = "EPHEMERAL_STREAM_DATA";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestHeader {
    pub system_id: String,
    pub document_type: String,
    pub content_hash: String,
    pub composite_id: String,
    pub classification: String,
    pub created: DateTime<Utc>,
    pub ttl: String,
    pub source: String,
}

impl ManifestHeader {
    pub fn new(
        source_tag: &str,
        external_id: &str,
        text: &str,
        hit_id: &str,
        created: DateTime<Utc>,
        ttl: Duration,
        source_url: &str,
    ) -> Self {
        Self {
            system_id: format!("{source_tag}:{external_id}"),
            document_type: DOCUMENT_TYPE.to_string(),
            content_hash: content_hash(text),
            composite_id: hit_id.to_string(),
            classification: CLASSIFICATION.to_string(),
            created,
            ttl: format_ttl(ttl),
            source: source_url.to_string(),
        }
    }

    /// Ordered `key: value` lines.
    pub fn lines(&self) -> [(&'static str, String); 8] {
        [
            ("System ID", self.system_id.clone()),
            ("Document Type", self.document_type.clone()),
            ("Content Hash", self.content_hash.clone()),
            ("Composite ID", self.composite_id.clone()),
            ("Classification", self.classification.clone()),
            (
                "Created",
                self.created.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("TTL", self.ttl.clone()),
            ("Source", self.source.clone()),
        ]
    }
}

impl fmt::Display for ManifestHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.lines().iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{k}: {v}")?;
        }
        Ok(())
    }
}

/// Hex SHA-256 of the normalized item text.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Compact duration: `24h`, `90m`, `45s`.
pub fn format_ttl(ttl: Duration) -> String {
    let secs = ttl.num_seconds().max(0);
    if secs > 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn renders_fixed_order() {
        let created = Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap();
        let m = ManifestHeader::new(
            "doj",
            "pr-1001",
            "Federal case involves cyber intrusion",
            "20250304-0001",
            created,
            Duration::hours(24),
            "https://www.justice.gov/opa/pr/a",
        );
        let rendered = m.to_string();
        let keys: Vec<&str> = rendered
            .lines()
            .map(|l| l.split_once(": ").unwrap().0)
            .collect();
        assert_eq!(
            keys,
            vec![
                "System ID",
                "Document Type",
                "Content Hash",
                "Composite ID",
                "Classification",
                "Created",
                "TTL",
                "Source"
            ]
        );
        assert!(rendered.contains("System ID: doj:pr-1001"));
        assert!(rendered.contains("Document Type: FEED_HIT"));
        assert!(rendered.contains("Created: 2025-03-04T10:00:00Z"));
        assert!(rendered.contains("TTL: 24h"));
    }

    #[test]
    fn hash_is_stable_hex() {
        let h = content_hash("abc");
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn ttl_formats() {
        assert_eq!(format_ttl(Duration::hours(24)), "24h");
        assert_eq!(format_ttl(Duration::minutes(90)), "90m");
        assert_eq!(format_ttl(Duration::seconds(45)), "45s");
    }
}
