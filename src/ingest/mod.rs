// src/ingest/mod.rs
pub mod adapter;
pub mod backoff;
pub mod providers;
pub mod types;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use std::collections::BTreeSet;
use std::time::Duration;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::config::{resolve_credential, FeedConfig, FeedKind};
use crate::error::FeedError;
use crate::ingest::adapter::FeedAdapter;
use crate::ingest::providers::{
    courtlistener::CourtListenerProvider,
    push::{PushHandle, PushStream},
    rss::RssProvider,
};
use crate::ingest::types::{Acquisition, FeedSource, NormalizedItem, RawItem};

const MAX_TEXT_CHARS: usize = 10_000;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feed_items_total", "Items emitted by feed adapters.");
        describe_counter!(
            "feed_malformed_total",
            "Items dropped because they failed normalization."
        );
        describe_counter!("feed_errors_total", "Feed fetch/connect failures.");
        describe_histogram!("feed_parse_ms", "Provider parse time in milliseconds.");
        describe_gauge!("feed_up", "1 when the feed is healthy, 0 when down.");
    });
}

/// Normalize text: decode entities, strip tags, fold quotes and whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace (includes NBSP)
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap
    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }

    out
}

/// Parse a provider timestamp. Accepts RFC 2822, RFC 3339 and `YYYY-MM-DD`.
pub fn parse_published(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    let odt = OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .ok();
    if let Some(dt) = odt {
        return DateTime::from_timestamp(dt.unix_timestamp(), dt.nanosecond());
    }
    NaiveDate::parse_from_str(ts, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

/// Turn a raw payload into a `NormalizedItem`, or reject it as malformed.
///
/// The external id falls back to the URL; an item with neither, or with no
/// text at all, cannot be tracked and is rejected.
pub fn normalize_item(
    source_tag: &str,
    raw: RawItem,
    now: DateTime<Utc>,
) -> Result<NormalizedItem, FeedError> {
    let url = non_empty(raw.url.as_deref()).map(str::to_string);
    let external_id = non_empty(raw.external_id.as_deref())
        .map(str::to_string)
        .or_else(|| url.clone())
        .ok_or_else(|| FeedError::malformed(source_tag, "item has neither id nor url"))?;

    let title = raw.title.as_deref().map(normalize_text).unwrap_or_default();
    let body = raw.body.as_deref().map(normalize_text).unwrap_or_default();
    if title.is_empty() && body.is_empty() {
        return Err(FeedError::malformed(
            source_tag,
            format!("item `{external_id}` has no text"),
        ));
    }

    let published_at = match non_empty(raw.published.as_deref()) {
        Some(ts) => parse_published(ts).unwrap_or_else(|| {
            tracing::debug!(target: "ingest", source = source_tag, ts, "unparsable published date");
            now
        }),
        None => now,
    };

    Ok(NormalizedItem {
        source_tag: source_tag.to_string(),
        url: url.unwrap_or_default(),
        title,
        body,
        published_at,
        external_id,
    })
}

/// Build the adapter for one configured feed. Push feeds also return the
/// handle external producers use to deliver items.
pub fn build_adapter(cfg: &FeedConfig) -> Result<(FeedAdapter, Option<PushHandle>)> {
    cfg.validate()?;
    let credentials = cfg
        .credentials
        .as_deref()
        .map(resolve_credential)
        .transpose()
        .with_context(|| format!("resolving credentials for feed `{}`", cfg.source_tag))?;
    let url = cfg.url.clone().unwrap_or_default();

    let (acquisition, handle) = match cfg.kind {
        FeedKind::Rss => {
            let p = RssProvider::from_url(&cfg.source_tag, &url, cfg.request_timeout())?;
            (Acquisition::Poll(Box::new(p)), None)
        }
        FeedKind::CourtListener => {
            let p = CourtListenerProvider::from_url(
                &cfg.source_tag,
                &url,
                credentials,
                cfg.keywords.clone(),
                cfg.request_timeout(),
            )?;
            (Acquisition::Poll(Box::new(p)), None)
        }
        FeedKind::Push => {
            let (stream, handle) = PushStream::new(&cfg.source_tag, cfg.batch_size);
            (Acquisition::Stream(Box::new(stream)), Some(handle))
        }
    };

    let source = FeedSource {
        source_tag: cfg.source_tag.clone(),
        mode: cfg.mode,
        interval: Duration::from_secs(cfg.interval_seconds),
        batch_size: cfg.batch_size,
        keywords: cfg
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect::<BTreeSet<_>>(),
    };

    let adapter = FeedAdapter::new(source, acquisition, cfg.backoff)
        .with_request_timeout(cfg.request_timeout());
    Ok((adapter, handle))
}
