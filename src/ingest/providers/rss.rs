// src/ingest/providers/rss.rs
//! RSS 2.0 poll provider (DOJ press releases, speeches, testimony, ...).

use anyhow::{Context, Result};
use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;
use std::time::Duration;

use crate::error::FeedError;
use crate::ingest::types::{PollProvider, RawItem};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Guid>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text")]
    value: Option<String>,
}

pub struct RssProvider {
    source_tag: String,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl RssProvider {
    pub fn from_fixture(source_tag: &str, xml: &str) -> Self {
        Self {
            source_tag: source_tag.to_string(),
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_url(source_tag: &str, url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("court-feed-processor/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building rss http client")?;
        Ok(Self {
            source_tag: source_tag.to_string(),
            mode: Mode::Http {
                url: url.to_string(),
                client,
            },
        })
    }

    /// Parse a whole RSS document. A document that does not parse is a
    /// connection-class failure; per-item problems surface later in normalization.
    pub fn parse_items_from_str(&self, s: &str) -> Result<Vec<RawItem>, FeedError> {
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean)
            .map_err(|e| FeedError::connection(&self.source_tag, format!("rss parse: {e}")))?;

        Ok(rss
            .channel
            .item
            .into_iter()
            .map(|it| RawItem {
                external_id: it.guid.and_then(|g| g.value),
                url: it.link,
                title: it.title,
                body: it.description,
                published: it.pub_date,
            })
            .collect())
    }
}

#[async_trait]
impl PollProvider for RssProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawItem>, FeedError> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_items_from_str(s),
            Mode::Http { url, client } => {
                let resp = client
                    .get(url.as_str())
                    .send()
                    .await
                    .map_err(|e| FeedError::connection(&self.source_tag, e))?;
                let resp = resp
                    .error_for_status()
                    .map_err(|e| FeedError::connection(&self.source_tag, e))?;
                let body = resp
                    .text()
                    .await
                    .map_err(|e| FeedError::connection(&self.source_tag, e))?;
                self.parse_items_from_str(&body)
            }
        }
    }

    fn name(&self) -> &str {
        &self.source_tag
    }
}

/// XML only knows five named entities; feeds routinely ship HTML ones.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
