// src/ingest/providers/courtlistener.rs
//! CourtListener search API poll provider (judicial opinions).

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::error::FeedError;
use crate::ingest::types::{PollProvider, RawItem};

const DEFAULT_SITE: &str = "https://www.courtlistener.com";

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(rename = "caseName", default)]
    case_name: Option<String>,
    #[serde(default)]
    absolute_url: Option<String>,
    #[serde(rename = "dateFiled", default)]
    date_filed: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

pub struct CourtListenerProvider {
    source_tag: String,
    site: String,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        url: String,
        client: reqwest::Client,
        token: Option<String>,
        query: String,
    },
}

/// `a OR b OR "two words"`; empty when no keywords are scoped.
fn build_query(keywords: &[String]) -> String {
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| {
            if k.contains(char::is_whitespace) {
                format!("\"{k}\"")
            } else {
                k.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

impl CourtListenerProvider {
    pub fn from_fixture(source_tag: &str, json: &str) -> Self {
        Self {
            source_tag: source_tag.to_string(),
            site: DEFAULT_SITE.to_string(),
            mode: Mode::Fixture(json.to_string()),
        }
    }

    pub fn from_url(
        source_tag: &str,
        url: &str,
        token: Option<String>,
        keywords: Vec<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let parsed = reqwest::Url::parse(url)
            .with_context(|| format!("invalid courtlistener url `{url}`"))?;
        let site = parsed.origin().ascii_serialization();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building courtlistener http client")?;
        Ok(Self {
            source_tag: source_tag.to_string(),
            site,
            mode: Mode::Http {
                url: url.to_string(),
                client,
                token,
                query: build_query(&keywords),
            },
        })
    }

    pub fn parse_page(&self, body: &str) -> Result<Vec<RawItem>, FeedError> {
        let page: SearchPage = serde_json::from_str(body).map_err(|e| {
            FeedError::connection(&self.source_tag, format!("courtlistener json: {e}"))
        })?;
        Ok(page
            .results
            .into_iter()
            .map(|r| RawItem {
                external_id: r.id.and_then(|v| match v {
                    serde_json::Value::String(s) => Some(s),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                }),
                url: r.absolute_url.map(|u| {
                    if u.starts_with("http") {
                        u
                    } else {
                        format!("{}{}", self.site, u)
                    }
                }),
                title: r.case_name,
                body: r.snippet,
                published: r.date_filed,
            })
            .collect())
    }
}

#[async_trait]
impl PollProvider for CourtListenerProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawItem>, FeedError> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_page(s),
            Mode::Http {
                url,
                client,
                token,
                query,
            } => {
                let mut req = client.get(url.as_str()).query(&[
                    ("type", "o"),
                    ("order_by", "dateFiled desc"),
                    ("format", "json"),
                ]);
                if !query.is_empty() {
                    req = req.query(&[("q", query.as_str())]);
                }
                if let Some(t) = token {
                    req = req.header(reqwest::header::AUTHORIZATION, format!("Token {t}"));
                }
                let resp = req
                    .send()
                    .await
                    .map_err(|e| FeedError::connection(&self.source_tag, e))?
                    .error_for_status()
                    .map_err(|e| FeedError::connection(&self.source_tag, e))?;
                let body = resp
                    .text()
                    .await
                    .map_err(|e| FeedError::connection(&self.source_tag, e))?;
                self.parse_page(&body)
            }
        }
    }

    fn name(&self) -> &str {
        &self.source_tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_quotes_phrases() {
        let q = build_query(&["cyber".into(), "material support".into(), " ".into()]);
        assert_eq!(q, r#"cyber OR "material support""#);
    }

    #[test]
    fn numeric_ids_and_relative_urls() {
        let p = CourtListenerProvider::from_fixture("courtlistener", "");
        let items = p
            .parse_page(
                r#"{"count":1,"results":[{"id":4242,"caseName":"United States v. Doe",
                "absolute_url":"/opinion/4242/united-states-v-doe/","dateFiled":"2025-03-03",
                "snippet":"charged with <mark>corruption</mark>"}]}"#,
            )
            .unwrap();
        assert_eq!(items[0].external_id.as_deref(), Some("4242"));
        assert_eq!(
            items[0].url.as_deref(),
            Some("https://www.courtlistener.com/opinion/4242/united-states-v-doe/")
        );
        assert_eq!(items[0].published.as_deref(), Some("2025-03-03"));
    }
}
