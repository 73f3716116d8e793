use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{post_json, Notification, NotificationChannel};
use crate::error::NotifyError;

// Discord rejects embed descriptions above 4096 chars.
const MAX_DESCRIPTION: usize = 4000;

#[derive(Clone)]
pub struct DiscordChannel {
    webhook: String,
    client: Client,
}

impl DiscordChannel {
    pub fn new(webhook: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building discord http client")?;
        Ok(Self { webhook, client })
    }
}

#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

#[derive(Serialize)]
struct DiscordWebhookPayload {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn embed(n: &Notification) -> Self {
        let description: String = n.body.chars().take(MAX_DESCRIPTION).collect();
        Self {
            content: None,
            embeds: vec![DiscordEmbed {
                title: n.title.clone(),
                description: format!("```\n{description}\n```"),
                url: (!n.link.is_empty()).then(|| n.link.clone()),
            }],
        }
    }
}

#[async_trait::async_trait]
impl NotificationChannel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        let payload = DiscordWebhookPayload::embed(n);
        post_json(&self.client, "discord", &self.webhook, &payload, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_skips_empty_link() {
        let n = Notification {
            title: "t".into(),
            body: "b".into(),
            link: String::new(),
        };
        let v = serde_json::to_value(DiscordWebhookPayload::embed(&n)).unwrap();
        assert!(v["embeds"][0].get("url").is_none());
        assert_eq!(v["embeds"][0]["title"], "t");
    }
}
