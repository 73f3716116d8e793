use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

use super::{post_json, Notification, NotificationChannel};
use crate::error::NotifyError;

pub struct SlackChannel {
    webhook_url: String,
    client: Client,
}

impl SlackChannel {
    pub fn new(webhook_url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building slack http client")?;
        Ok(Self {
            webhook_url,
            client,
        })
    }
}

fn slack_text(n: &Notification) -> String {
    format!("*{}*\n{}\n<{}|source>", n.title, n.body, n.link)
}

#[async_trait::async_trait]
impl NotificationChannel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    async fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        let body = serde_json::json!({ "text": slack_text(n) });
        post_json(&self.client, "slack", &self.webhook_url, &body, None).await
    }
}
