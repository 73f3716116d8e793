// Generic JSON webhook: POSTs `{title, body, link}` with optional bearer auth.
use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

use super::{post_json, Notification, NotificationChannel};
use crate::error::NotifyError;

pub struct WebhookChannel {
    url: String,
    token: Option<String>,
    client: Client,
}

impl WebhookChannel {
    pub fn new(url: String, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building webhook http client")?;
        Ok(Self { url, token, client })
    }
}

#[async_trait::async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        post_json(&self.client, "webhook", &self.url, n, self.token.as_deref()).await
    }
}
