// src/notify/mod.rs
//! Notification fan-out.
//!
//! Every stored hit goes to every channel, concurrently. A channel failure is
//! logged and reported back; it never blocks or cancels the other sends, and
//! it is not retried.

pub mod discord;
pub mod email;
pub mod log;
pub mod slack;
pub mod webhook;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::config::{resolve_credential, ChannelConfig};
use crate::error::NotifyError;
use crate::hit::Hit;

/// What a channel receives: `send(title, body, link)`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub link: String,
}

impl Notification {
    pub fn from_hit(hit: &Hit) -> Self {
        Self {
            title: format!("[{}] {}", hit.keyword, hit.title),
            body: format!("{}\n\n{}", hit.snippet, hit.manifest),
            link: hit.source_url.clone(),
        }
    }
}

#[async_trait::async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, n: &Notification) -> Result<(), NotifyError>;
}

/// Outcome of one fan-out.
#[derive(Debug, Default)]
pub struct FanoutReport {
    pub delivered: Vec<String>,
    pub failed: Vec<(String, NotifyError)>,
}

#[derive(Clone)]
pub struct NotifierMux {
    channels: Vec<Arc<dyn NotificationChannel>>,
    timeout: Duration,
}

impl NotifierMux {
    pub fn new(timeout: Duration) -> Self {
        Self {
            channels: Vec::new(),
            timeout,
        }
    }

    pub fn with_channel(mut self, ch: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(ch);
        self
    }

    /// Build every configured channel. A channel that fails to build is a
    /// startup error.
    pub fn from_configs(configs: &[ChannelConfig], timeout: Duration) -> Result<Self> {
        let mut mux = Self::new(timeout);
        for cfg in configs {
            let ch = build_channel(cfg, timeout)
                .with_context(|| format!("building `{}` channel", cfg.channel_type))?;
            mux.channels.push(ch);
        }
        Ok(mux)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    /// Send `hit` to all channels at once, each bounded by the mux timeout.
    pub async fn notify(&self, hit: &Hit) -> FanoutReport {
        let msg = Arc::new(Notification::from_hit(hit));
        let mut set = JoinSet::new();
        for ch in &self.channels {
            let ch = Arc::clone(ch);
            let msg = Arc::clone(&msg);
            let timeout = self.timeout;
            set.spawn(async move {
                let name = ch.name().to_string();
                let res = match tokio::time::timeout(timeout, ch.send(&msg)).await {
                    Ok(r) => r,
                    Err(_) => Err(NotifyError::Timeout {
                        channel: name.clone(),
                        after: timeout,
                    }),
                };
                (name, res)
            });
        }

        let mut report = FanoutReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    tracing::debug!(target: "notify", channel = %name, hit_id = %hit.id, "delivered");
                    report.delivered.push(name);
                }
                Ok((name, Err(e))) => {
                    tracing::warn!(target: "notify", channel = %name, hit_id = %hit.id, error = %e, "delivery failed");
                    report.failed.push((name, e));
                }
                Err(e) => {
                    tracing::error!(target: "notify", hit_id = %hit.id, error = ?e, "channel task panicked");
                    report.failed.push((
                        "unknown".to_string(),
                        NotifyError::Transport {
                            channel: "unknown".to_string(),
                            message: e.to_string(),
                        },
                    ));
                }
            }
        }
        report
    }
}

/// Factory keyed on `channel_type`.
pub fn build_channel(cfg: &ChannelConfig, timeout: Duration) -> Result<Arc<dyn NotificationChannel>> {
    let credentials = cfg
        .credentials
        .as_deref()
        .map(resolve_credential)
        .transpose()?;
    // Webhook URLs are secrets too, so `env:NAME` works here as well.
    let endpoint = resolve_credential(&cfg.endpoint)?;
    let needs_endpoint = || {
        if endpoint.is_empty() {
            Err(anyhow!("`{}` channel needs an endpoint", cfg.channel_type))
        } else {
            Ok(endpoint.to_string())
        }
    };

    let ch: Arc<dyn NotificationChannel> = match cfg.channel_type.trim().to_ascii_lowercase().as_str() {
        "slack" => Arc::new(slack::SlackChannel::new(needs_endpoint()?, timeout)?),
        "discord" => Arc::new(discord::DiscordChannel::new(needs_endpoint()?, timeout)?),
        "webhook" => Arc::new(webhook::WebhookChannel::new(needs_endpoint()?, credentials, timeout)?),
        "email" => {
            let from = cfg
                .options
                .get("from")
                .ok_or_else(|| anyhow!("email channel needs options.from"))?;
            let to = cfg
                .options
                .get("to")
                .ok_or_else(|| anyhow!("email channel needs options.to"))?;
            Arc::new(email::EmailChannel::new(
                &needs_endpoint()?,
                credentials.as_deref(),
                from,
                to,
                timeout,
            )?)
        }
        "log" => Arc::new(log::LogChannel::default()),
        other => return Err(anyhow!("unsupported channel_type `{other}`")),
    };
    Ok(ch)
}

/// POST a JSON body and map the outcome onto `NotifyError`.
pub(crate) async fn post_json<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    channel: &str,
    url: &str,
    body: &T,
    bearer: Option<&str>,
) -> Result<(), NotifyError> {
    let mut req = client.post(url).json(body);
    if let Some(token) = bearer {
        req = req.bearer_auth(token);
    }
    let resp = req.send().await.map_err(|e| NotifyError::Transport {
        channel: channel.to_string(),
        message: e.to_string(),
    })?;
    let status = resp.status();
    if !status.is_success() {
        return Err(NotifyError::Rejected {
            channel: channel.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(())
}
