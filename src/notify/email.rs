use anyhow::{anyhow, Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};
use std::time::Duration;

use super::{Notification, NotificationChannel};
use crate::error::NotifyError;

pub struct EmailChannel {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailChannel {
    /// `host` is the SMTP relay; `credentials` is `user:pass`.
    pub fn new(
        host: &str,
        credentials: Option<&str>,
        from: &str,
        to: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .with_context(|| format!("invalid SMTP host `{host}`"))?
            .timeout(Some(timeout));
        if let Some(raw) = credentials {
            let (user, pass) = raw
                .split_once(':')
                .ok_or_else(|| anyhow!("email credentials must be `user:pass`"))?;
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }

        let from = from.parse().context("invalid email `from` address")?;
        let to = to.parse().context("invalid email `to` address")?;

        Ok(Self {
            mailer: builder.build(),
            from,
            to,
        })
    }

    fn build_message(&self, n: &Notification) -> Result<Message, NotifyError> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(format!("Feed alert: {}", n.title))
            .header(header::ContentType::TEXT_PLAIN)
            .body(format!("{}\n\n{}\n", n.body, n.link))
            .map_err(|e| NotifyError::Config {
                channel: "email".to_string(),
                message: e.to_string(),
            })
    }
}

#[async_trait::async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        let msg = self.build_message(n)?;
        self.mailer
            .send(msg)
            .await
            .map_err(|e| NotifyError::Transport {
                channel: "email".to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}
