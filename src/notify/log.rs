use super::{Notification, NotificationChannel};
use crate::error::NotifyError;

/// Writes alerts to the tracing log. Useful as a default and in demos.
#[derive(Debug, Default)]
pub struct LogChannel;

#[async_trait::async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        tracing::info!(target: "notify", title = %n.title, link = %n.link, "feed alert");
        Ok(())
    }
}
