// src/error.rs
//! Error taxonomy of the feed pipeline.
//!
//! Every stage absorbs its own failures: feed errors stay inside the adapter,
//! store errors are logged as lost hits, notification errors are counted.
//! Nothing here is fatal to the process.

use std::time::Duration;
use thiserror::Error;

/// Failures while acquiring or normalizing items from one external source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Transient network or document-level parse failure. Retried with backoff.
    #[error("feed `{source_tag}` unreachable: {message}")]
    Connection { source_tag: String, message: String },

    /// The request did not finish inside the configured bound. Retried with backoff.
    #[error("feed `{source_tag}` timed out after {after:?}")]
    Timeout { source_tag: String, after: Duration },

    /// A single item could not be normalized. Dropped, never retried.
    #[error("malformed item from `{source_tag}`: {reason}")]
    Malformed { source_tag: String, reason: String },
}

impl FeedError {
    pub fn connection(source_tag: &str, message: impl std::fmt::Display) -> Self {
        Self::Connection {
            source_tag: source_tag.to_string(),
            message: message.to_string(),
        }
    }

    pub fn malformed(source_tag: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            source_tag: source_tag.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the adapter should back off and try again.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Malformed { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("store is full ({max} live hits)")]
    CapacityExceeded { max: usize },
}

/// Failure of one channel for one hit. Terminal for that pair.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("channel `{channel}` timed out after {after:?}")]
    Timeout { channel: String, after: Duration },

    #[error("channel `{channel}` transport error: {message}")]
    Transport { channel: String, message: String },

    #[error("channel `{channel}` rejected the message with status {status}")]
    Rejected { channel: String, status: u16 },

    #[error("channel `{channel}` misconfigured: {message}")]
    Config { channel: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_malformed_is_not_transient() {
        assert!(FeedError::connection("doj", "refused").is_transient());
        assert!(FeedError::Timeout {
            source_tag: "doj".into(),
            after: Duration::from_secs(3)
        }
        .is_transient());
        assert!(!FeedError::malformed("doj", "no id").is_transient());
    }

    #[test]
    fn messages_name_the_source() {
        let e = FeedError::malformed("courtlistener", "missing id and url");
        assert_eq!(
            e.to_string(),
            "malformed item from `courtlistener`: missing id and url"
        );
    }
}
