// src/ingest/providers/push.rs
//! Stream provider fed by an external producer (webhook receiver, message
//! consumer, test harness). The producer holds a `PushHandle`; the adapter
//! owns the `PushStream` end.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::FeedError;
use crate::ingest::types::{RawItem, StreamProvider};

pub struct PushStream {
    source_tag: String,
    rx: mpsc::Receiver<RawItem>,
}

#[derive(Clone)]
pub struct PushHandle {
    source_tag: String,
    tx: mpsc::Sender<RawItem>,
}

impl PushStream {
    /// `capacity` bounds how many undelivered items a producer may queue.
    pub fn new(source_tag: &str, capacity: usize) -> (Self, PushHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                source_tag: source_tag.to_string(),
                rx,
            },
            PushHandle {
                source_tag: source_tag.to_string(),
                tx,
            },
        )
    }
}

impl PushHandle {
    pub fn source_tag(&self) -> &str {
        &self.source_tag
    }

    /// Queue an item, waiting for room.
    pub async fn push(&self, item: RawItem) -> Result<(), FeedError> {
        self.tx
            .send(item)
            .await
            .map_err(|_| FeedError::connection(&self.source_tag, "stream closed"))
    }

    /// Queue an item without waiting; fails when the stream is saturated.
    pub fn try_push(&self, item: RawItem) -> Result<(), FeedError> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                FeedError::connection(&self.source_tag, "stream backlog full")
            }
            mpsc::error::TrySendError::Closed(_) => {
                FeedError::connection(&self.source_tag, "stream closed")
            }
        })
    }
}

#[async_trait]
impl StreamProvider for PushStream {
    async fn connect(&mut self) -> Result<(), FeedError> {
        if self.rx.is_closed() && self.rx.is_empty() {
            return Err(FeedError::connection(&self.source_tag, "no producers left"));
        }
        Ok(())
    }

    async fn next_item(&mut self) -> Option<Result<RawItem, FeedError>> {
        self.rx.recv().await.map(Ok)
    }

    fn name(&self) -> &str {
        &self.source_tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pushed_items_come_out_in_order() {
        let (mut stream, handle) = PushStream::new("wire", 4);
        stream.connect().await.unwrap();
        for i in 0..3 {
            handle
                .push(RawItem {
                    external_id: Some(i.to_string()),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        for i in 0..3 {
            let got = stream.next_item().await.unwrap().unwrap();
            assert_eq!(got.external_id, Some(i.to_string()));
        }
    }

    #[tokio::test]
    async fn try_push_reports_backlog() {
        let (_stream, handle) = PushStream::new("wire", 1);
        handle.try_push(RawItem::default()).unwrap();
        assert!(handle.try_push(RawItem::default()).is_err());
    }

    #[tokio::test]
    async fn stream_ends_when_producers_drop() {
        let (mut stream, handle) = PushStream::new("wire", 1);
        drop(handle);
        assert!(stream.next_item().await.is_none());
        assert!(stream.connect().await.is_err());
    }
}
