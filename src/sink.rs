//! Sinks for streaming queries
//!
//! Streaming calls push each item or error into a [`QuerySink`] as soon as it
//! is produced. The sink decides how much to buffer.

use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

use crate::error::QueryError;
use crate::item::Item;

/// Receiver of streamed results. Called from the page-fetching task.
pub trait QuerySink: Send + Sync {
    fn send_item(&self, item: Item);
    fn send_error(&self, error: QueryError);
}

/// One streamed result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEvent {
    Item(Item),
    Error(QueryError),
}

/// Forwards results to a channel consumed on another task
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl QuerySink for ChannelSink {
    fn send_item(&self, item: Item) {
        if self.tx.send(StreamEvent::Item(item)).is_err() {
            tracing::debug!("stream receiver dropped, discarding item");
        }
    }

    fn send_error(&self, error: QueryError) {
        if self.tx.send(StreamEvent::Error(error)).is_err() {
            tracing::debug!("stream receiver dropped, discarding error");
        }
    }
}

/// Keeps everything it receives, in order
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<StreamEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn items(&self) -> Vec<Item> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::Item(item) => Some(item),
                StreamEvent::Error(_) => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<QueryError> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::Error(err) => Some(err),
                StreamEvent::Item(_) => None,
            })
            .collect()
    }

    fn push(&self, event: StreamEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl QuerySink for CollectingSink {
    fn send_item(&self, item: Item) {
        self.push(StreamEvent::Item(item));
    }

    fn send_error(&self, error: QueryError) {
        self.push(StreamEvent::Error(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn item(name: &str) -> Item {
        Item::from_record("t", "name", name, "global", &json!({}), "labels")
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.send_item(item("a"));
        sink.send_error(QueryError::not_found("gone", "global", "t"));
        drop(sink);

        assert!(matches!(rx.recv().await, Some(StreamEvent::Item(i)) if i.unique_attribute_value == "a"));
        assert!(matches!(rx.recv().await, Some(StreamEvent::Error(e)) if e.kind == ErrorKind::NotFound));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_channel_sink_tolerates_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.send_item(item("a"));
    }
}
