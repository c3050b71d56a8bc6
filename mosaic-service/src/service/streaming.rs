//! Delivery of generated text.
//!
//! The orchestrator writes chunks into a [`ChunkSink`]. In streaming mode the
//! sink is a bounded channel, so a slow reader pauses the engine instead of
//! growing a buffer. In aggregate mode the sink simply concatenates.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::engine::ChunkSink;
use crate::error::ServiceError;
use crate::models::AssetFailure;

/// Events observed by a streaming consumer. Exactly one of `Done` or
/// `Error` ends every stream.
#[derive(Debug)]
pub enum GenerationEvent {
    Chunk(String),
    Done {
        truncated: bool,
        asset_failures: Vec<AssetFailure>,
    },
    Error(ServiceError),
}

/// Forwards chunks over a bounded channel
pub struct ChannelSink {
    tx: mpsc::Sender<GenerationEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<GenerationEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ChunkSink for ChannelSink {
    async fn send(&mut self, chunk: String) -> bool {
        self.tx.send(GenerationEvent::Chunk(chunk)).await.is_ok()
    }
}

/// Buffers every chunk for a single final payload
#[derive(Debug, Default)]
pub struct CollectingSink {
    text: String,
    chunks: usize,
}

impl CollectingSink {
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

#[async_trait]
impl ChunkSink for CollectingSink {
    async fn send(&mut self, chunk: String) -> bool {
        self.chunks += 1;
        self.text.push_str(&chunk);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_collecting_sink_preserves_order() {
        let mut sink = CollectingSink::default();
        for chunk in ["Hel", "lo", ", ", "world"] {
            assert!(sink.send(chunk.to_string()).await);
        }
        assert_eq!(sink.chunks(), 4);
        assert_eq!(sink.into_text(), "Hello, world");
    }

    #[tokio::test]
    async fn test_channel_sink_applies_backpressure() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut sink = ChannelSink::new(tx);

        assert!(sink.send("a".to_string()).await);
        // The single slot is taken until the reader catches up
        let blocked = tokio::time::timeout(Duration::from_millis(50), sink.send("b".to_string())).await;
        assert!(blocked.is_err());

        assert!(matches!(rx.recv().await, Some(GenerationEvent::Chunk(c)) if c == "a"));
        assert!(sink.send("c".to_string()).await);
        assert!(matches!(rx.recv().await, Some(GenerationEvent::Chunk(c)) if c == "c"));
    }

    #[test]
    fn test_full_channel_parks_the_producer() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut sink = ChannelSink::new(tx);
        assert!(tokio_test::block_on(sink.send("a".to_string())));

        let mut second = tokio_test::task::spawn(sink.send("b".to_string()));
        tokio_test::assert_pending!(second.poll());

        assert!(matches!(rx.try_recv(), Ok(GenerationEvent::Chunk(c)) if c == "a"));
        assert!(second.is_woken());
        assert!(tokio_test::assert_ready!(second.poll()));
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_consumer() {
        let (tx, rx) = mpsc::channel(1);
        let mut sink = ChannelSink::new(tx);
        drop(rx);
        assert!(!sink.send("lost".to_string()).await);
    }
}
