use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// One human-readable progress line emitted while an extraction run works.
/// Transient: consumed by whatever transport relays it, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl ProgressEvent {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// Cheap clonable sink the orchestrator pushes progress events into.
/// With no sender attached (the synchronous `extract` path) emission is a
/// no-op; a dropped receiver likewise turns emission into a no-op rather
/// than an error, so a disconnecting listener never fails the run.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    sender: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub async fn emit(&self, message: impl Into<String>) {
        let event = ProgressEvent::now(message);
        debug!(progress = %event.message, "extraction progress");
        if let Some(sender) = &self.sender {
            // Receiver gone means the caller stopped listening; keep going.
            let _ = sender.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_in_order() {
        let (sink, mut receiver) = ProgressSink::channel(8);
        sink.emit("first").await;
        sink.emit("second").await;
        drop(sink);
        assert_eq!(receiver.recv().await.unwrap().message, "first");
        assert_eq!(receiver.recv().await.unwrap().message, "second");
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_receiver_is_tolerated() {
        let (sink, receiver) = ProgressSink::channel(1);
        drop(receiver);
        sink.emit("nobody listening").await;
    }
}
