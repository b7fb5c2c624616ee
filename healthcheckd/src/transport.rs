//! Message transport the intake dispatcher consumes from.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The subscription has ended; no further messages will arrive
    #[error("subscription closed")]
    Closed,

    /// A read failed; the next read may succeed. The local topic never
    /// fails a read, so only test sources build this.
    #[cfg(test)]
    #[error("receive failed: {0}")]
    Receive(String),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("topic {0} is full")]
    Full(String),

    #[error("topic {0} has no subscriber")]
    Closed(String),
}

#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Wait for the next raw message, without timeout
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;
}

/// Bounded in-process topic with a single subscription.
pub struct LocalTopic;

impl LocalTopic {
    pub fn new(name: &str, capacity: usize) -> (TopicPublisher, TopicSubscription) {
        let (tx, rx) = flume::bounded(capacity);
        (
            TopicPublisher {
                topic: name.to_string(),
                tx,
            },
            TopicSubscription { rx },
        )
    }
}

#[derive(Clone)]
pub struct TopicPublisher {
    topic: String,
    tx: flume::Sender<Vec<u8>>,
}

impl TopicPublisher {
    /// Publish without waiting; a full topic is reported to the caller
    pub fn publish(&self, payload: Vec<u8>) -> Result<(), PublishError> {
        self.tx.try_send(payload).map_err(|e| match e {
            flume::TrySendError::Full(_) => PublishError::Full(self.topic.clone()),
            flume::TrySendError::Disconnected(_) => PublishError::Closed(self.topic.clone()),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

pub struct TopicSubscription {
    rx: flume::Receiver<Vec<u8>>,
}

#[async_trait]
impl SignalSource for TopicSubscription {
    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        self.rx
            .recv_async()
            .await
            .map_err(|_| TransportError::Closed)
    }
}
