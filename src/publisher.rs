use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::PublishError;

/// Outbound transport of a sink.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), PublishError>;

    /// Publishes a message that late subscribers should still receive.
    async fn announce(&self, topic: &str, payload: String) -> Result<(), PublishError> {
        self.publish(topic, payload).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
    pub retained: bool,
}

/// Keeps every message in memory instead of sending it anywhere.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    messages: Mutex<Vec<PublishedMessage>>,
    failing: bool,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher that rejects every message, like a sink whose broker is down.
    pub fn failing() -> Self {
        Self {
            messages: Mutex::default(),
            failing: true,
        }
    }

    pub async fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().await.clone()
    }

    pub async fn messages_for(&self, topic: &str) -> Vec<PublishedMessage> {
        self.messages
            .lock()
            .await
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }

    async fn record(&self, topic: &str, payload: String, retained: bool) -> Result<(), PublishError> {
        if self.failing {
            return Err(PublishError::Rejected(topic.to_string()));
        }
        self.messages.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            retained,
        });
        Ok(())
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), PublishError> {
        self.record(topic, payload, false).await
    }

    async fn announce(&self, topic: &str, payload: String) -> Result<(), PublishError> {
        self.record(topic, payload, true).await
    }
}
