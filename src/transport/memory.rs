use super::{PubSub, QoS, Subscription, TopicMessage, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Capacity of each subscriber's delivery channel.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

/// In-process broker routing messages between clients of the same process.
///
/// Backs the test suite and local hot-seat play. Cloning yields another
/// handle onto the same topic registry, so every clone sees every publish.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    topics: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<TopicMessage>>>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client handle sharing this broker's topic registry.
    pub fn client(&self) -> Self {
        self.clone()
    }
}

#[async_trait]
impl PubSub for InMemoryBroker {
    async fn publish(
        &self,
        topic: &str,
        payload: String,
        _qos: QoS,
    ) -> Result<(), TransportError> {
        let senders: Vec<mpsc::Sender<TopicMessage>> = {
            let mut topics = self.topics.lock().await;
            match topics.get_mut(topic) {
                Some(subscribers) => {
                    subscribers.retain(|tx| !tx.is_closed());
                    subscribers.clone()
                }
                None => Vec::new(),
            }
        };

        for tx in senders {
            let message = TopicMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            // A dropped subscriber is not an error for the publisher.
            let _ = tx.send(message).await;
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.topics
            .lock()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(rx))
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
