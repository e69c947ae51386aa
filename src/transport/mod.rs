//! Publish/subscribe transport between room members.
//!
//! The game never talks to a specific peer. Everything rides on topics scoped
//! by room code: intents on the actions topic, canonical snapshots on the
//! state topic. [`PubSub`] abstracts the broker so the service layer works
//! the same against the in-process broker used in tests and the WebSocket
//! broker used in production.

mod memory;
mod websocket;

pub use memory::InMemoryBroker;
pub use websocket::{BrokerClient, BrokerOptions};

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Errors that can occur while talking to the broker.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The broker is unreachable or the connection dropped mid-operation.
    #[error("network error: {0}")]
    Network(String),

    /// The broker refused the connection or a topic operation.
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// The connection was closed and will not be reopened.
    #[error("connection closed")]
    Closed,

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Delivery guarantee requested for a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    /// Fire and forget. Used for draft updates, where losing one is fine.
    AtMostOnce,
    /// Queued and retried across reconnects. Used for every state-affecting
    /// message.
    AtLeastOnce,
}

/// A message delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct TopicMessage {
    pub topic: String,
    pub payload: String,
}

/// A channel-backed stream of messages for one subscribed topic.
///
/// `recv` is cancel-safe, so it can sit inside `tokio::select!` without
/// losing messages.
pub struct Subscription {
    receiver: mpsc::Receiver<TopicMessage>,
}

impl Subscription {
    pub(crate) fn new(receiver: mpsc::Receiver<TopicMessage>) -> Self {
        Self { receiver }
    }

    /// Next message on this topic, or `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<TopicMessage> {
        self.receiver.recv().await
    }
}

/// Topic-scoped publish/subscribe messaging.
#[async_trait]
pub trait PubSub: Send + Sync + 'static {
    async fn publish(&self, topic: &str, payload: String, qos: QoS)
        -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError>;

    /// Gracefully shut the connection down. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;
}
