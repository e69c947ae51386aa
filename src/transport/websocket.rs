use super::{PubSub, QoS, Subscription, TopicMessage, TransportError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Capacity of each subscriber's delivery channel.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

/// Connection settings for the broker.
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    pub url: String,
    /// Ping interval keeping NATed connections alive.
    pub keepalive: Duration,
    /// Base delay between reconnect attempts; doubles per attempt up to
    /// `max_backoff`.
    pub reconnect_period: Duration,
    pub connect_timeout: Duration,
    pub max_backoff: Duration,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3536/ws".to_string(),
            keepalive: Duration::from_secs(120),
            reconnect_period: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(30),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl BrokerOptions {
    /// Load options from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(url) = std::env::var("BROKER_URL").ok().and_then(|url| {
            let trimmed = url.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }) {
            options.url = url;
        }
        if let Some(secs) = std::env::var("BROKER_KEEPALIVE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            options.keepalive = Duration::from_secs(secs);
        }
        options
    }
}

/// Wire frames exchanged with the broker.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Frame {
    Subscribe { topic: String },
    Publish { topic: String, payload: String, qos: u8 },
    Message { topic: String, payload: String },
}

enum Command {
    Publish {
        topic: String,
        payload: String,
        qos: QoS,
    },
    Subscribe {
        topic: String,
        tx: mpsc::Sender<TopicMessage>,
    },
    Close,
}

/// WebSocket client for a topic broker.
///
/// A background driver task owns the socket. It re-issues subscriptions and
/// flushes queued at-least-once publishes after every reconnect, so callers
/// see a connection that heals itself as long as the broker comes back.
#[derive(Clone)]
pub struct BrokerClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl BrokerClient {
    /// Connect to the broker and spawn the driver task.
    pub async fn connect(options: BrokerOptions) -> Result<Self, TransportError> {
        let stream = dial(&options).await?;
        tracing::info!(url = %options.url, "connected to broker");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(stream, cmd_rx, options));
        Ok(Self { cmd_tx })
    }
}

#[async_trait]
impl PubSub for BrokerClient {
    async fn publish(
        &self,
        topic: &str,
        payload: String,
        qos: QoS,
    ) -> Result<(), TransportError> {
        self.cmd_tx
            .send(Command::Publish {
                topic: topic.to_string(),
                payload,
                qos,
            })
            .map_err(|_| TransportError::Closed)
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.cmd_tx
            .send(Command::Subscribe {
                topic: topic.to_string(),
                tx,
            })
            .map_err(|_| TransportError::Closed)?;
        Ok(Subscription::new(rx))
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Driver may already be gone; closing twice is fine.
        let _ = self.cmd_tx.send(Command::Close);
        Ok(())
    }
}

async fn dial(options: &BrokerOptions) -> Result<WsStream, TransportError> {
    match tokio::time::timeout(
        options.connect_timeout,
        tokio_tungstenite::connect_async(&options.url),
    )
    .await
    {
        Err(_) => Err(TransportError::Timeout(options.connect_timeout)),
        Ok(Err(e)) => Err(map_connect_error(e)),
        Ok(Ok((stream, _response))) => Ok(stream),
    }
}

fn map_connect_error(e: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error;
    match e {
        Error::Http(ref response)
            if response.status().as_u16() == 401 || response.status().as_u16() == 403 =>
        {
            TransportError::Unauthorized(format!("broker rejected handshake: {}", response.status()))
        }
        other => TransportError::Network(other.to_string()),
    }
}

fn encode(frame: &Frame) -> String {
    serde_json::to_string(frame).expect("broker frames always serialize")
}

async fn drive(
    mut stream: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    options: BrokerOptions,
) {
    let mut subscribers: HashMap<String, Vec<mpsc::Sender<TopicMessage>>> = HashMap::new();
    // At-least-once publishes waiting for a live socket.
    let mut backlog: VecDeque<String> = VecDeque::new();
    let mut keepalive = tokio::time::interval(options.keepalive);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    keepalive.reset();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(Command::Close) => {
                        let _ = stream.close(None).await;
                        return;
                    }
                    Some(Command::Subscribe { topic, tx }) => {
                        subscribers.entry(topic.clone()).or_default().push(tx);
                        let text = encode(&Frame::Subscribe { topic });
                        if stream.send(Message::Text(text.into())).await.is_err() {
                            // Subscriptions are replayed on reconnect, nothing lost.
                            stream = reconnect(&options, &subscribers, &mut backlog).await;
                        }
                    }
                    Some(Command::Publish { topic, payload, qos }) => {
                        let text = encode(&Frame::Publish {
                            topic,
                            payload,
                            qos: match qos {
                                QoS::AtMostOnce => 0,
                                QoS::AtLeastOnce => 1,
                            },
                        });
                        if stream.send(Message::Text(text.clone().into())).await.is_err() {
                            if qos == QoS::AtLeastOnce {
                                backlog.push_back(text);
                            }
                            stream = reconnect(&options, &subscribers, &mut backlog).await;
                        }
                    }
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(Frame::Message { topic, payload }) =
                            serde_json::from_str::<Frame>(&text)
                        {
                            dispatch(&mut subscribers, topic, payload).await;
                        } else {
                            tracing::debug!("ignoring unparseable broker frame");
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Binary(_) | Message::Frame(_))) => {
                        tracing::debug!("ignoring non-text broker frame");
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        tracing::warn!("broker connection lost, reconnecting");
                        stream = reconnect(&options, &subscribers, &mut backlog).await;
                    }
                }
            }
            _ = keepalive.tick() => {
                let _ = stream.send(Message::Ping(Vec::new().into())).await;
            }
        }
    }
}

async fn dispatch(
    subscribers: &mut HashMap<String, Vec<mpsc::Sender<TopicMessage>>>,
    topic: String,
    payload: String,
) {
    let Some(senders) = subscribers.get_mut(&topic) else {
        return;
    };
    senders.retain(|tx| !tx.is_closed());
    for tx in senders.iter() {
        let _ = tx
            .send(TopicMessage {
                topic: topic.clone(),
                payload: payload.clone(),
            })
            .await;
    }
}

/// Redial with exponential backoff (delay doubles per attempt up to
/// `max_backoff`), replay every subscription, then flush the at-least-once
/// backlog. Keeps trying until the broker comes back.
async fn reconnect(
    options: &BrokerOptions,
    subscribers: &HashMap<String, Vec<mpsc::Sender<TopicMessage>>>,
    backlog: &mut VecDeque<String>,
) -> WsStream {
    let mut delay = options.reconnect_period;
    loop {
        tokio::time::sleep(delay).await;
        match dial(options).await {
            Ok(mut stream) => {
                tracing::info!(url = %options.url, "reconnected to broker");
                let mut healthy = true;
                for topic in subscribers.keys() {
                    let text = encode(&Frame::Subscribe {
                        topic: topic.clone(),
                    });
                    if stream.send(Message::Text(text.into())).await.is_err() {
                        healthy = false;
                        break;
                    }
                }
                while healthy {
                    let Some(text) = backlog.pop_front() else {
                        break;
                    };
                    if stream.send(Message::Text(text.clone().into())).await.is_err() {
                        backlog.push_front(text);
                        healthy = false;
                    }
                }
                if healthy {
                    return stream;
                }
                // The fresh connection died mid-replay; count it as another
                // failed attempt.
            }
            Err(e) => {
                tracing::warn!(error = %e, "broker reconnect attempt failed");
            }
        }
        delay = (delay * 2).min(options.max_backoff);
    }
}
