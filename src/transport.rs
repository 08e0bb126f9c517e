//! Message bus seam.
//!
//! The simulator only needs subscribe/unsubscribe/publish plus a stream of inbound
//! events. [`crate::mqtt`] provides the broker-backed implementation;
//! [`MemoryTransport`] records calls for tests and local runs without a broker.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection to {host}:{port} failed: {reason}")]
    Connect { host: String, port: u16, reason: String },
    #[error("broker refused connection: {0}")]
    Refused(String),
    #[error("timed out waiting for broker acknowledgement")]
    ConnectTimeout,
    #[error("connection lost: {0}")]
    Connection(String),
    #[error("subscribe to '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },
    #[error("unsubscribe from '{topic}' failed: {reason}")]
    Unsubscribe { topic: String, reason: String },
    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// The broker accepted a (re)connection. Sessions are clean, so every
    /// subscription has to be issued again.
    Connected,
    Message(InboundMessage),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;
    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), TransportError>;
}

/// Source of inbound bus events. `Ok(None)` means the stream has ended.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Result<Option<BusEvent>, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Subscribe(String),
    Unsubscribe(String),
    Publish { topic: String, payload: String, retain: bool },
}

#[derive(Debug, Default)]
struct Recorder {
    calls: Vec<TransportCall>,
    failing_topics: HashSet<String>,
}

/// In-process transport that records every call in order.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    inner: Mutex<Recorder>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn recorder(&self) -> std::sync::MutexGuard<'_, Recorder> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every later publish to `topic` fail.
    pub fn fail_publishes_to(&self, topic: impl Into<String>) {
        self.recorder().failing_topics.insert(topic.into());
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.recorder().calls.clone()
    }

    pub fn clear(&self) {
        self.recorder().calls.clear();
    }

    pub fn published(&self) -> Vec<(String, String, bool)> {
        self.recorder()
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Publish { topic, payload, retain } => {
                    Some((topic.clone(), payload.clone(), *retain))
                }
                _ => None,
            })
            .collect()
    }

    /// Topics currently subscribed after replaying subscribe/unsubscribe calls.
    pub fn active_subscriptions(&self) -> HashSet<String> {
        let mut active = HashSet::new();
        for call in &self.recorder().calls {
            match call {
                TransportCall::Subscribe(topic) => {
                    active.insert(topic.clone());
                }
                TransportCall::Unsubscribe(topic) => {
                    active.remove(topic);
                }
                TransportCall::Publish { .. } => {}
            }
        }
        active
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.recorder().calls.push(TransportCall::Subscribe(topic.to_string()));
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.recorder().calls.push(TransportCall::Unsubscribe(topic.to_string()));
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), TransportError> {
        let mut recorder = self.recorder();
        if recorder.failing_topics.contains(topic) {
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        recorder.calls.push(TransportCall::Publish {
            topic: topic.to_string(),
            payload,
            retain,
        });
        Ok(())
    }
}

/// Event source fed from a channel.
///
/// Unbounded so the producer never waits on the consumer: the MQTT pump must keep
/// polling the connection while the simulator is busy publishing.
#[derive(Debug)]
pub struct ChannelEvents {
    rx: mpsc::UnboundedReceiver<BusEvent>,
}

impl ChannelEvents {
    pub fn new() -> (mpsc::UnboundedSender<BusEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl EventSource for ChannelEvents {
    async fn next_event(&mut self) -> Result<Option<BusEvent>, TransportError> {
        Ok(self.rx.recv().await)
    }
}
