//! In-memory loopback transport for testing and demos
//!
//! Behaves like a single-client broker: publishes are recorded and echoed
//! back as inbound messages when they match one of the client's own
//! subscriptions, and [`inject`](MockDataTransport::inject) plays the role
//! of a remote party publishing to the device.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kura_core::topic_matches;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::{DataTransport, InboundMessage, MessageId, TransportError, TransportEvent};
use crate::config::LoopbackConfig;

/// A message recorded by the mock transport
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub id: MessageId,
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
    pub priority: u8,
}

pub struct MockDataTransport {
    config: LoopbackConfig,
    connected: AtomicBool,
    fail_publish: AtomicBool,
    fail_unsubscribe: AtomicBool,
    next_id: AtomicU32,
    subscriptions: RwLock<Vec<(String, u8)>>,
    /// Most recent publishes, bounded by `LoopbackConfig::history`
    published: RwLock<VecDeque<PublishedMessage>>,
    events_tx: broadcast::Sender<TransportEvent>,
    published_tx: broadcast::Sender<PublishedMessage>,
}

impl MockDataTransport {
    pub fn new(config: &LoopbackConfig) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        let (published_tx, _) = broadcast::channel(1024);
        Self {
            config: config.clone(),
            connected: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            fail_unsubscribe: AtomicBool::new(false),
            next_id: AtomicU32::new(1),
            subscriptions: RwLock::new(Vec::new()),
            published: RwLock::new(VecDeque::new()),
            events_tx,
            published_tx,
        }
    }

    /// Deliver a message as if another client had published it.
    /// Returns false when no subscription matches (nothing delivered).
    pub fn inject(&self, topic: &str, payload: Vec<u8>) -> bool {
        if !self.is_subscribed(topic) {
            tracing::debug!(%topic, "Mock transport: no subscription matches injected topic");
            return false;
        }
        let _ = self
            .events_tx
            .send(TransportEvent::MessageArrived(InboundMessage {
                topic: topic.to_string(),
                payload,
                qos: 0,
                retain: false,
            }));
        true
    }

    /// Simulate the broker connection coming up or dropping
    pub fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        let event = match (was, connected) {
            (false, true) => TransportEvent::ConnectionEstablished,
            (true, false) => TransportEvent::ConnectionLost("simulated link loss".to_string()),
            _ => return,
        };
        let _ = self.events_tx.send(event);
    }

    /// Make subsequent publishes fail
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent unsubscribes fail
    pub fn set_fail_unsubscribe(&self, fail: bool) {
        self.fail_unsubscribe.store(fail, Ordering::SeqCst);
    }

    /// Recorded publishes, oldest first
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.read().iter().cloned().collect()
    }

    /// Stream of messages as they are published
    pub fn published_stream(&self) -> broadcast::Receiver<PublishedMessage> {
        self.published_tx.subscribe()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .read()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions
            .read()
            .iter()
            .any(|(filter, _)| topic_matches(filter, topic))
    }

    async fn simulate_latency(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
    }
}

#[async_trait]
impl DataTransport for MockDataTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.simulate_latency().await;
        self.set_connected(true);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.events_tx.send(TransportEvent::Disconnected);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
        priority: u8,
    ) -> Result<MessageId, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed(
                "mock publish failure".to_string(),
            ));
        }
        self.simulate_latency().await;

        let message = PublishedMessage {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
            priority,
        };
        tracing::debug!(%topic, message_id = message.id, "Mock transport: published");

        {
            let mut published = self.published.write();
            if self.config.history > 0 {
                if published.len() == self.config.history {
                    published.pop_front();
                }
                published.push_back(message.clone());
            }
        }
        let _ = self.published_tx.send(message.clone());

        if self.is_subscribed(topic) {
            let _ = self
                .events_tx
                .send(TransportEvent::MessageArrived(InboundMessage {
                    topic: message.topic,
                    payload: message.payload,
                    qos,
                    retain,
                }));
        }

        Ok(message.id)
    }

    async fn subscribe(&self, topic: &str, qos: u8) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let mut subscriptions = self.subscriptions.write();
        match subscriptions.iter_mut().find(|(filter, _)| filter.as_str() == topic) {
            Some(existing) => existing.1 = qos,
            None => subscriptions.push((topic.to_string(), qos)),
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(TransportError::SubscribeFailed(format!(
                "mock unsubscribe failure for {}",
                topic
            )));
        }
        self.subscriptions
            .write()
            .retain(|(filter, _)| filter.as_str() != topic);
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events_tx.subscribe()
    }

    fn info(&self) -> HashMap<String, String> {
        let mut info = HashMap::new();
        info.insert("broker".to_string(), self.config.broker_url.clone());
        info.insert(
            "subscriptions".to_string(),
            self.subscriptions.read().len().to_string(),
        );
        info
    }
}
