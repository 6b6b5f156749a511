//! Data transport trait and types

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::TransportError;

/// Identifier the transport assigns to a published message
pub type MessageId = u32;

/// A message delivered by the broker
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

/// Events emitted by a data transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    MessageArrived(InboundMessage),
    ConnectionEstablished,
    /// Connection dropped without being asked to; carries the cause
    ConnectionLost(String),
    /// Connection closed on request
    Disconnected,
}

/// Broker-facing publish/subscribe client (an MQTT client in production)
///
/// Reconnection is the transport's own business; it reports state changes
/// through [`events`](Self::events).
#[async_trait]
pub trait DataTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Publish raw payload bytes
    ///
    /// # Returns
    /// The message id assigned by the transport
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
        priority: u8,
    ) -> Result<MessageId, TransportError>;

    async fn subscribe(&self, topic: &str, qos: u8) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Subscribe to inbound messages and connection-state changes
    fn events(&self) -> broadcast::Receiver<TransportEvent>;

    /// Descriptive key/value pairs (broker address, client id, ...)
    fn info(&self) -> HashMap<String, String>;
}
