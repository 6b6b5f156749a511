//! Cloud publisher bound to a connection

use std::sync::Arc;

use async_trait::async_trait;
use kura_core::{expand_placeholders, Envelope, Position};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{PositionMode, PublisherOptions};
use crate::connection::CloudConnection;
use crate::transport::{MessageId, TransportError};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PublishError {
    /// No connection bound, or the bound connection is down
    #[error("Not connected")]
    NotConnected,

    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for PublishError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => PublishError::NotConnected,
            other => PublishError::Transport(other),
        }
    }
}

/// Anything that can publish an envelope to the cloud
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, envelope: &Envelope) -> Result<MessageId, PublishError>;
}

/// Source of the device's current position
pub trait PositionProvider: Send + Sync {
    fn position(&self) -> Option<Position>;
}

/// Publishes envelopes under a configured app id and topic template
pub struct CloudPublisher {
    name: String,
    options: RwLock<PublisherOptions>,
    connection: RwLock<Option<Arc<CloudConnection>>>,
    position_provider: RwLock<Option<Arc<dyn PositionProvider>>>,
}

impl CloudPublisher {
    pub fn new(name: impl Into<String>, options: PublisherOptions) -> Self {
        Self {
            name: name.into(),
            options: RwLock::new(options),
            connection: RwLock::new(None),
            position_provider: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> PublisherOptions {
        self.options.read().clone()
    }

    /// Bind to a connection, replacing any previous binding
    pub fn bind(&self, connection: Arc<CloudConnection>) {
        info!(publisher = %self.name, connection = %connection.name(), "Publisher bound");
        *self.connection.write() = Some(connection);
    }

    pub fn unbind(&self) {
        if self.connection.write().take().is_some() {
            info!(publisher = %self.name, "Publisher unbound");
        }
    }

    pub fn is_bound(&self) -> bool {
        self.connection.read().is_some()
    }

    /// Replace the options; applies to the next publish
    pub fn update(&self, options: PublisherOptions) {
        debug!(publisher = %self.name, ?options, "Publisher options updated");
        *self.options.write() = options;
    }

    pub fn set_position_provider(&self, provider: Option<Arc<dyn PositionProvider>>) {
        *self.position_provider.write() = provider;
    }

    fn stamp_position(&self, mode: PositionMode, envelope: &mut Envelope) {
        if mode == PositionMode::None {
            return;
        }
        let provider = self.position_provider.read().clone();
        let Some(position) = provider.and_then(|p| p.position()) else {
            return;
        };
        envelope.position = Some(match mode {
            PositionMode::Basic => position.to_basic(),
            _ => position,
        });
    }
}

#[async_trait]
impl Publisher for CloudPublisher {
    async fn publish(&self, envelope: &Envelope) -> Result<MessageId, PublishError> {
        let connection = self
            .connection
            .read()
            .clone()
            .ok_or(PublishError::NotConnected)?;
        let options = self.options.read().clone();

        let mut envelope = envelope.clone();
        self.stamp_position(options.position, &mut envelope);

        let app_topic = expand_placeholders(&options.semantic_topic, &envelope);
        let topic = connection
            .topics()
            .encode_local(options.message_type, &options.app_id, &app_topic);

        let message_id = connection
            .publish(
                &topic,
                &envelope,
                options.qos,
                options.retain,
                options.priority,
            )
            .await?;
        debug!(publisher = %self.name, %topic, message_id, "Envelope published");
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, LoopbackConfig};
    use crate::transport::mock::MockDataTransport;
    use kura_core::{JsonCodec, MessageType, PayloadCodec, TopicOptions};

    struct FixedPosition;

    impl PositionProvider for FixedPosition {
        fn position(&self) -> Option<Position> {
            Some(Position {
                speed: Some(3.5),
                ..Position::basic(45.1, 9.2, 110.0)
            })
        }
    }

    async fn connected() -> (Arc<CloudConnection>, Arc<MockDataTransport>) {
        let transport = Arc::new(MockDataTransport::new(&LoopbackConfig::default()));
        let config = ConnectionConfig {
            topics: TopicOptions {
                account_name: "acme".into(),
                client_id: "gw-1".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let connection = CloudConnection::new(&config, transport.clone(), Arc::new(JsonCodec));
        connection.connect().await.unwrap();
        (connection, transport)
    }

    #[tokio::test]
    async fn unbound_publish_is_not_connected() {
        let publisher = CloudPublisher::new("p", PublisherOptions::default());
        let err = publisher.publish(&Envelope::new()).await.unwrap_err();
        assert_eq!(err, PublishError::NotConnected);
    }

    #[tokio::test]
    async fn topic_template_uses_metrics() {
        let (connection, transport) = connected().await;
        let publisher = CloudPublisher::new(
            "rooms",
            PublisherOptions {
                app_id: "climate".into(),
                semantic_topic: "rooms/$room".into(),
                qos: 1,
                ..Default::default()
            },
        );
        publisher.bind(connection.clone());

        let id = publisher
            .publish(&Envelope::new().with_metric("room", "kitchen"))
            .await
            .unwrap();

        let published = transport.published();
        assert_eq!(published[0].id, id);
        assert_eq!(published[0].topic, "acme/gw-1/climate/rooms/kitchen");
        assert_eq!(published[0].qos, 1);
        assert_eq!(published[0].priority, 7);
        connection.shutdown().await;
    }

    #[tokio::test]
    async fn control_message_type_uses_prefix() {
        let (connection, transport) = connected().await;
        let publisher = CloudPublisher::new(
            "ctl",
            PublisherOptions {
                message_type: MessageType::Control,
                ..Default::default()
            },
        );
        publisher.bind(connection.clone());
        publisher.publish(&Envelope::new()).await.unwrap();

        assert_eq!(transport.published()[0].topic, "$EDC/acme/gw-1/heater/data");
        connection.shutdown().await;
    }

    #[tokio::test]
    async fn basic_position_mode_strips_extras() {
        let (connection, transport) = connected().await;
        let publisher = CloudPublisher::new(
            "pos",
            PublisherOptions {
                position: PositionMode::Basic,
                ..Default::default()
            },
        );
        publisher.set_position_provider(Some(Arc::new(FixedPosition)));
        publisher.bind(connection.clone());
        publisher.publish(&Envelope::new()).await.unwrap();

        let sent = JsonCodec.decode(&transport.published()[0].payload).unwrap();
        let position = sent.position.unwrap();
        assert_eq!(position.latitude, Some(45.1));
        assert_eq!(position.speed, None);
        connection.shutdown().await;
    }

    #[tokio::test]
    async fn disconnected_transport_maps_to_not_connected() {
        let (connection, _transport) = connected().await;
        let publisher = CloudPublisher::new("p", PublisherOptions::default());
        publisher.bind(connection.clone());
        connection.disconnect().await.unwrap();

        let err = publisher.publish(&Envelope::new()).await.unwrap_err();
        assert_eq!(err, PublishError::NotConnected);

        publisher.unbind();
        assert!(!publisher.is_bound());
        connection.shutdown().await;
    }
}
