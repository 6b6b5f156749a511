//! Cloud connection: owns the data transport and dispatches its events
//!
//! Control messages addressed to this device whose app id has a registered
//! handler go to the [`RequestRouter`], one at a time and in arrival order.
//! All other messages fan out to the bound inbound endpoints (subscribers),
//! and connection-state events fan out to connection listeners.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use kura_core::{
    Envelope, JsonCodec, ManagedWorker, MessageType, ParsedTopic, PayloadCodec, StopOutcome,
    TopicCodec,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::listener::{ConnectionListener, ListenerSet};
use crate::router::{ReplyPublisher, RequestRouter, REPLY_PRIORITY, REPLY_QOS, REPLY_RETAIN};
use crate::transport::{
    create_transport, DataTransport, InboundMessage, MessageId, TransportError, TransportEvent,
};

/// A consumer of inbound data messages bound to a connection
pub trait InboundEndpoint: Send + Sync {
    /// Whether a message on this raw topic is meant for the endpoint
    fn accepts(&self, topic: &str) -> bool;

    fn deliver(&self, topic: &ParsedTopic, envelope: &Envelope, qos: u8, retain: bool);
}

/// Publishes router replies straight onto the transport
struct TransportReplies {
    transport: Arc<dyn DataTransport>,
    codec: Arc<dyn PayloadCodec>,
}

#[async_trait]
impl ReplyPublisher for TransportReplies {
    async fn publish_reply(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Result<MessageId, TransportError> {
        let payload = self
            .codec
            .encode(envelope)
            .map_err(|e| TransportError::Encoding(e.to_string()))?;
        self.transport
            .publish(topic, &payload, REPLY_QOS, REPLY_RETAIN, REPLY_PRIORITY)
            .await
    }
}

pub struct CloudConnection {
    name: String,
    transport: Arc<dyn DataTransport>,
    topics: TopicCodec,
    codec: Arc<dyn PayloadCodec>,
    control_qos: u8,
    router: Arc<RequestRouter>,
    endpoints: ListenerSet<dyn InboundEndpoint>,
    connection_listeners: ListenerSet<dyn ConnectionListener>,
    dispatcher: ManagedWorker,
}

impl CloudConnection {
    /// Build a connection around an existing transport
    pub fn new(
        config: &ConnectionConfig,
        transport: Arc<dyn DataTransport>,
        codec: Arc<dyn PayloadCodec>,
    ) -> Arc<Self> {
        let topics = TopicCodec::new(config.topics.clone());
        let replies = Arc::new(TransportReplies {
            transport: transport.clone(),
            codec: codec.clone(),
        });
        let router = Arc::new(RequestRouter::new(topics.clone(), replies));

        Arc::new(Self {
            name: config.name.clone(),
            transport,
            topics,
            codec,
            control_qos: config.control_qos,
            router,
            endpoints: ListenerSet::new(),
            connection_listeners: ListenerSet::new(),
            dispatcher: ManagedWorker::new(format!("cloud-dispatcher-{}", config.name)),
        })
    }

    /// Build a connection with the configured transport and the JSON codec
    pub fn from_config(config: &ConnectionConfig) -> Result<Arc<Self>, TransportError> {
        let transport = create_transport(&config.transport)?;
        Ok(Self::new(config, transport, Arc::new(JsonCodec)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topics(&self) -> &TopicCodec {
        &self.topics
    }

    pub fn router(&self) -> &Arc<RequestRouter> {
        &self.router
    }

    pub fn transport(&self) -> &Arc<dyn DataTransport> {
        &self.transport
    }

    /// Start dispatching, connect the transport and subscribe to this
    /// device's control topics
    pub async fn connect(self: &Arc<Self>) -> Result<(), TransportError> {
        self.start_dispatcher().await;
        self.transport.connect().await?;

        let filter = self.control_filter();
        self.transport.subscribe(&filter, self.control_qos).await?;
        info!(connection = %self.name, %filter, "Cloud connection established");
        Ok(())
    }

    /// Disconnect the transport; the dispatcher keeps running so listeners
    /// see the disconnect and later reconnects
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.transport.disconnect().await?;
        info!(connection = %self.name, "Cloud connection closed");
        Ok(())
    }

    /// Disconnect and stop the dispatcher
    pub async fn shutdown(&self) -> StopOutcome {
        if let Err(e) = self.disconnect().await {
            warn!(connection = %self.name, error = %e, "Disconnect during shutdown failed");
        }
        self.dispatcher.stop().await
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn connection_info(&self) -> HashMap<String, String> {
        let options = self.topics.options();
        let mut info = self.transport.info();
        info.insert("connection".to_string(), self.name.clone());
        info.insert("account".to_string(), options.account_name.clone());
        info.insert("client_id".to_string(), options.client_id.clone());
        info.insert("connected".to_string(), self.is_connected().to_string());
        info.insert(
            "handlers".to_string(),
            self.router.handler_ids().join(","),
        );
        info
    }

    /// Encode and publish an envelope
    pub async fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
        qos: u8,
        retain: bool,
        priority: u8,
    ) -> Result<MessageId, TransportError> {
        let payload = self
            .codec
            .encode(envelope)
            .map_err(|e| TransportError::Encoding(e.to_string()))?;
        self.transport
            .publish(topic, &payload, qos, retain, priority)
            .await
    }

    pub async fn subscribe(&self, topic: &str, qos: u8) -> Result<(), TransportError> {
        self.transport.subscribe(topic, qos).await
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.transport.unsubscribe(topic).await
    }

    pub fn register_endpoint(&self, endpoint: Arc<dyn InboundEndpoint>) -> bool {
        self.endpoints.register(endpoint)
    }

    pub fn unregister_endpoint(&self, endpoint: &Arc<dyn InboundEndpoint>) -> bool {
        self.endpoints.unregister(endpoint)
    }

    pub fn register_connection_listener(&self, listener: Arc<dyn ConnectionListener>) -> bool {
        self.connection_listeners.register(listener)
    }

    pub fn unregister_connection_listener(&self, listener: &Arc<dyn ConnectionListener>) -> bool {
        self.connection_listeners.unregister(listener)
    }

    fn control_filter(&self) -> String {
        let options = self.topics.options();
        self.topics.encode(
            MessageType::Control,
            &options.account_name,
            &options.client_id,
            "#",
            "",
        )
    }

    async fn start_dispatcher(self: &Arc<Self>) {
        if self.dispatcher.is_running() {
            return;
        }

        let mut events = self.transport.events();
        let weak: Weak<Self> = Arc::downgrade(self);
        let name = self.name.clone();

        let started = self
            .dispatcher
            .start(move |cancel| async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            // Deliver what is already queued before exiting
                            while let Ok(event) = events.try_recv() {
                                let Some(this) = weak.upgrade() else { break };
                                this.handle_event(event).await;
                            }
                            break;
                        }
                        received = events.recv() => match received {
                            Ok(event) => {
                                let Some(this) = weak.upgrade() else { break };
                                this.handle_event(event).await;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(connection = %name, skipped = n, "Transport event dispatcher lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                info!(connection = %name, "Transport event channel closed");
                                break;
                            }
                        }
                    }
                }
                debug!(connection = %name, "Dispatcher stopped");
            })
            .await;

        if let Err(e) = started {
            debug!(connection = %self.name, error = %e, "Dispatcher already running");
        }
    }

    async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::MessageArrived(message) => self.handle_message(message).await,
            TransportEvent::ConnectionEstablished => {
                info!(connection = %self.name, "Connection established");
                let filter = self.control_filter();
                if let Err(e) = self.transport.subscribe(&filter, self.control_qos).await {
                    warn!(connection = %self.name, %filter, error = %e, "Control subscription failed");
                }
                for listener in self.connection_listeners.snapshot() {
                    listener.on_connection_established();
                }
            }
            TransportEvent::ConnectionLost(cause) => {
                warn!(connection = %self.name, %cause, "Connection lost");
                for listener in self.connection_listeners.snapshot() {
                    listener.on_connection_lost(&cause);
                }
            }
            TransportEvent::Disconnected => {
                info!(connection = %self.name, "Disconnected");
                for listener in self.connection_listeners.snapshot() {
                    listener.on_disconnected();
                }
            }
        }
    }

    async fn handle_message(&self, message: InboundMessage) {
        let envelope = match self.codec.decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "Dropping undecodable message");
                return;
            }
        };

        let Some(parsed) = self.topics.parse(&message.topic) else {
            warn!(topic = %message.topic, "Dropping message on unrecognized topic");
            return;
        };

        if self.is_request(&parsed) {
            if let Err(e) = self
                .router
                .handle(&parsed.app_id, &parsed.app_topic, envelope)
                .await
            {
                error!(topic = %message.topic, error = %e, "Request handling failed");
            }
            return;
        }

        let mut delivered = false;
        for endpoint in self.endpoints.snapshot() {
            if endpoint.accepts(&message.topic) {
                endpoint.deliver(&parsed, &envelope, message.qos, message.retain);
                delivered = true;
            }
        }
        if !delivered {
            debug!(topic = %message.topic, "No endpoint accepted message");
        }
    }

    fn is_request(&self, topic: &ParsedTopic) -> bool {
        topic.message_type == MessageType::Control
            && topic.device_id == self.topics.options().client_id
            && self.router.is_registered(&topic.app_id)
    }
}
