//! Cloud subscriber: a topic subscription on a connection with listener fan-out

use std::sync::{Arc, Weak};

use kura_core::{topic_matches_with, Envelope, ParsedTopic};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SubscriberOptions;
use crate::connection::{CloudConnection, InboundEndpoint};
use crate::listener::{ConnectionListener, ListenerSet, MessageProperties, SubscriberListener};
use crate::transport::TransportError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SubscribeError {
    #[error("Subscriber is not bound to a connection")]
    NotBound,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

struct Binding {
    connection: Arc<CloudConnection>,
    /// Full topic currently subscribed on the transport
    subscribed: Option<String>,
}

/// Topic filter matched against inbound topics, split on the connection's separator
struct ActiveFilter {
    topic: String,
    separator: String,
}

impl ActiveFilter {
    fn for_connection(connection: &CloudConnection, topic: String) -> Self {
        Self {
            topic,
            separator: connection.topics().options().separator.clone(),
        }
    }
}

/// Subscribes to one topic filter and fans messages out to its listeners.
///
/// Always handled through an `Arc` (see [`CloudSubscriber::new`]) because
/// the subscriber registers itself with the connection it is bound to.
pub struct CloudSubscriber {
    name: String,
    me: Weak<CloudSubscriber>,
    options: RwLock<SubscriberOptions>,
    binding: Mutex<Option<Binding>>,
    /// Filter used to match inbound topics; mirrors the active binding
    filter: RwLock<Option<ActiveFilter>>,
    listeners: ListenerSet<dyn SubscriberListener>,
    connection_listeners: ListenerSet<dyn ConnectionListener>,
}

impl CloudSubscriber {
    pub fn new(name: impl Into<String>, options: SubscriberOptions) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|me| Self {
            name,
            me: me.clone(),
            options: RwLock::new(options),
            binding: Mutex::new(None),
            filter: RwLock::new(None),
            listeners: ListenerSet::new(),
            connection_listeners: ListenerSet::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> SubscriberOptions {
        self.options.read().clone()
    }

    pub fn register(&self, listener: Arc<dyn SubscriberListener>) -> bool {
        self.listeners.register(listener)
    }

    pub fn unregister(&self, listener: &Arc<dyn SubscriberListener>) -> bool {
        self.listeners.unregister(listener)
    }

    pub fn register_connection_listener(&self, listener: Arc<dyn ConnectionListener>) -> bool {
        self.connection_listeners.register(listener)
    }

    pub fn unregister_connection_listener(&self, listener: &Arc<dyn ConnectionListener>) -> bool {
        self.connection_listeners.unregister(listener)
    }

    /// Full topic this subscriber currently listens on, if bound
    pub fn subscribed_topic(&self) -> Option<String> {
        self.filter.read().as_ref().map(|f| f.topic.clone())
    }

    /// Bind to `connection` and subscribe there.
    ///
    /// An existing binding is released first (unsubscribed, deregistered).
    /// A failed transport subscription keeps the binding; it is retried when
    /// the connection is re-established.
    pub async fn bind(&self, connection: Arc<CloudConnection>) {
        let mut binding = self.binding.lock().await;
        if let Some(old) = binding.take() {
            self.release(old).await;
        }

        if let Some(this) = self.me.upgrade() {
            connection.register_endpoint(this.clone());
            connection.register_connection_listener(this);
        }

        let topic = self.topic_for(&connection);
        *self.filter.write() = Some(ActiveFilter::for_connection(&connection, topic.clone()));
        let mut new_binding = Binding {
            connection,
            subscribed: None,
        };
        self.subscribe_binding(&mut new_binding, &topic).await;
        info!(
            subscriber = %self.name,
            connection = %new_binding.connection.name(),
            %topic,
            "Subscriber bound"
        );
        *binding = Some(new_binding);
    }

    pub async fn unbind(&self) {
        if let Some(old) = self.binding.lock().await.take() {
            self.release(old).await;
            info!(subscriber = %self.name, "Subscriber unbound");
        }
    }

    pub async fn is_bound(&self) -> bool {
        self.binding.lock().await.is_some()
    }

    /// Apply new options, moving the subscription to the new topic
    ///
    /// A failed unsubscribe of the old topic is logged and does not stop the
    /// move. When the new subscription fails the subscriber still filters on
    /// the new topic and the subscription is retried on reconnect.
    pub async fn update(&self, options: SubscriberOptions) -> Result<(), SubscribeError> {
        let mut binding = self.binding.lock().await;
        *self.options.write() = options;

        let Some(binding) = binding.as_mut() else {
            return Ok(());
        };
        if let Some(old) = binding.subscribed.take() {
            if let Err(e) = binding.connection.unsubscribe(&old).await {
                warn!(subscriber = %self.name, topic = %old, error = %e, "Unsubscribe of previous topic failed");
            }
        }
        let topic = self.topic_for(&binding.connection);
        *self.filter.write() = Some(ActiveFilter::for_connection(
            &binding.connection,
            topic.clone(),
        ));
        let qos = self.options.read().qos;
        binding.connection.subscribe(&topic, qos).await?;
        binding.subscribed = Some(topic);
        Ok(())
    }

    /// Re-issue the subscription on the bound connection
    pub async fn resubscribe(&self) -> Result<(), SubscribeError> {
        let mut binding = self.binding.lock().await;
        let binding = binding.as_mut().ok_or(SubscribeError::NotBound)?;
        let topic = self.topic_for(&binding.connection);
        let qos = self.options.read().qos;
        binding.connection.subscribe(&topic, qos).await?;
        debug!(subscriber = %self.name, %topic, "Subscription re-issued");
        binding.subscribed = Some(topic);
        Ok(())
    }

    fn topic_for(&self, connection: &CloudConnection) -> String {
        let options = self.options.read();
        connection
            .topics()
            .encode_local(options.message_type, &options.app_id, &options.app_topic)
    }

    async fn subscribe_binding(&self, binding: &mut Binding, topic: &str) {
        let qos = self.options.read().qos;
        match binding.connection.subscribe(topic, qos).await {
            Ok(()) => binding.subscribed = Some(topic.to_string()),
            Err(e) => {
                warn!(subscriber = %self.name, %topic, error = %e, "Subscribe failed, will retry on reconnect")
            }
        }
    }

    async fn release(&self, binding: Binding) {
        if let Some(topic) = binding.subscribed {
            if let Err(e) = binding.connection.unsubscribe(&topic).await {
                warn!(subscriber = %self.name, %topic, error = %e, "Unsubscribe failed");
            }
        }
        if let Some(this) = self.me.upgrade() {
            let endpoint: Arc<dyn InboundEndpoint> = this.clone();
            let listener: Arc<dyn ConnectionListener> = this;
            binding.connection.unregister_endpoint(&endpoint);
            binding.connection.unregister_connection_listener(&listener);
        }
        *self.filter.write() = None;
    }
}

impl InboundEndpoint for CloudSubscriber {
    fn accepts(&self, topic: &str) -> bool {
        self.filter
            .read()
            .as_ref()
            .is_some_and(|filter| topic_matches_with(&filter.topic, topic, &filter.separator))
    }

    fn deliver(&self, topic: &ParsedTopic, envelope: &Envelope, qos: u8, retain: bool) {
        let properties = MessageProperties {
            device_id: topic.device_id.clone(),
            app_id: topic.app_id.clone(),
            app_topic: topic.app_topic.clone(),
            qos,
            retain,
        };
        for listener in self.listeners.snapshot() {
            listener.on_message_arrived(&properties, envelope);
        }
    }
}

impl ConnectionListener for CloudSubscriber {
    fn on_connection_established(&self) {
        if let Some(this) = self.me.upgrade() {
            tokio::spawn(async move {
                if let Err(e) = this.resubscribe().await {
                    warn!(subscriber = %this.name, error = %e, "Resubscribe after reconnect failed");
                }
            });
        }
        for listener in self.connection_listeners.snapshot() {
            listener.on_connection_established();
        }
    }

    fn on_connection_lost(&self, cause: &str) {
        for listener in self.connection_listeners.snapshot() {
            listener.on_connection_lost(cause);
        }
    }

    fn on_disconnected(&self) {
        for listener in self.connection_listeners.snapshot() {
            listener.on_disconnected();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, LoopbackConfig};
    use crate::transport::mock::MockDataTransport;
    use crate::transport::DataTransport;
    use kura_core::{JsonCodec, PayloadCodec, TopicOptions};
    use parking_lot::Mutex as SyncMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Inbox {
        received: SyncMutex<Vec<(MessageProperties, Envelope)>>,
    }

    impl SubscriberListener for Inbox {
        fn on_message_arrived(&self, properties: &MessageProperties, envelope: &Envelope) {
            self.received
                .lock()
                .push((properties.clone(), envelope.clone()));
        }
    }

    async fn connection(
        name: &str,
    ) -> (Arc<CloudConnection>, Arc<MockDataTransport>) {
        connection_with(
            name,
            TopicOptions {
                account_name: "acme".into(),
                client_id: "gw-1".into(),
                ..Default::default()
            },
        )
        .await
    }

    async fn connection_with(
        name: &str,
        topics: TopicOptions,
    ) -> (Arc<CloudConnection>, Arc<MockDataTransport>) {
        let transport = Arc::new(MockDataTransport::new(&LoopbackConfig::default()));
        let config = ConnectionConfig {
            name: name.into(),
            topics,
            ..Default::default()
        };
        let connection = CloudConnection::new(&config, transport.clone(), Arc::new(JsonCodec));
        connection.connect().await.unwrap();
        (connection, transport)
    }

    fn options() -> SubscriberOptions {
        SubscriberOptions {
            app_id: "serial".into(),
            app_topic: "out/#".into(),
            ..Default::default()
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn delivers_with_topic_properties() {
        let (connection, transport) = connection("a").await;
        let subscriber = CloudSubscriber::new("s", options());
        let inbox = Arc::new(Inbox::default());
        subscriber.register(inbox.clone());
        subscriber.bind(connection.clone()).await;

        let payload = JsonCodec
            .encode(&Envelope::new().with_body("AT\r\n"))
            .unwrap();
        assert!(transport.inject("acme/gw-1/serial/out/port0", payload));
        settle().await;

        let received = inbox.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0.device_id, "gw-1");
        assert_eq!(received[0].0.app_topic, "out/port0");
        assert_eq!(received[0].1.body.as_deref(), Some(&b"AT\r\n"[..]));
        drop(received);

        connection.shutdown().await;
    }

    #[tokio::test]
    async fn rebind_moves_subscription() {
        let (first, first_transport) = connection("first").await;
        let (second, second_transport) = connection("second").await;
        let subscriber = CloudSubscriber::new("s", options());

        subscriber.bind(first.clone()).await;
        assert!(first_transport.is_subscribed("acme/gw-1/serial/out/x"));

        subscriber.bind(second.clone()).await;
        assert!(!first_transport.is_subscribed("acme/gw-1/serial/out/x"));
        assert!(second_transport.is_subscribed("acme/gw-1/serial/out/x"));

        first.shutdown().await;
        second.shutdown().await;
    }

    #[tokio::test]
    async fn update_moves_topic() {
        let (connection, transport) = connection("a").await;
        let subscriber = CloudSubscriber::new("s", options());
        subscriber.bind(connection.clone()).await;

        subscriber
            .update(SubscriberOptions {
                app_topic: "cmd".into(),
                ..options()
            })
            .await
            .unwrap();

        assert!(!transport.is_subscribed("acme/gw-1/serial/out/x"));
        assert!(transport.is_subscribed("acme/gw-1/serial/cmd"));
        assert_eq!(
            subscriber.subscribed_topic().as_deref(),
            Some("acme/gw-1/serial/cmd")
        );
        connection.shutdown().await;
    }

    #[tokio::test]
    async fn unregistered_listener_gets_nothing() {
        let (connection, transport) = connection("a").await;
        let subscriber = CloudSubscriber::new("s", options());
        let inbox = Arc::new(Inbox::default());
        let listener: Arc<dyn SubscriberListener> = inbox.clone();
        subscriber.register(listener.clone());
        subscriber.bind(connection.clone()).await;
        assert!(subscriber.unregister(&listener));

        let payload = JsonCodec.encode(&Envelope::new()).unwrap();
        transport.inject("acme/gw-1/serial/out/a", payload);
        settle().await;

        assert!(inbox.received.lock().is_empty());
        connection.shutdown().await;
    }

    #[tokio::test]
    async fn subscription_reissued_after_reconnect() {
        let (connection, transport) = connection("a").await;
        let subscriber = CloudSubscriber::new("s", options());
        subscriber.bind(connection.clone()).await;

        transport.set_connected(false);
        settle().await;
        transport.unsubscribe("acme/gw-1/serial/out/#").await.unwrap();
        transport.set_connected(true);
        settle().await;

        assert!(transport.is_subscribed("acme/gw-1/serial/out/x"));
        connection.shutdown().await;
    }

    #[tokio::test]
    async fn update_survives_failed_unsubscribe() {
        let (connection, transport) = connection("a").await;
        let subscriber = CloudSubscriber::new("s", options());
        subscriber.bind(connection.clone()).await;

        transport.set_fail_unsubscribe(true);
        subscriber
            .update(SubscriberOptions {
                app_topic: "cmd".into(),
                ..options()
            })
            .await
            .unwrap();

        assert!(transport.is_subscribed("acme/gw-1/serial/cmd"));
        assert_eq!(
            subscriber.subscribed_topic().as_deref(),
            Some("acme/gw-1/serial/cmd")
        );
        assert!(subscriber.accepts("acme/gw-1/serial/cmd"));
        assert!(!subscriber.accepts("acme/gw-1/serial/out/x"));

        transport.set_fail_unsubscribe(false);
        subscriber.unbind().await;
        assert!(!transport.is_subscribed("acme/gw-1/serial/cmd"));
        connection.shutdown().await;
    }

    #[tokio::test]
    async fn filter_uses_connection_separator() {
        let (connection, _transport) = connection_with(
            "dotted",
            TopicOptions {
                account_name: "acme".into(),
                client_id: "gw-1".into(),
                separator: ".".into(),
                ..Default::default()
            },
        )
        .await;
        let subscriber = CloudSubscriber::new(
            "s",
            SubscriberOptions {
                app_topic: "out.#".into(),
                ..options()
            },
        );
        subscriber.bind(connection.clone()).await;

        assert_eq!(
            subscriber.subscribed_topic().as_deref(),
            Some("acme.gw-1.serial.out.#")
        );
        assert!(subscriber.accepts("acme.gw-1.serial.out.port0"));
        assert!(!subscriber.accepts("acme.gw-1.heater.out.port0"));
        connection.shutdown().await;
    }
}
