//! Publishers and subscribers bound to loopback connections
//!
//! Run with: cargo test -p kura-tests --test pubsub_test

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kura_cloud::{
    CloudPublisher, CloudSubscriber, ConnectionListener, PublishError, Publisher,
    PublisherOptions, SubscriberListener, SubscriberOptions,
};
use kura_core::{Envelope, JsonCodec, MetricValue, PayloadCodec};
use kura_tests::{eventually, Inbox, TestFixture};
use pretty_assertions::assert_eq;

#[derive(Default)]
struct StateCounter {
    established: AtomicUsize,
    lost: AtomicUsize,
}

impl ConnectionListener for StateCounter {
    fn on_connection_established(&self) {
        self.established.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connection_lost(&self, _cause: &str) {
        self.lost.fetch_add(1, Ordering::SeqCst);
    }
}

fn subscriber_options(app_id: &str, app_topic: &str) -> SubscriberOptions {
    SubscriberOptions {
        app_id: app_id.to_string(),
        app_topic: app_topic.to_string(),
        ..Default::default()
    }
}

// =============================================================================
// Publishing
// =============================================================================

#[tokio::test]
async fn test_publisher_output_reaches_own_subscriber() {
    let fixture = TestFixture::connected().await;
    let publisher = CloudPublisher::new(
        "telemetry",
        PublisherOptions {
            app_id: "climate".to_string(),
            semantic_topic: "rooms/$room".to_string(),
            ..Default::default()
        },
    );
    publisher.bind(fixture.connection.clone());

    let subscriber = CloudSubscriber::new("rooms", subscriber_options("climate", "rooms/+"));
    let inbox = Arc::new(Inbox::default());
    subscriber.register(inbox.clone());
    subscriber.bind(fixture.connection.clone()).await;

    publisher
        .publish(
            &Envelope::new()
                .with_metric("room", "attic")
                .with_metric("temperature", 19.5),
        )
        .await
        .unwrap();

    assert!(eventually(|| inbox.count() == 1).await);
    let (properties, envelope) = inbox.received().remove(0);
    assert_eq!(properties.app_id, "climate");
    assert_eq!(properties.app_topic, "rooms/attic");
    assert_eq!(envelope.metric("temperature"), Some(&MetricValue::Float(19.5)));
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_published_payload_is_decodable_envelope() {
    let fixture = TestFixture::connected().await;
    let publisher = CloudPublisher::new("p", PublisherOptions::default());
    publisher.bind(fixture.connection.clone());

    publisher
        .publish(&Envelope::new().with_body(vec![0xde, 0xad]))
        .await
        .unwrap();

    let sent = &fixture.transport.published()[0];
    assert_eq!(sent.topic, fixture.data_topic("heater", "data"));
    let decoded = JsonCodec.decode(&sent.payload).unwrap();
    assert_eq!(decoded.body, Some(vec![0xde, 0xad]));
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_publish_while_disconnected_fails() {
    let fixture = TestFixture::connected().await;
    let publisher = CloudPublisher::new("p", PublisherOptions::default());
    publisher.bind(fixture.connection.clone());
    fixture.transport.set_connected(false);

    let err = publisher.publish(&Envelope::new()).await.unwrap_err();
    assert_eq!(err, PublishError::NotConnected);
    fixture.shutdown().await;
}

// =============================================================================
// Subscribing
// =============================================================================

#[tokio::test]
async fn test_rebind_moves_subscription_between_connections() {
    let first = TestFixture::connected_as("first").await;
    let second = TestFixture::connected_as("second").await;
    let subscriber = CloudSubscriber::new("cmd", subscriber_options("serial", "cmd"));
    let inbox = Arc::new(Inbox::default());
    subscriber.register(inbox.clone());

    subscriber.bind(first.connection.clone()).await;
    subscriber.bind(second.connection.clone()).await;

    let topic = first.data_topic("serial", "cmd");
    assert!(!first.inject(&topic, &Envelope::new()));
    assert!(second.inject(&topic, &Envelope::new()));
    assert!(eventually(|| inbox.count() == 1).await);

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
async fn test_unbind_stops_delivery() {
    let fixture = TestFixture::connected().await;
    let subscriber = CloudSubscriber::new("cmd", subscriber_options("serial", "cmd"));
    let inbox = Arc::new(Inbox::default());
    subscriber.register(inbox.clone());
    subscriber.bind(fixture.connection.clone()).await;
    subscriber.unbind().await;

    assert!(!subscriber.is_bound().await);
    assert!(!fixture.inject(&fixture.data_topic("serial", "cmd"), &Envelope::new()));
    assert_eq!(inbox.count(), 0);
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_listener_removed_during_delivery_sees_no_more_messages() {
    struct OneShot {
        subscriber: Arc<CloudSubscriber>,
        me: parking_lot::Mutex<Option<Arc<dyn SubscriberListener>>>,
        hits: AtomicUsize,
    }

    impl SubscriberListener for OneShot {
        fn on_message_arrived(&self, _: &kura_cloud::MessageProperties, _: &Envelope) {
            self.hits.fetch_add(1, Ordering::SeqCst);
            if let Some(me) = self.me.lock().take() {
                self.subscriber.unregister(&me);
            }
        }
    }

    let fixture = TestFixture::connected().await;
    let subscriber = CloudSubscriber::new("cmd", subscriber_options("serial", "cmd"));
    let one_shot = Arc::new(OneShot {
        subscriber: subscriber.clone(),
        me: parking_lot::Mutex::new(None),
        hits: AtomicUsize::new(0),
    });
    let listener: Arc<dyn SubscriberListener> = one_shot.clone();
    *one_shot.me.lock() = Some(listener.clone());
    subscriber.register(listener);
    subscriber.bind(fixture.connection.clone()).await;

    let topic = fixture.data_topic("serial", "cmd");
    fixture.inject(&topic, &Envelope::new());
    fixture.inject(&topic, &Envelope::new());
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert_eq!(one_shot.hits.load(Ordering::SeqCst), 1);
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_connection_events_reach_subscriber_connection_listeners() {
    let fixture = TestFixture::connected().await;
    // Let the initial connect event drain before any listener is attached
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let subscriber = CloudSubscriber::new("cmd", subscriber_options("serial", "cmd"));
    let inbox = Arc::new(Inbox::default());
    let counter = Arc::new(StateCounter::default());
    subscriber.register(inbox.clone());
    subscriber.register_connection_listener(counter.clone());
    subscriber.bind(fixture.connection.clone()).await;

    fixture.transport.set_connected(false);
    fixture.transport.set_connected(true);

    assert!(eventually(|| counter.established.load(Ordering::SeqCst) == 1).await);
    assert_eq!(counter.lost.load(Ordering::SeqCst), 1);
    assert_eq!(inbox.count(), 0);

    assert!(eventually(|| fixture
        .transport
        .is_subscribed(&fixture.data_topic("serial", "cmd")))
    .await);
    fixture.shutdown().await;
}
