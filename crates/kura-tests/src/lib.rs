//! Integration tests for the Kura routing layer
//!
//! Everything runs over the loopback transport and mock devices, so no
//! broker or hardware is needed:
//!
//! ```bash
//! cargo test -p kura-tests
//! ```
//!
//! # Test Structure
//!
//! - `request_routing_test.rs` - control-topic requests and replies end to end
//! - `pubsub_test.rs` - publishers, subscribers, rebinding and reconnects
//! - `bridge_test.rs` - CAN and serial bridges between devices and the cloud
//! - `worker_test.rs` - single-worker lifecycle and reconfiguration
//!
//! This library holds the shared fixture.

use std::sync::Arc;
use std::time::Duration;

use kura_cloud::transport::mock::MockDataTransport;
use kura_cloud::{
    CloudConnection, ConnectionConfig, LoopbackConfig, MessageProperties, SubscriberListener,
};
use kura_core::{
    Envelope, JsonCodec, MessageType, PayloadCodec, RequestEnvelope, ResponseEnvelope,
    TopicOptions,
};
use parking_lot::Mutex;

pub const ACCOUNT: &str = "acme";
pub const CLIENT_ID: &str = "gw-1";

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// A connected cloud connection on a loopback transport
pub struct TestFixture {
    pub transport: Arc<MockDataTransport>,
    pub connection: Arc<CloudConnection>,
}

impl TestFixture {
    pub async fn connected() -> Self {
        Self::connected_as("default").await
    }

    pub async fn connected_as(name: &str) -> Self {
        let transport = Arc::new(MockDataTransport::new(&LoopbackConfig::default()));
        let config = ConnectionConfig {
            name: name.to_string(),
            topics: TopicOptions {
                account_name: ACCOUNT.to_string(),
                client_id: CLIENT_ID.to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let connection = CloudConnection::new(&config, transport.clone(), Arc::new(JsonCodec));
        connection
            .connect()
            .await
            .expect("loopback connect never fails");
        Self {
            transport,
            connection,
        }
    }

    /// Full control topic addressed to this device
    pub fn control_topic(&self, app_id: &str, app_topic: &str) -> String {
        self.connection
            .topics()
            .encode_local(MessageType::Control, app_id, app_topic)
    }

    /// Full data topic of this device
    pub fn data_topic(&self, app_id: &str, app_topic: &str) -> String {
        self.connection
            .topics()
            .encode_local(MessageType::Data, app_id, app_topic)
    }

    /// Inject a message from the cloud side; false if nothing subscribed
    pub fn inject(&self, topic: &str, envelope: &Envelope) -> bool {
        let payload = JsonCodec.encode(envelope).expect("envelope encodes");
        self.transport.inject(topic, payload)
    }

    /// Send a request on `app_id`/`app_topic` and wait for the reply
    ///
    /// Returns `None` if no reply was published within the timeout.
    pub async fn request(
        &self,
        app_id: &str,
        app_topic: &str,
        request: RequestEnvelope,
    ) -> Option<ResponseEnvelope> {
        let reply_topic = self.connection.topics().reply_topic(
            request.requester_id(),
            app_id,
            request.request_id(),
        );
        let mut published = self.transport.published_stream();
        if !self.inject(&self.control_topic(app_id, app_topic), &request.into_envelope()) {
            return None;
        }

        tokio::time::timeout(REPLY_TIMEOUT, async {
            loop {
                match published.recv().await {
                    Ok(message) if message.topic == reply_topic => {
                        let envelope = JsonCodec.decode(&message.payload).ok()?;
                        return ResponseEnvelope::try_from(envelope).ok();
                    }
                    Ok(_) => continue,
                    Err(_) => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
    }
}

/// Subscriber listener that records every delivery
#[derive(Default)]
pub struct Inbox {
    received: Mutex<Vec<(MessageProperties, Envelope)>>,
}

impl Inbox {
    pub fn received(&self) -> Vec<(MessageProperties, Envelope)> {
        self.received.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().len()
    }
}

impl SubscriberListener for Inbox {
    fn on_message_arrived(&self, properties: &MessageProperties, envelope: &Envelope) {
        self.received
            .lock()
            .push((properties.clone(), envelope.clone()));
    }
}

/// Poll `condition` every 10ms for up to two seconds
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
