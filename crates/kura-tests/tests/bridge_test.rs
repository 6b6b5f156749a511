//! CAN and serial bridges between mock devices and a loopback cloud
//!
//! Run with: cargo test -p kura-tests --test bridge_test

use std::sync::Arc;

use kura_cloud::{CloudPublisher, CloudSubscriber, PublisherOptions, SubscriberOptions};
use kura_core::{Envelope, JsonCodec, MetricValue, PayloadCodec};
use kura_gateway::device::mock::MockDevice;
use kura_gateway::{
    CanGateway, CanGatewayConfig, DeviceError, DeviceFrame, SerialGateway, SerialGatewayConfig,
    SerialSettings,
};
use kura_tests::{eventually, TestFixture};
use pretty_assertions::assert_eq;

fn can_config() -> CanGatewayConfig {
    CanGatewayConfig {
        interface: "vcan0".to_string(),
        read_timeout_ms: 10,
        ..Default::default()
    }
}

fn serial_config(port: &str) -> SerialGatewayConfig {
    SerialGatewayConfig {
        settings: SerialSettings {
            port: port.to_string(),
            ..Default::default()
        },
        poll_interval_ms: 5,
        ..Default::default()
    }
}

fn publisher(fixture: &TestFixture, app_id: &str, semantic_topic: &str) -> Arc<CloudPublisher> {
    let publisher = Arc::new(CloudPublisher::new(
        app_id,
        PublisherOptions {
            app_id: app_id.to_string(),
            semantic_topic: semantic_topic.to_string(),
            ..Default::default()
        },
    ));
    publisher.bind(fixture.connection.clone());
    publisher
}

// =============================================================================
// CAN
// =============================================================================

#[tokio::test]
#[serial_test::serial]
async fn test_can_frames_published_under_address_topic() {
    let fixture = TestFixture::connected().await;
    let device = Arc::new(MockDevice::default());
    let gateway = CanGateway::new(device.clone(), can_config());
    gateway.add_publisher(publisher(&fixture, "can", "frames/$address"));
    gateway.activate().await.unwrap();

    device.push_incoming(DeviceFrame::new(0x321, [0x02, 0xFF, 0x10]));
    device.push_incoming(DeviceFrame::new(0x322, [0x02, 0x0b, 0x10]));
    assert!(eventually(|| fixture.transport.published().len() == 2).await);

    let published = fixture.transport.published();
    assert_eq!(published[0].topic, "acme/gw-1/can/frames/broadcast");
    assert_eq!(published[1].topic, "acme/gw-1/can/frames/b");

    let envelope = JsonCodec.decode(&published[0].payload).unwrap();
    assert_eq!(envelope.metric("can.id"), Some(&MetricValue::Int(0x321)));
    assert_eq!(envelope.body, Some(vec![0x02, 0xFF, 0x10]));

    gateway.deactivate().await.unwrap();
    fixture.shutdown().await;
}

#[tokio::test]
#[serial_test::serial]
async fn test_can_frames_fan_out_to_every_publisher() {
    let fixture = TestFixture::connected().await;
    let device = Arc::new(MockDevice::default());
    let gateway = CanGateway::new(device.clone(), can_config());
    gateway.add_publisher(publisher(&fixture, "can", "raw"));
    gateway.add_publisher(publisher(&fixture, "can-audit", "raw"));
    gateway.activate().await.unwrap();

    device.push_incoming(DeviceFrame::new(0x1, [0x00]));
    assert!(eventually(|| fixture.transport.published().len() == 2).await);

    let mut topics: Vec<String> = fixture
        .transport
        .published()
        .into_iter()
        .map(|m| m.topic)
        .collect();
    topics.sort();
    assert_eq!(topics, vec!["acme/gw-1/can-audit/raw", "acme/gw-1/can/raw"]);

    gateway.deactivate().await.unwrap();
    fixture.shutdown().await;
}

#[tokio::test]
#[serial_test::serial]
async fn test_can_receiver_survives_read_fault() {
    let fixture = TestFixture::connected().await;
    let device = Arc::new(MockDevice::default());
    let gateway = CanGateway::new(device.clone(), can_config());
    gateway.add_publisher(publisher(&fixture, "can", "raw"));
    gateway.activate().await.unwrap();

    device.push_error(DeviceError::Io("bus off".to_string()));
    device.push_incoming(DeviceFrame::new(0x5, [0x01, 0x02]));

    assert!(eventually(|| fixture.transport.published().len() == 1).await);
    assert!(gateway.is_running());
    gateway.deactivate().await.unwrap();
    fixture.shutdown().await;
}

#[tokio::test]
#[serial_test::serial]
async fn test_can_downlink_from_cloud() {
    let fixture = TestFixture::connected().await;
    let device = Arc::new(MockDevice::default());
    let gateway = Arc::new(CanGateway::new(device.clone(), can_config()));
    gateway.activate().await.unwrap();

    let subscriber = CloudSubscriber::new(
        "can-down",
        SubscriberOptions {
            app_id: "can".to_string(),
            app_topic: "out".to_string(),
            ..Default::default()
        },
    );
    subscriber.register(gateway.clone());
    subscriber.bind(fixture.connection.clone()).await;

    let topic = fixture.data_topic("can", "out");
    assert!(fixture.inject(
        &topic,
        &Envelope::new()
            .with_body(vec![0x10, 0x20])
            .with_metric("can.id", 0x7E0i64),
    ));
    assert!(eventually(|| device.written().len() == 1).await);
    assert_eq!(device.written()[0], DeviceFrame::new(0x7E0, [0x10, 0x20]));

    gateway.deactivate().await.unwrap();
    fixture.shutdown().await;
}

// =============================================================================
// Serial
// =============================================================================

#[tokio::test]
#[serial_test::serial]
async fn test_serial_lines_published_and_commands_written() {
    let fixture = TestFixture::connected().await;
    let device = Arc::new(MockDevice::default());
    let gateway = Arc::new(SerialGateway::new(device.clone(), serial_config("/dev/ttyS0")));
    gateway.add_publisher(publisher(&fixture, "serial", "in"));
    gateway.activate().await.unwrap();

    let subscriber = CloudSubscriber::new(
        "serial-down",
        SubscriberOptions {
            app_id: "serial".to_string(),
            app_topic: "out".to_string(),
            ..Default::default()
        },
    );
    subscriber.register(gateway.clone());
    subscriber.bind(fixture.connection.clone()).await;

    device.push_incoming(DeviceFrame::bytes(&b"temp=21\nhum"[..]));
    device.push_incoming(DeviceFrame::bytes(&b"=40\n"[..]));
    assert!(eventually(|| fixture.transport.published().len() == 2).await);

    let lines: Vec<String> = fixture
        .transport
        .published()
        .iter()
        .map(|m| {
            JsonCodec
                .decode(&m.payload)
                .unwrap()
                .body_text()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(lines, vec!["temp=21", "hum=40"]);

    fixture.inject(
        &fixture.data_topic("serial", "out"),
        &Envelope::new().with_body("RESET\r\n"),
    );
    assert!(eventually(|| device.written().len() == 1).await);
    assert_eq!(device.written()[0].data, b"RESET\r\n".to_vec());

    gateway.deactivate().await.unwrap();
    fixture.shutdown().await;
}

#[tokio::test]
#[serial_test::serial]
async fn test_serial_reconfigure_keeps_publishing() {
    let fixture = TestFixture::connected().await;
    let device = Arc::new(MockDevice::default());
    let gateway = SerialGateway::new(device.clone(), serial_config("/dev/ttyS0"));
    gateway.add_publisher(publisher(&fixture, "serial", "in"));
    gateway.activate().await.unwrap();

    gateway.reconfigure(serial_config("/dev/ttyS1")).await.unwrap();
    device.push_incoming(DeviceFrame::bytes(&b"after\n"[..]));

    assert!(eventually(|| fixture.transport.published().len() == 1).await);
    let envelope = JsonCodec
        .decode(&fixture.transport.published()[0].payload)
        .unwrap();
    assert_eq!(
        envelope.metric("port").and_then(|m| m.as_str()),
        Some("/dev/ttyS1")
    );
    assert_eq!(device.open_count(), 2);

    gateway.deactivate().await.unwrap();
    fixture.shutdown().await;
}
