//! Daemon configuration file
//!
//! ```toml
//! [connection]
//! account_name = "acme"
//! client_id = "gw-1"
//!
//! [[publisher]]
//! name = "can-up"
//! app_id = "can"
//! semantic_topic = "frames/$address"
//!
//! [[subscriber]]
//! name = "can-down"
//! app_id = "can"
//! app_topic = "out/#"
//!
//! [can_gateway]
//! interface = "vcan0"
//! publishers = ["can-up"]
//! subscriber = "can-down"
//! device = { type = "socketcan" }
//! ```

use std::path::Path;

use anyhow::Context;
use kura_cloud::{ConnectionConfig, PublisherConfig, PublisherOptions, SubscriberConfig};
use kura_gateway::config::{AssetConfig, ChannelConfig};
use kura_gateway::{
    asset::{ChannelMode, ChannelValueType},
    AssetsConfig, CanGatewayConfig, HeaterConfig, SerialGatewayConfig,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default, rename = "publisher")]
    pub publishers: Vec<PublisherConfig>,
    #[serde(default, rename = "subscriber")]
    pub subscribers: Vec<SubscriberConfig>,
    #[serde(default)]
    pub can_gateway: Option<CanBridgeConfig>,
    #[serde(default)]
    pub serial_gateway: Option<SerialBridgeConfig>,
    #[serde(default)]
    pub heater: Option<HeaterSection>,
    #[serde(default)]
    pub assets: Option<AssetsConfig>,
}

/// CAN gateway plus the publishers/subscriber it is wired to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanBridgeConfig {
    #[serde(flatten)]
    pub gateway: CanGatewayConfig,
    #[serde(default)]
    pub publishers: Vec<String>,
    #[serde(default)]
    pub subscriber: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialBridgeConfig {
    #[serde(flatten)]
    pub gateway: SerialGatewayConfig,
    #[serde(default)]
    pub publishers: Vec<String>,
    #[serde(default)]
    pub subscriber: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaterSection {
    #[serde(flatten)]
    pub heater: HeaterConfig,
    #[serde(default)]
    pub publishers: Vec<String>,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Loopback connection with the heater simulator and one sample asset
    pub fn demo() -> Self {
        Self {
            publishers: vec![PublisherConfig {
                name: "heater".to_string(),
                options: PublisherOptions::default(),
            }],
            heater: Some(HeaterSection {
                heater: HeaterConfig::default(),
                publishers: vec!["heater".to_string()],
            }),
            assets: Some(AssetsConfig {
                assets: vec![AssetConfig {
                    name: "boiler".to_string(),
                    channels: vec![ChannelConfig {
                        name: "pressure".to_string(),
                        value_type: ChannelValueType::Float,
                        mode: ChannelMode::ReadWrite,
                        initial: Some(1.5.into()),
                    }],
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kura_gateway::DeviceTransportConfig;
    use std::io::Write;

    const SAMPLE: &str = r#"
[connection]
account_name = "acme"
client_id = "gw-1"

[[publisher]]
name = "can-up"
app_id = "can"
semantic_topic = "frames/$address"
qos = 1

[[subscriber]]
name = "can-down"
app_id = "can"
app_topic = "out/#"

[can_gateway]
interface = "vcan0"
publishers = ["can-up"]
subscriber = "can-down"
device = { type = "mock", loopback = true }

[serial_gateway]
port = "/dev/ttyS3"
baud_rate = 9600
echo = true

[heater]
publish_interval_ms = 500
publishers = ["can-up"]

[assets]
id = "ASSET-V1"

[[assets.assets]]
name = "pump"
channels = [{ name = "speed", type = "INTEGER", mode = "READ_WRITE", initial = 10 }]
"#;

    #[test]
    fn parses_full_config() {
        let config = DaemonConfig::parse(SAMPLE).unwrap();

        assert_eq!(config.connection.topics.account_name, "acme");
        assert_eq!(config.connection.topics.control_prefix, "$EDC");
        assert_eq!(config.publishers[0].options.qos, 1);
        assert_eq!(config.publishers[0].options.priority, 7);
        assert_eq!(config.subscribers[0].options.app_topic, "out/#");

        let can = config.can_gateway.unwrap();
        assert_eq!(can.gateway.interface, "vcan0");
        assert_eq!(can.subscriber.as_deref(), Some("can-down"));
        assert!(matches!(
            can.gateway.device,
            DeviceTransportConfig::Mock(ref mock) if mock.loopback
        ));

        let serial = config.serial_gateway.unwrap();
        assert_eq!(serial.gateway.settings.baud_rate, 9600);
        assert!(serial.gateway.echo);
        assert_eq!(serial.gateway.poll_interval_ms, 100);

        let heater = config.heater.unwrap();
        assert_eq!(heater.heater.publish_interval_ms, 500);
        assert_eq!(heater.heater.id, "heater");

        assert_eq!(config.assets.unwrap().assets[0].channels[0].name, "speed");
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = DaemonConfig::parse("").unwrap();
        assert_eq!(config.connection.name, "default");
        assert!(config.publishers.is_empty());
        assert!(config.can_gateway.is_none());
    }

    #[test]
    fn load_reports_path_on_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[connection\nbroken").unwrap();

        let err = DaemonConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid config"));
    }
}
