//! Cloud connection, publisher and subscriber configuration

use kura_core::{MessageType, TopicOptions};
use serde::{Deserialize, Serialize};

/// Configuration of one cloud connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connection name, used in logs and as the binding target of endpoints
    #[serde(default = "default_connection_name")]
    pub name: String,
    /// Topic layout (prefix, separator, account, client id)
    #[serde(flatten)]
    pub topics: TopicOptions,
    /// QoS for the device's own control-topic subscription
    #[serde(default = "default_control_qos")]
    pub control_qos: u8,
    #[serde(default)]
    pub transport: DataTransportConfig,
}

fn default_connection_name() -> String {
    "default".to_string()
}

fn default_control_qos() -> u8 {
    1
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: default_connection_name(),
            topics: TopicOptions::default(),
            control_qos: default_control_qos(),
            transport: DataTransportConfig::default(),
        }
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Data transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DataTransportConfig {
    /// In-memory broker loopback
    Loopback(LoopbackConfig),
}

impl Default for DataTransportConfig {
    fn default() -> Self {
        Self::Loopback(LoopbackConfig::default())
    }
}

/// Loopback transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopbackConfig {
    /// Simulated latency in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
    /// Broker address reported in connection info
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    /// Number of most recent publishes kept for inspection
    #[serde(default = "default_history")]
    pub history: usize,
}

fn default_broker_url() -> String {
    "loopback://local".to_string()
}

fn default_history() -> usize {
    256
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            broker_url: default_broker_url(),
            history: default_history(),
        }
    }
}

// =============================================================================
// Publisher / Subscriber Configuration
// =============================================================================

/// Which position fields a publisher stamps onto outgoing envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionMode {
    #[default]
    None,
    /// Latitude, longitude and altitude only
    Basic,
    Full,
}

/// Publisher options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherOptions {
    /// Application id in the topic
    #[serde(default = "default_publisher_app_id")]
    pub app_id: String,
    /// App topic template; `$metric` placeholders are expanded per message
    #[serde(default = "default_semantic_topic")]
    pub semantic_topic: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
    #[serde(default = "default_publisher_priority")]
    pub priority: u8,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub position: PositionMode,
}

fn default_publisher_app_id() -> String {
    "heater".to_string()
}

fn default_semantic_topic() -> String {
    "data".to_string()
}

fn default_publisher_priority() -> u8 {
    7
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            app_id: default_publisher_app_id(),
            semantic_topic: default_semantic_topic(),
            qos: 0,
            retain: false,
            priority: default_publisher_priority(),
            message_type: MessageType::Data,
            position: PositionMode::None,
        }
    }
}

/// Subscriber options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberOptions {
    /// Application id in the topic
    #[serde(default = "default_subscriber_app_id")]
    pub app_id: String,
    /// App topic filter; may contain `+` and `#`
    #[serde(default = "default_subscriber_app_topic")]
    pub app_topic: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub message_type: MessageType,
}

fn default_subscriber_app_id() -> String {
    "bridge".to_string()
}

fn default_subscriber_app_topic() -> String {
    "#".to_string()
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self {
            app_id: default_subscriber_app_id(),
            app_topic: default_subscriber_app_topic(),
            qos: 0,
            message_type: MessageType::Data,
        }
    }
}

/// A named publisher instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherConfig {
    pub name: String,
    #[serde(flatten)]
    pub options: PublisherOptions,
}

/// A named subscriber instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberConfig {
    pub name: String,
    #[serde(flatten)]
    pub options: SubscriberOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publisher_defaults() {
        let options: PublisherOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, PublisherOptions::default());
        assert_eq!(options.priority, 7);
        assert_eq!(options.semantic_topic, "data");
    }

    #[test]
    fn connection_flattens_topic_options() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{"account_name": "acme", "client_id": "gw-1", "transport": {"type": "loopback"}}"#,
        )
        .unwrap();
        assert_eq!(config.topics.account_name, "acme");
        assert_eq!(config.topics.control_prefix, "$EDC");
        assert_eq!(config.transport, DataTransportConfig::default());
    }
}
