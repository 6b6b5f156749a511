//! Gateway configuration
//!
//! Configuration types for the device bridges, the heater simulator and
//! the asset handler.

use serde::{Deserialize, Serialize};

use crate::heater::HeaterMode;

// =============================================================================
// Device Transport Configuration
// =============================================================================

/// Which device implementation backs a bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeviceTransportConfig {
    /// Raw SocketCAN socket (Linux only)
    SocketCan,
    /// In-memory device for testing
    Mock(MockDeviceConfig),
}

impl Default for DeviceTransportConfig {
    fn default() -> Self {
        Self::Mock(MockDeviceConfig::default())
    }
}

/// Mock device configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockDeviceConfig {
    /// Feed every written frame back as an incoming frame
    #[serde(default)]
    pub loopback: bool,
}

// =============================================================================
// CAN Bridge
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanGatewayConfig {
    /// CAN interface name (e.g., "can0")
    #[serde(default = "default_can_interface")]
    pub interface: String,
    /// CAN id used for downlink frames without a `can.id` metric
    #[serde(default = "default_downlink_id")]
    pub downlink_id: u32,
    /// How long a single receive attempt blocks
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub device: DeviceTransportConfig,
}

fn default_can_interface() -> String {
    "can0".to_string()
}

fn default_downlink_id() -> u32 {
    0x100
}

fn default_read_timeout_ms() -> u64 {
    100
}

impl Default for CanGatewayConfig {
    fn default() -> Self {
        Self {
            interface: default_can_interface(),
            downlink_id: default_downlink_id(),
            read_timeout_ms: default_read_timeout_ms(),
            device: DeviceTransportConfig::default(),
        }
    }
}

// =============================================================================
// Serial Bridge
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Port settings for a serial device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    #[serde(default = "default_serial_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
}

fn default_serial_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::None,
            stop_bits: default_stop_bits(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialGatewayConfig {
    #[serde(flatten)]
    pub settings: SerialSettings,
    /// Write received bytes straight back to the port
    #[serde(default)]
    pub echo: bool,
    /// Byte that terminates an uplink line
    #[serde(default = "default_delimiter")]
    pub delimiter: u8,
    /// Sleep between polls when no data is pending
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Lines longer than this are discarded
    #[serde(default = "default_max_line")]
    pub max_line: usize,
    #[serde(default)]
    pub device: DeviceTransportConfig,
}

fn default_delimiter() -> u8 {
    b'\n'
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_line() -> usize {
    4096
}

impl Default for SerialGatewayConfig {
    fn default() -> Self {
        Self {
            settings: SerialSettings::default(),
            echo: false,
            delimiter: default_delimiter(),
            poll_interval_ms: default_poll_interval_ms(),
            max_line: default_max_line(),
            device: DeviceTransportConfig::default(),
        }
    }
}

// =============================================================================
// Heater Simulator
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaterConfig {
    /// Handler id the heater registers under
    #[serde(default = "default_heater_id")]
    pub id: String,
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,
    #[serde(default = "default_initial_temperature")]
    pub initial_temperature: f64,
    #[serde(default = "default_external_temperature")]
    pub external_temperature: f64,
    #[serde(default = "default_set_point")]
    pub set_point: f64,
    /// Degrees per step towards the set point
    #[serde(default = "default_temperature_increment")]
    pub temperature_increment: f64,
    #[serde(default)]
    pub mode: HeaterMode,
}

fn default_heater_id() -> String {
    "heater".to_string()
}

fn default_publish_interval_ms() -> u64 {
    2000
}

fn default_initial_temperature() -> f64 {
    18.0
}

fn default_external_temperature() -> f64 {
    9.0
}

fn default_set_point() -> f64 {
    21.0
}

fn default_temperature_increment() -> f64 {
    0.5
}

impl Default for HeaterConfig {
    fn default() -> Self {
        Self {
            id: default_heater_id(),
            publish_interval_ms: default_publish_interval_ms(),
            initial_temperature: default_initial_temperature(),
            external_temperature: default_external_temperature(),
            set_point: default_set_point(),
            temperature_increment: default_temperature_increment(),
            mode: HeaterMode::default(),
        }
    }
}

// =============================================================================
// Assets
// =============================================================================

/// Handler id and the assets served under it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    #[serde(default = "default_assets_id")]
    pub id: String,
    #[serde(default)]
    pub assets: Vec<AssetConfig>,
}

fn default_assets_id() -> String {
    "ASSET-V1".to_string()
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            id: default_assets_id(),
            assets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    pub name: String,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: crate::asset::ChannelValueType,
    #[serde(default)]
    pub mode: crate::asset::ChannelMode,
    /// Value reported before the first write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<serde_json::Value>,
}
