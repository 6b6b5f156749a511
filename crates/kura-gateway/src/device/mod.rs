//! Device transports for the CAN and serial bridges
//!
//! A device transport is blocking: bridges call it from
//! `spawn_blocking` and serialize access with their own I/O lock.
//! - SocketCAN device for raw CAN frames (Linux only)
//! - Mock device for testing

pub mod mock;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{DeviceTransportConfig, SerialSettings};

/// One unit of device I/O: a CAN frame, or a chunk of serial bytes (`id` 0)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFrame {
    pub id: u32,
    pub data: Vec<u8>,
}

impl DeviceFrame {
    pub fn new(id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }

    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::new(0, data)
    }
}

/// What to open
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceSettings {
    Can { interface: String },
    Serial(SerialSettings),
}

impl DeviceSettings {
    pub fn describe(&self) -> &str {
        match self {
            DeviceSettings::Can { interface } => interface,
            DeviceSettings::Serial(settings) => &settings.port,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Device not open")]
    NotOpen,

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Blocking device I/O
pub trait DeviceTransport: Send + Sync {
    /// Open (or re-open) the device with the given settings
    fn open(&self, settings: &DeviceSettings) -> Result<(), DeviceError>;

    fn close(&self) -> Result<(), DeviceError>;

    /// Wait up to `timeout` for input; `Ok(None)` when nothing arrived
    fn read(&self, timeout: Duration) -> Result<Option<DeviceFrame>, DeviceError>;

    fn write(&self, frame: &DeviceFrame) -> Result<(), DeviceError>;

    fn is_open(&self) -> bool;
}

/// Create a device transport based on configuration
pub fn create_device(
    config: &DeviceTransportConfig,
) -> Result<Arc<dyn DeviceTransport>, DeviceError> {
    match config {
        #[cfg(all(target_os = "linux", feature = "socketcan"))]
        DeviceTransportConfig::SocketCan => Ok(Arc::new(socketcan::SocketCanDevice::new())),
        #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
        DeviceTransportConfig::SocketCan => Err(DeviceError::Unsupported(
            "SocketCAN requires Linux and the 'socketcan' feature".to_string(),
        )),
        DeviceTransportConfig::Mock(cfg) => Ok(Arc::new(mock::MockDevice::new(cfg))),
    }
}
