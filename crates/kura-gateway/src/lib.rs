//! kura-gateway - field-side applications for the Kura cloud layer
//!
//! Bridges local devices to the cloud and provides request handlers:
//!
//! ```text
//!   cloud ── CloudSubscriber ──► CanGateway / SerialGateway ──► device
//!   cloud ◄── CloudPublisher ◄── receive worker ◄────────────── device
//!
//!   cloud ── RequestRouter ──► Heater / AssetHandler
//! ```
//!
//! Each bridge owns one device, one receive worker and an I/O lock that
//! serializes writes, opens and closes on the device.

pub mod asset;
mod bridge;
pub mod can;
pub mod config;
pub mod device;
pub mod error;
pub mod heater;
pub mod serial;

pub use asset::{AssetCatalog, AssetHandler, AssetInfo, ChannelRecord, InMemoryAssetCatalog};
pub use can::CanGateway;
pub use config::{
    AssetConfig, AssetsConfig, CanGatewayConfig, DeviceTransportConfig, HeaterConfig,
    SerialGatewayConfig, SerialSettings,
};
pub use device::{create_device, DeviceError, DeviceFrame, DeviceSettings, DeviceTransport};
pub use error::{GatewayError, GatewayResult};
pub use heater::{Heater, HeaterMode, HeaterReadings};
pub use serial::SerialGateway;

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use async_trait::async_trait;
    use kura_cloud::{MessageId, PublishError, Publisher};
    use kura_core::Envelope;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct RecordingPublisher {
        sent: Mutex<Vec<Envelope>>,
    }

    impl RecordingPublisher {
        pub fn published(&self) -> Vec<Envelope> {
            self.sent.lock().clone()
        }

        pub fn count(&self) -> usize {
            self.sent.lock().len()
        }
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, envelope: &Envelope) -> Result<MessageId, PublishError> {
            let mut sent = self.sent.lock();
            sent.push(envelope.clone());
            Ok(sent.len() as MessageId)
        }
    }

    /// Poll `condition` for up to a second
    pub async fn eventually(condition: impl Fn() -> bool) -> bool {
        for _ in 0..100 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }
}
