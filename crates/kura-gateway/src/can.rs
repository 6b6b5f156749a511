//! CAN bus bridge
//!
//! Uplink: every received frame becomes an envelope (body = frame data,
//! `can.id`, `address`) published through all attached publishers.
//! Downlink: envelopes delivered by a subscriber are written as frames.

use std::sync::Arc;
use std::time::Duration;

use kura_cloud::{MessageProperties, Publisher, SubscriberListener};
use kura_core::{CancelToken, Envelope, WorkerError};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::bridge::{publish_all, DeviceLink, Publishers};
use crate::config::CanGatewayConfig;
use crate::device::{DeviceError, DeviceFrame, DeviceSettings, DeviceTransport};
use crate::error::{GatewayError, GatewayResult};

/// Metric carrying the CAN identifier of a frame
pub const METRIC_CAN_ID: &str = "can.id";
/// Metric carrying the frame's destination address
pub const METRIC_ADDRESS: &str = "address";
/// Address byte value meaning "all nodes"
pub const BROADCAST_ADDRESS: u8 = 0xFF;
/// Classic CAN payload limit
pub const CAN_MAX_DLEN: usize = 8;

const ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub struct CanGateway {
    config: RwLock<CanGatewayConfig>,
    link: DeviceLink,
}

impl CanGateway {
    pub fn new(device: Arc<dyn DeviceTransport>, config: CanGatewayConfig) -> Self {
        Self {
            config: RwLock::new(config),
            link: DeviceLink::new("can-receiver", device),
        }
    }

    pub fn config(&self) -> CanGatewayConfig {
        self.config.read().clone()
    }

    pub fn add_publisher(&self, publisher: Arc<dyn Publisher>) -> bool {
        self.link.publishers.register(publisher)
    }

    pub fn remove_publisher(&self, publisher: &Arc<dyn Publisher>) -> bool {
        self.link.publishers.unregister(publisher)
    }

    pub fn is_running(&self) -> bool {
        self.link.worker.is_running()
    }

    /// Open the interface and start receiving
    pub async fn activate(&self) -> GatewayResult<()> {
        let _lifecycle = self.link.lifecycle.lock().await;
        if self.link.worker.is_running() {
            return Err(WorkerError::AlreadyRunning(self.link.worker.name().to_string()).into());
        }
        let config = self.config();
        self.open_and_start(&config).await
    }

    /// Stop receiving, re-open with `config` and start again
    pub async fn reconfigure(&self, config: CanGatewayConfig) -> GatewayResult<()> {
        let _lifecycle = self.link.lifecycle.lock().await;
        self.link.stop_worker().await;
        *self.config.write() = config.clone();
        self.open_and_start(&config).await
    }

    pub async fn deactivate(&self) -> GatewayResult<()> {
        let _lifecycle = self.link.lifecycle.lock().await;
        self.link.stop_worker().await;
        self.link.close()?;
        info!("CAN gateway deactivated");
        Ok(())
    }

    /// Write `envelope`'s body as one frame
    ///
    /// The id comes from the `can.id` metric, falling back to the
    /// configured downlink id.
    pub fn send(&self, envelope: &Envelope) -> GatewayResult<()> {
        let frame = self.downlink_frame(envelope)?;
        self.link.write(&frame)?;
        debug!(can_id = format!("0x{:X}", frame.id), len = frame.data.len(), "CAN frame sent");
        Ok(())
    }

    fn downlink_frame(&self, envelope: &Envelope) -> GatewayResult<DeviceFrame> {
        let data = envelope
            .body
            .clone()
            .ok_or_else(|| GatewayError::InvalidMessage("message has no body".to_string()))?;
        if data.is_empty() || data.len() > CAN_MAX_DLEN {
            return Err(GatewayError::InvalidMessage(format!(
                "CAN payload must be 1..={} bytes, got {}",
                CAN_MAX_DLEN,
                data.len()
            )));
        }
        let id = match envelope.metric(METRIC_CAN_ID) {
            Some(value) => value
                .as_int()
                .and_then(|id| u32::try_from(id).ok())
                .ok_or_else(|| {
                    GatewayError::InvalidMessage(format!("bad {} metric: {}", METRIC_CAN_ID, value))
                })?,
            None => self.config.read().downlink_id,
        };
        Ok(DeviceFrame::new(id, data))
    }

    async fn open_and_start(&self, config: &CanGatewayConfig) -> GatewayResult<()> {
        self.link.reopen(&DeviceSettings::Can {
            interface: config.interface.clone(),
        })?;

        let device = self.link.device.clone();
        let publishers = self.link.publishers.clone();
        let read_timeout = Duration::from_millis(config.read_timeout_ms);
        self.link
            .worker
            .start(move |cancel| receive_loop(device, publishers, read_timeout, cancel))
            .await?;

        info!(interface = %config.interface, "CAN gateway active");
        Ok(())
    }
}

/// Build the uplink envelope for a received frame
pub fn frame_to_envelope(frame: &DeviceFrame) -> Envelope {
    let mut envelope = Envelope::new()
        .with_body(frame.data.clone())
        .with_metric(METRIC_CAN_ID, i64::from(frame.id));
    if let Some(&address) = frame.data.get(1) {
        let address = if address == BROADCAST_ADDRESS {
            "broadcast".to_string()
        } else {
            format!("{:x}", address)
        };
        envelope.add_metric(METRIC_ADDRESS, address);
    }
    envelope
}

async fn receive_loop(
    device: Arc<dyn DeviceTransport>,
    publishers: Arc<Publishers>,
    read_timeout: Duration,
    cancel: CancelToken,
) {
    debug!("CAN receive loop started");
    while !cancel.is_cancelled() {
        let reader = device.clone();
        let read = tokio::task::spawn_blocking(move || reader.read(read_timeout)).await;
        match read {
            Ok(Ok(Some(frame))) => {
                debug!(can_id = format!("0x{:X}", frame.id), "CAN frame received");
                publish_all(&publishers, &frame_to_envelope(&frame), "can").await;
            }
            Ok(Ok(None)) => {}
            Ok(Err(DeviceError::NotOpen)) => {
                if !cancel.sleep(ERROR_BACKOFF).await {
                    break;
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "CAN read failed");
                if !cancel.sleep(ERROR_BACKOFF).await {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "CAN read task failed");
                break;
            }
        }
    }
    debug!("CAN receive loop stopped");
}

impl SubscriberListener for CanGateway {
    fn on_message_arrived(&self, properties: &MessageProperties, envelope: &Envelope) {
        if let Err(e) = self.send(envelope) {
            warn!(app_topic = %properties.app_topic, error = %e, "CAN downlink dropped");
        }
    }
}
