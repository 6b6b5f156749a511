//! Serial port bridge
//!
//! Polls the port, splits input into delimiter-terminated lines and
//! publishes each line as an envelope body. Downlink bodies are written to
//! the port as-is.

use std::sync::Arc;
use std::time::Duration;

use kura_cloud::{MessageProperties, Publisher, SubscriberListener};
use kura_core::{CancelToken, Envelope, WorkerError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::bridge::{publish_all, write_locked, DeviceLink, Publishers};
use crate::config::SerialGatewayConfig;
use crate::device::{DeviceFrame, DeviceSettings, DeviceTransport};
use crate::error::{GatewayError, GatewayResult};

/// Metric carrying the port a line was read from
pub const METRIC_PORT: &str = "port";

pub struct SerialGateway {
    config: RwLock<SerialGatewayConfig>,
    link: DeviceLink,
}

/// Accumulates bytes until a delimiter completes a line
#[derive(Debug)]
pub struct LineBuffer {
    delimiter: u8,
    max_line: usize,
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new(delimiter: u8, max_line: usize) -> Self {
        Self {
            delimiter,
            max_line,
            pending: Vec::new(),
        }
    }

    /// Feed bytes, returning every line they complete (delimiter stripped)
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == self.delimiter {
                lines.push(std::mem::take(&mut self.pending));
            } else if self.pending.len() >= self.max_line {
                warn!(max_line = self.max_line, "Serial line too long, discarded");
                self.pending.clear();
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}

impl SerialGateway {
    pub fn new(device: Arc<dyn DeviceTransport>, config: SerialGatewayConfig) -> Self {
        Self {
            config: RwLock::new(config),
            link: DeviceLink::new("serial-poller", device),
        }
    }

    pub fn config(&self) -> SerialGatewayConfig {
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

    pub async fn activate(&self) -> GatewayResult<()> {
        let _lifecycle = self.link.lifecycle.lock().await;
        if self.link.worker.is_running() {
            return Err(WorkerError::AlreadyRunning(self.link.worker.name().to_string()).into());
        }
        let config = self.config();
        self.open_and_start(&config).await
    }

    /// Cancel polling, close the port, re-open with `config` and poll again
    pub async fn reconfigure(&self, config: SerialGatewayConfig) -> GatewayResult<()> {
        let _lifecycle = self.link.lifecycle.lock().await;
        self.link.stop_worker().await;
        *self.config.write() = config.clone();
        self.open_and_start(&config).await
    }

    pub async fn deactivate(&self) -> GatewayResult<()> {
        let _lifecycle = self.link.lifecycle.lock().await;
        self.link.stop_worker().await;
        self.link.close()?;
        info!("Serial gateway deactivated");
        Ok(())
    }

    /// Write `envelope`'s body to the port
    pub fn send(&self, envelope: &Envelope) -> GatewayResult<()> {
        let body = envelope
            .body
            .clone()
            .ok_or_else(|| GatewayError::InvalidMessage("message has no body".to_string()))?;
        self.link.write(&DeviceFrame::bytes(body))?;
        Ok(())
    }

    async fn open_and_start(&self, config: &SerialGatewayConfig) -> GatewayResult<()> {
        self.link
            .reopen(&DeviceSettings::Serial(config.settings.clone()))?;

        let poller = Poller {
            device: self.link.device.clone(),
            io: self.link.io.clone(),
            publishers: self.link.publishers.clone(),
            port: config.settings.port.clone(),
            echo: config.echo,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            lines: LineBuffer::new(config.delimiter, config.max_line),
        };
        self.link.worker.start(move |cancel| poller.run(cancel)).await?;

        info!(
            port = %config.settings.port,
            baud_rate = config.settings.baud_rate,
            "Serial gateway active"
        );
        Ok(())
    }
}

struct Poller {
    device: Arc<dyn DeviceTransport>,
    io: Arc<Mutex<()>>,
    publishers: Arc<Publishers>,
    port: String,
    echo: bool,
    poll_interval: Duration,
    lines: LineBuffer,
}

impl Poller {
    async fn run(mut self, cancel: CancelToken) {
        debug!(port = %self.port, "Serial poll loop started");
        while !cancel.is_cancelled() {
            let reader = self.device.clone();
            let read = tokio::task::spawn_blocking(move || reader.read(Duration::ZERO)).await;
            match read {
                Ok(Ok(Some(chunk))) => self.handle_chunk(&chunk.data).await,
                Ok(Ok(None)) => {
                    if !cancel.sleep(self.poll_interval).await {
                        break;
                    }
                }
                Ok(Err(e)) => {
                    warn!(port = %self.port, error = %e, "Serial read failed");
                    if !cancel.sleep(self.poll_interval).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(port = %self.port, error = %e, "Serial read task failed");
                    break;
                }
            }
        }
        debug!(port = %self.port, "Serial poll loop stopped");
    }

    async fn handle_chunk(&mut self, data: &[u8]) {
        if self.echo {
            if let Err(e) = write_locked(&self.io, self.device.as_ref(), &DeviceFrame::bytes(data)) {
                warn!(port = %self.port, error = %e, "Serial echo failed");
            }
        }
        for line in self.lines.push(data) {
            let envelope = Envelope::new()
                .with_body(line)
                .with_metric(METRIC_PORT, self.port.as_str());
            publish_all(&self.publishers, &envelope, "serial").await;
        }
    }
}

impl SubscriberListener for SerialGateway {
    fn on_message_arrived(&self, properties: &MessageProperties, envelope: &Envelope) {
        if let Err(e) = self.send(envelope) {
            warn!(app_topic = %properties.app_topic, error = %e, "Serial downlink dropped");
        }
    }
}
