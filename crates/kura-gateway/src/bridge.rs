//! Shared plumbing for the device bridges
//!
//! A [`DeviceLink`] owns the device, the I/O lock that serializes every
//! open/close/write, the set of uplink publishers and the single receive
//! worker. Lifecycle calls (activate, reconfigure, deactivate) are
//! serialized by a separate async lock.

use std::sync::Arc;

use kura_cloud::{ListenerSet, Publisher};
use kura_core::{Envelope, ManagedWorker, StopOutcome};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::device::{DeviceError, DeviceFrame, DeviceSettings, DeviceTransport};

pub(crate) type Publishers = ListenerSet<dyn Publisher>;

pub(crate) struct DeviceLink {
    pub(crate) device: Arc<dyn DeviceTransport>,
    pub(crate) io: Arc<Mutex<()>>,
    pub(crate) publishers: Arc<Publishers>,
    pub(crate) lifecycle: tokio::sync::Mutex<()>,
    pub(crate) worker: ManagedWorker,
}

impl DeviceLink {
    pub(crate) fn new(name: &str, device: Arc<dyn DeviceTransport>) -> Self {
        Self {
            device,
            io: Arc::new(Mutex::new(())),
            publishers: Arc::new(ListenerSet::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            worker: ManagedWorker::new(name),
        }
    }

    /// Close the device if open, then open it with `settings`
    pub(crate) fn reopen(&self, settings: &DeviceSettings) -> Result<(), DeviceError> {
        let _io = self.io.lock();
        if self.device.is_open() {
            self.device.close()?;
        }
        self.device.open(settings)
    }

    pub(crate) fn close(&self) -> Result<(), DeviceError> {
        let _io = self.io.lock();
        self.device.close()
    }

    pub(crate) fn write(&self, frame: &DeviceFrame) -> Result<(), DeviceError> {
        write_locked(&self.io, self.device.as_ref(), frame)
    }

    pub(crate) async fn stop_worker(&self) -> StopOutcome {
        let outcome = self.worker.stop().await;
        if outcome == StopOutcome::Aborted {
            warn!(worker = %self.worker.name(), "Receive worker did not stop in time, aborted");
        }
        outcome
    }
}

pub(crate) fn write_locked(
    io: &Mutex<()>,
    device: &dyn DeviceTransport,
    frame: &DeviceFrame,
) -> Result<(), DeviceError> {
    let _io = io.lock();
    device.write(frame)
}

/// Publish `envelope` through every publisher; failures are logged
pub(crate) async fn publish_all(publishers: &Publishers, envelope: &Envelope, source: &str) {
    let targets = publishers.snapshot();
    if targets.is_empty() {
        debug!(source, "No publishers attached, uplink message dropped");
        return;
    }
    for publisher in targets {
        if let Err(e) = publisher.publish(envelope).await {
            error!(source, error = %e, "Failed to publish uplink message");
        }
    }
}
