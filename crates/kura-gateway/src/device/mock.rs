//! In-memory device for testing
//!
//! Incoming frames are queued with [`MockDevice::push_incoming`]; written
//! frames are recorded and can be inspected with [`MockDevice::written`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::{DeviceError, DeviceFrame, DeviceSettings, DeviceTransport};
use crate::config::MockDeviceConfig;

pub struct MockDevice {
    loopback: bool,
    open: AtomicBool,
    open_count: AtomicUsize,
    settings: Mutex<Option<DeviceSettings>>,
    incoming: Mutex<VecDeque<Result<DeviceFrame, DeviceError>>>,
    available: Condvar,
    written: Mutex<Vec<DeviceFrame>>,
}

impl MockDevice {
    pub fn new(config: &MockDeviceConfig) -> Self {
        Self {
            loopback: config.loopback,
            open: AtomicBool::new(false),
            open_count: AtomicUsize::new(0),
            settings: Mutex::new(None),
            incoming: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            written: Mutex::new(Vec::new()),
        }
    }

    /// Queue a frame for the next read
    pub fn push_incoming(&self, frame: DeviceFrame) {
        self.incoming.lock().push_back(Ok(frame));
        self.available.notify_all();
    }

    /// Make the next read fail with `error`
    pub fn push_error(&self, error: DeviceError) {
        self.incoming.lock().push_back(Err(error));
        self.available.notify_all();
    }

    pub fn written(&self) -> Vec<DeviceFrame> {
        self.written.lock().clone()
    }

    /// Settings from the most recent open
    pub fn settings(&self) -> Option<DeviceSettings> {
        self.settings.lock().clone()
    }

    /// How many times the device has been opened
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new(&MockDeviceConfig::default())
    }
}

impl DeviceTransport for MockDevice {
    fn open(&self, settings: &DeviceSettings) -> Result<(), DeviceError> {
        *self.settings.lock() = Some(settings.clone());
        self.open.store(true, Ordering::SeqCst);
        self.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), DeviceError> {
        self.open.store(false, Ordering::SeqCst);
        self.available.notify_all();
        Ok(())
    }

    fn read(&self, timeout: Duration) -> Result<Option<DeviceFrame>, DeviceError> {
        if !self.is_open() {
            return Err(DeviceError::NotOpen);
        }
        let mut incoming = self.incoming.lock();
        if incoming.is_empty() && !timeout.is_zero() {
            self.available.wait_for(&mut incoming, timeout);
        }
        match incoming.pop_front() {
            Some(result) => result.map(Some),
            None => Ok(None),
        }
    }

    fn write(&self, frame: &DeviceFrame) -> Result<(), DeviceError> {
        if !self.is_open() {
            return Err(DeviceError::NotOpen);
        }
        self.written.lock().push(frame.clone());
        if self.loopback {
            self.push_incoming(frame.clone());
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn can() -> DeviceSettings {
        DeviceSettings::Can {
            interface: "vcan0".into(),
        }
    }

    #[test]
    fn read_requires_open() {
        let device = MockDevice::default();
        assert_eq!(
            device.read(Duration::ZERO).unwrap_err(),
            DeviceError::NotOpen
        );
    }

    #[test]
    fn read_times_out_empty() {
        let device = MockDevice::default();
        device.open(&can()).unwrap();
        assert_eq!(device.read(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn loopback_feeds_writes_back() {
        let device = MockDevice::new(&MockDeviceConfig { loopback: true });
        device.open(&can()).unwrap();
        device.write(&DeviceFrame::new(0x123, [1, 2])).unwrap();

        assert_eq!(device.written().len(), 1);
        assert_eq!(
            device.read(Duration::ZERO).unwrap(),
            Some(DeviceFrame::new(0x123, [1, 2]))
        );
    }

    #[test]
    fn queued_error_is_returned_once() {
        let device = MockDevice::default();
        device.open(&can()).unwrap();
        device.push_error(DeviceError::Io("bus off".into()));

        assert!(device.read(Duration::ZERO).is_err());
        assert_eq!(device.read(Duration::ZERO).unwrap(), None);
    }
}
