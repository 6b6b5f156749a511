//! Raw SocketCAN device
//!
//! Frames up to 0x7FF are sent with a standard id, larger ids as extended.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket, StandardId};
use tracing::{debug, info};

use super::{DeviceError, DeviceFrame, DeviceSettings, DeviceTransport};

const MAX_STANDARD_ID: u32 = 0x7FF;

pub struct SocketCanDevice {
    socket: Mutex<Option<CanSocket>>,
}

impl SocketCanDevice {
    pub fn new() -> Self {
        Self {
            socket: Mutex::new(None),
        }
    }
}

impl Default for SocketCanDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn to_can_frame(frame: &DeviceFrame) -> Result<CanFrame, DeviceError> {
    let built = if frame.id <= MAX_STANDARD_ID {
        StandardId::new(frame.id as u16).and_then(|id| CanFrame::new(id, &frame.data))
    } else {
        ExtendedId::new(frame.id).and_then(|id| CanFrame::new(id, &frame.data))
    };
    built.ok_or_else(|| {
        DeviceError::InvalidFrame(format!(
            "id 0x{:X} with {} data bytes",
            frame.id,
            frame.data.len()
        ))
    })
}

impl DeviceTransport for SocketCanDevice {
    fn open(&self, settings: &DeviceSettings) -> Result<(), DeviceError> {
        let DeviceSettings::Can { interface } = settings else {
            return Err(DeviceError::Unsupported(
                "SocketCAN device needs CAN settings".to_string(),
            ));
        };

        let socket = CanSocket::open(interface)
            .map_err(|e| DeviceError::OpenFailed(format!("{}: {}", interface, e)))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| DeviceError::OpenFailed(format!("Failed to set non-blocking: {}", e)))?;

        info!(interface = %interface, "CAN socket opened");
        *self.socket.lock() = Some(socket);
        Ok(())
    }

    fn close(&self) -> Result<(), DeviceError> {
        if self.socket.lock().take().is_some() {
            debug!("CAN socket closed");
        }
        Ok(())
    }

    fn read(&self, timeout: Duration) -> Result<Option<DeviceFrame>, DeviceError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let guard = self.socket.lock();
                let socket = guard.as_ref().ok_or(DeviceError::NotOpen)?;
                match socket.read_frame() {
                    Ok(frame) => {
                        return Ok(Some(DeviceFrame::new(frame.raw_id(), frame.data())));
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(DeviceError::Io(e.to_string())),
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn write(&self, frame: &DeviceFrame) -> Result<(), DeviceError> {
        let can_frame = to_can_frame(frame)?;
        let guard = self.socket.lock();
        let socket = guard.as_ref().ok_or(DeviceError::NotOpen)?;
        socket
            .write_frame(&can_frame)
            .map_err(|e| DeviceError::Io(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.socket.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_and_extended_ids() {
        let standard = to_can_frame(&DeviceFrame::new(0x123, [1])).unwrap();
        assert_eq!(standard.raw_id(), 0x123);
        assert!(!standard.is_extended());

        let extended = to_can_frame(&DeviceFrame::new(0x18DA_F101, [1])).unwrap();
        assert_eq!(extended.raw_id(), 0x18DA_F101);
        assert!(extended.is_extended());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let err = to_can_frame(&DeviceFrame::new(0x123, [0u8; 9])).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidFrame(_)));
    }

    #[test]
    fn read_without_open_fails() {
        let device = SocketCanDevice::new();
        assert_eq!(
            device.read(Duration::ZERO).unwrap_err(),
            DeviceError::NotOpen
        );
    }
}
