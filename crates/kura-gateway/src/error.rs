use kura_core::WorkerError;
use thiserror::Error;

use crate::device::DeviceError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// Downlink message that cannot be turned into a device frame
    #[error("Invalid downlink message: {0}")]
    InvalidMessage(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
