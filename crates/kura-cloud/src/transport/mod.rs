//! Cloud-side transport layer
//!
//! The production transport is an MQTT client living outside this
//! workspace; it plugs in by implementing [`DataTransport`]. The loopback
//! transport here serves tests and the demo daemon.
//!
//! # Example
//!
//! ```ignore
//! use kura_cloud::config::DataTransportConfig;
//! use kura_cloud::transport::create_transport;
//!
//! let transport = create_transport(&DataTransportConfig::default())?;
//! transport.connect().await?;
//! ```

mod adapter;
pub mod error;
pub mod mock;

pub use adapter::{DataTransport, InboundMessage, MessageId, TransportEvent};
pub use error::TransportError;

use std::sync::Arc;

use crate::config::DataTransportConfig;

/// Create a data transport based on configuration
pub fn create_transport(
    config: &DataTransportConfig,
) -> Result<Arc<dyn DataTransport>, TransportError> {
    match config {
        DataTransportConfig::Loopback(cfg) => Ok(Arc::new(mock::MockDataTransport::new(cfg))),
    }
}
