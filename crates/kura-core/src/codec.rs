//! Envelope wire encoding

use crate::error::CodecError;
use crate::models::Envelope;

/// Converts envelopes to and from transport payload bytes
pub trait PayloadCodec: Send + Sync {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, payload: &[u8]) -> Result<Envelope, CodecError>;
}

/// JSON payload codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(envelope).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> Result<Envelope, CodecError> {
        serde_json::from_slice(payload).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
