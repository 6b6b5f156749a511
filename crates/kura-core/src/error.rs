//! Common error types for request handlers and envelopes

use thiserror::Error;

use crate::models::ResponseCode;

/// Result type for request handler operations
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Errors a request handler may return
///
/// The router converts these into reply envelopes; see [`HandlerError::response_code`].
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Request was malformed (bad resources, bad body, bad metric)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Addressed resource does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Verb not implemented by this handler
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// No cloud connection available
    #[error("Not connected")]
    NotConnected,

    /// Device or cloud transport failed while serving the request
    #[error("Transport error: {0}")]
    Transport(String),

    /// Any other failure, with its cause preserved
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl HandlerError {
    /// Internal error without an underlying cause
    pub fn internal(message: impl Into<String>) -> Self {
        HandlerError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Internal error wrapping the error that caused it
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        HandlerError::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns the reply code for this error
    pub fn response_code(&self) -> ResponseCode {
        match self {
            HandlerError::BadRequest(_) => ResponseCode::BadRequest,
            HandlerError::NotFound(_) => ResponseCode::NotFound,
            HandlerError::NotSupported(_) => ResponseCode::NotFound,
            HandlerError::NotConnected => ResponseCode::Error,
            HandlerError::Transport(_) => ResponseCode::Error,
            HandlerError::Internal { .. } => ResponseCode::Error,
        }
    }
}

/// Errors raised while interpreting an envelope
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EnvelopeError {
    /// A required metric is absent or empty
    #[error("Missing metric: {0}")]
    MissingMetric(&'static str),

    /// A metric is present with the wrong value type
    #[error("Metric {name} is not of type {expected}")]
    WrongMetricType {
        name: String,
        expected: &'static str,
    },

    /// A response code metric carries a value outside the known set
    #[error("Unknown response code: {0}")]
    UnknownResponseCode(i64),
}

/// Payload encoding/decoding errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode payload: {0}")]
    Encode(String),

    #[error("Failed to decode payload: {0}")]
    Decode(String),
}
