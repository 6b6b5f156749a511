//! Response envelope and response codes

use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Envelope, MetricValue};
use crate::error::EnvelopeError;

pub const METRIC_RESPONSE_CODE: &str = "response.code";
pub const METRIC_EXCEPTION_MESSAGE: &str = "response.exception.message";
pub const METRIC_EXCEPTION_STACK: &str = "response.exception.stack";

/// Outcome of a request, carried as an HTTP-like status number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResponseCode {
    #[default]
    Ok,
    BadRequest,
    NotFound,
    Error,
}

impl ResponseCode {
    pub fn as_u16(self) -> u16 {
        match self {
            ResponseCode::Ok => 200,
            ResponseCode::BadRequest => 400,
            ResponseCode::NotFound => 404,
            ResponseCode::Error => 500,
        }
    }

    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            200 => Some(ResponseCode::Ok),
            400 => Some(ResponseCode::BadRequest),
            404 => Some(ResponseCode::NotFound),
            500 => Some(ResponseCode::Error),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        self == ResponseCode::Ok
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// A reply to a request
///
/// The code defaults to [`ResponseCode::Ok`]; failure replies are built with
/// [`ResponseEnvelope::failure`] so the code is always set explicitly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseEnvelope {
    pub code: ResponseCode,
    pub exception_message: Option<String>,
    pub exception_stack: Option<String>,
    pub envelope: Envelope,
}

impl ResponseEnvelope {
    pub fn new(code: ResponseCode) -> Self {
        Self {
            code,
            envelope: Envelope::new(),
            ..Default::default()
        }
    }

    pub fn ok() -> Self {
        Self::new(ResponseCode::Ok)
    }

    /// Failure reply carrying the error message and its cause chain
    pub fn failure(code: ResponseCode, error: &(dyn StdError + 'static)) -> Self {
        let mut response = Self::new(code);
        response.set_exception(error);
        response
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.envelope.body = Some(body.into());
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.envelope.add_metric(name, value);
        self
    }

    /// Record an error as the exception message and stack
    ///
    /// The stack lists the error and each of its sources, one per line.
    pub fn set_exception(&mut self, error: &(dyn StdError + 'static)) {
        self.exception_message = Some(error.to_string());

        let mut lines = vec![error.to_string()];
        let mut source = error.source();
        while let Some(cause) = source {
            lines.push(format!("caused by: {}", cause));
            source = cause.source();
        }
        self.exception_stack = Some(lines.join("\n"));
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.envelope.body.as_deref()
    }

    pub fn metric(&self, name: &str) -> Option<&MetricValue> {
        self.envelope.metric(name)
    }

    /// Flatten into a wire envelope with the response metrics set
    pub fn into_envelope(self) -> Envelope {
        let mut envelope = self.envelope;
        envelope.add_metric(METRIC_RESPONSE_CODE, i64::from(self.code.as_u16()));
        if let Some(message) = self.exception_message {
            envelope.add_metric(METRIC_EXCEPTION_MESSAGE, message);
        }
        if let Some(stack) = self.exception_stack {
            envelope.add_metric(METRIC_EXCEPTION_STACK, stack);
        }
        envelope
    }
}

impl TryFrom<Envelope> for ResponseEnvelope {
    type Error = EnvelopeError;

    fn try_from(mut envelope: Envelope) -> Result<Self, Self::Error> {
        let code = match envelope.remove_metric(METRIC_RESPONSE_CODE) {
            None => ResponseCode::Ok,
            Some(MetricValue::Int(n)) => u16::try_from(n)
                .ok()
                .and_then(ResponseCode::from_u16)
                .ok_or(EnvelopeError::UnknownResponseCode(n))?,
            Some(_) => {
                return Err(EnvelopeError::WrongMetricType {
                    name: METRIC_RESPONSE_CODE.to_string(),
                    expected: "int",
                })
            }
        };

        let exception_message = envelope.str_metric(METRIC_EXCEPTION_MESSAGE)?.map(String::from);
        let exception_stack = envelope.str_metric(METRIC_EXCEPTION_STACK)?.map(String::from);
        envelope.remove_metric(METRIC_EXCEPTION_MESSAGE);
        envelope.remove_metric(METRIC_EXCEPTION_STACK);

        Ok(Self {
            code,
            exception_message,
            exception_stack,
            envelope,
        })
    }
}
