//! Request envelope with correlation metadata

use uuid::Uuid;

use super::{Envelope, MetricValue};
use crate::error::EnvelopeError;

/// Metric carrying the request correlation id
pub const METRIC_REQUEST_ID: &str = "request.id";
/// Metric carrying the client id of the requester (where replies go)
pub const METRIC_REQUESTER_CLIENT_ID: &str = "requester.client.id";

/// An envelope known to carry a request id and a requester client id
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    request_id: String,
    requester_id: String,
    envelope: Envelope,
}

impl RequestEnvelope {
    /// Build a request; correlation metrics are written into the envelope
    pub fn new(request_id: impl Into<String>, requester_id: impl Into<String>) -> Self {
        Self::with_envelope(request_id, requester_id, Envelope::new())
    }

    /// Build a request with a freshly generated request id
    pub fn generate(requester_id: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), requester_id)
    }

    pub fn with_envelope(
        request_id: impl Into<String>,
        requester_id: impl Into<String>,
        mut envelope: Envelope,
    ) -> Self {
        let request_id = request_id.into();
        let requester_id = requester_id.into();
        envelope.add_metric(METRIC_REQUEST_ID, request_id.as_str());
        envelope.add_metric(METRIC_REQUESTER_CLIENT_ID, requester_id.as_str());
        Self {
            request_id,
            requester_id,
            envelope,
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.envelope.body = Some(body.into());
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.envelope.add_metric(name, value);
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn requester_id(&self) -> &str {
        &self.requester_id
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.envelope.body.as_deref()
    }

    pub fn metric(&self, name: &str) -> Option<&MetricValue> {
        self.envelope.metric(name)
    }

    pub fn into_envelope(self) -> Envelope {
        self.envelope
    }
}

fn correlation_field(envelope: &Envelope, name: &'static str) -> Result<String, EnvelopeError> {
    match envelope.str_metric(name)? {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(EnvelopeError::MissingMetric(name)),
    }
}

impl TryFrom<Envelope> for RequestEnvelope {
    type Error = EnvelopeError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let request_id = correlation_field(&envelope, METRIC_REQUEST_ID)?;
        let requester_id = correlation_field(&envelope, METRIC_REQUESTER_CLIENT_ID)?;
        Ok(Self {
            request_id,
            requester_id,
            envelope,
        })
    }
}

impl From<RequestEnvelope> for Envelope {
    fn from(request: RequestEnvelope) -> Self {
        request.envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_metrics_written_on_construction() {
        let req = RequestEnvelope::new("req-1", "console");
        let env = req.into_envelope();
        assert_eq!(env.str_metric(METRIC_REQUEST_ID), Ok(Some("req-1")));
        assert_eq!(env.str_metric(METRIC_REQUESTER_CLIENT_ID), Ok(Some("console")));
    }

    #[test]
    fn try_from_requires_both_fields() {
        let env = Envelope::new().with_metric(METRIC_REQUEST_ID, "req-1");
        assert_eq!(
            RequestEnvelope::try_from(env),
            Err(EnvelopeError::MissingMetric(METRIC_REQUESTER_CLIENT_ID))
        );

        let env = Envelope::new().with_metric(METRIC_REQUESTER_CLIENT_ID, "console");
        assert_eq!(
            RequestEnvelope::try_from(env),
            Err(EnvelopeError::MissingMetric(METRIC_REQUEST_ID))
        );
    }

    #[test]
    fn empty_request_id_is_missing() {
        let env = Envelope::new()
            .with_metric(METRIC_REQUEST_ID, "")
            .with_metric(METRIC_REQUESTER_CLIENT_ID, "console");
        assert_eq!(
            RequestEnvelope::try_from(env),
            Err(EnvelopeError::MissingMetric(METRIC_REQUEST_ID))
        );
    }

    #[test]
    fn generated_ids_differ() {
        let a = RequestEnvelope::generate("console");
        let b = RequestEnvelope::generate("console");
        assert_ne!(a.request_id(), b.request_id());
    }
}
