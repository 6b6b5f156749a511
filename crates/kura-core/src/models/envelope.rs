//! Generic message envelope

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MetricValue, Position};
use crate::error::EnvelopeError;

/// A message exchanged with the cloud: optional body, optional position
/// and a set of uniquely named metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Raw body, hex-encoded on the wire
    #[serde(
        skip_serializing_if = "Option::is_none",
        default,
        with = "super::hex_body"
    )]
    pub body: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub metrics: BTreeMap<String, MetricValue>,
}

impl Envelope {
    /// Create an empty envelope stamped with the current time
    pub fn new() -> Self {
        Self {
            timestamp: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Set the body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Add a metric, replacing any previous value under the same name
    pub fn with_metric(mut self, name: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.metrics.insert(name.into(), value.into());
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    /// Insert a metric; returns the value it replaced, if any
    pub fn add_metric(
        &mut self,
        name: impl Into<String>,
        value: impl Into<MetricValue>,
    ) -> Option<MetricValue> {
        self.metrics.insert(name.into(), value.into())
    }

    pub fn remove_metric(&mut self, name: &str) -> Option<MetricValue> {
        self.metrics.remove(name)
    }

    pub fn metric(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    /// String metric lookup that fails on a type mismatch
    pub fn str_metric(&self, name: &str) -> Result<Option<&str>, EnvelopeError> {
        match self.metrics.get(name) {
            None => Ok(None),
            Some(MetricValue::String(s)) => Ok(Some(s)),
            Some(_) => Err(EnvelopeError::WrongMetricType {
                name: name.to_string(),
                expected: "string",
            }),
        }
    }

    /// Body as UTF-8 text, if present and valid
    pub fn body_text(&self) -> Option<&str> {
        self.body
            .as_deref()
            .and_then(|b| std::str::from_utf8(b).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn metric_names_are_unique() {
        let mut env = Envelope::new().with_metric("temperature", 20.0);
        let previous = env.add_metric("temperature", 21.0);
        assert_eq!(previous, Some(MetricValue::Float(20.0)));
        assert_eq!(env.metrics.len(), 1);
        assert_eq!(env.metric("temperature"), Some(&MetricValue::Float(21.0)));
    }

    #[test]
    fn body_and_metrics_may_be_absent() {
        let env = Envelope::new();
        assert!(env.body.is_none());
        assert!(env.metrics.is_empty());
        assert!(env.timestamp.is_some());
    }

    #[test]
    fn str_metric_rejects_other_types() {
        let env = Envelope::new().with_metric("mode", 3i64);
        assert!(matches!(
            env.str_metric("mode"),
            Err(EnvelopeError::WrongMetricType { .. })
        ));
        assert_eq!(env.str_metric("missing"), Ok(None));
    }

    #[test]
    fn body_serializes_as_hex() {
        let env = Envelope::default().with_body(vec![0xde, 0xad]);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json, serde_json::json!({"body": "dead"}));

        let back: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(back.body, Some(vec![0xde, 0xad]));
    }
}
