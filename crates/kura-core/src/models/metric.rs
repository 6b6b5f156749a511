//! Typed metric values carried by envelopes

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single named metric value
///
/// Serialized adjacently tagged, e.g. `{"type":"int","value":42}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum MetricValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(#[serde(with = "super::hex_bytes")] Vec<u8>),
}

impl MetricValue {
    /// Name of the value type, as used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            MetricValue::String(_) => "string",
            MetricValue::Int(_) => "int",
            MetricValue::Float(_) => "float",
            MetricValue::Bool(_) => "bool",
            MetricValue::Bytes(_) => "bytes",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetricValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Float view; integers widen
    pub fn as_float(&self) -> Option<f64> {
        match self {
            MetricValue::Float(f) => Some(*f),
            MetricValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetricValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            MetricValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::String(s) => f.write_str(s),
            MetricValue::Int(n) => write!(f, "{}", n),
            MetricValue::Float(v) => write!(f, "{}", v),
            MetricValue::Bool(b) => write!(f, "{}", b),
            MetricValue::Bytes(b) => f.write_str(&hex::encode(b)),
        }
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::String(value.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::String(value)
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Int(value)
    }
}

impl From<i32> for MetricValue {
    fn from(value: i32) -> Self {
        MetricValue::Int(value.into())
    }
}

impl From<u32> for MetricValue {
    fn from(value: u32) -> Self {
        MetricValue::Int(value.into())
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Float(value)
    }
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        MetricValue::Bool(value)
    }
}

impl From<Vec<u8>> for MetricValue {
    fn from(value: Vec<u8>) -> Self {
        MetricValue::Bytes(value)
    }
}
