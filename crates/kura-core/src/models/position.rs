//! Geographic position attached to envelopes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device position at the time a message was produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Degrees, WGS84
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub latitude: Option<f64>,
    /// Degrees, WGS84
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub longitude: Option<f64>,
    /// Meters above sea level
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub altitude: Option<f64>,
    /// Degrees from true north
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub heading: Option<f64>,
    /// Dilution of precision
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub precision: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub satellites: Option<u32>,
    /// Meters per second
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Position {
    /// Position with only coordinates set
    pub fn basic(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            altitude: Some(altitude),
            ..Default::default()
        }
    }

    /// Copy of this position reduced to coordinates
    pub fn to_basic(&self) -> Self {
        Self {
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude,
            ..Default::default()
        }
    }
}
