//! Heater simulator
//!
//! Publishes simulated temperature readings on a fixed interval and answers
//! configuration requests:
//!
//! | Verb | Resources | Effect                                   |
//! |------|-----------|------------------------------------------|
//! | GET  | `config`  | current set point, mode and interval     |
//! | GET  | `readings`| latest readings                          |
//! | PUT  | `config`  | update `setPoint` and/or `mode`          |
//! | EXEC | `reset`   | restore the configured initial readings  |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kura_cloud::{ListenerSet, Publisher};
use kura_core::{
    CancelToken, Envelope, HandlerError, HandlerResult, ManagedWorker, MetricValue,
    RequestEnvelope, RequestHandler, RequestResources, ResponseEnvelope, StopOutcome, WorkerError,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bridge::{publish_all, Publishers};
use crate::config::HeaterConfig;

pub const METRIC_TEMPERATURE_INTERNAL: &str = "temperatureInternal";
pub const METRIC_TEMPERATURE_EXTERNAL: &str = "temperatureExternal";
pub const METRIC_TEMPERATURE_EXHAUST: &str = "temperatureExhaust";
pub const METRIC_SET_POINT: &str = "setPoint";
pub const METRIC_MODE: &str = "mode";
pub const METRIC_ERROR_CODE: &str = "errorCode";
pub const METRIC_PUBLISH_INTERVAL: &str = "publishIntervalMs";

const EXHAUST_OFFSET: f64 = 30.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaterMode {
    #[default]
    Program,
    Manual,
    Vacation,
}

impl HeaterMode {
    pub fn as_str(self) -> &'static str {
        match self {
            HeaterMode::Program => "program",
            HeaterMode::Manual => "manual",
            HeaterMode::Vacation => "vacation",
        }
    }

    /// Case-insensitive parse
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "program" => Some(HeaterMode::Program),
            "manual" => Some(HeaterMode::Manual),
            "vacation" => Some(HeaterMode::Vacation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeaterReadings {
    pub temperature_internal: f64,
    pub temperature_external: f64,
    pub temperature_exhaust: f64,
    pub set_point: f64,
    pub mode: HeaterMode,
    pub error_code: i64,
}

impl HeaterReadings {
    pub fn from_config(config: &HeaterConfig) -> Self {
        Self {
            temperature_internal: config.initial_temperature,
            temperature_external: config.external_temperature,
            temperature_exhaust: config.initial_temperature + EXHAUST_OFFSET,
            set_point: config.set_point,
            mode: config.mode,
            error_code: 0,
        }
    }

    /// Move the internal temperature one increment towards the set point
    pub fn step(&mut self, increment: f64) {
        let delta = self.set_point - self.temperature_internal;
        if delta.abs() <= increment {
            self.temperature_internal = self.set_point;
        } else {
            self.temperature_internal += increment.copysign(delta);
        }
        self.temperature_exhaust = self.temperature_internal + EXHAUST_OFFSET;
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope::new()
            .with_metric(METRIC_TEMPERATURE_INTERNAL, self.temperature_internal)
            .with_metric(METRIC_TEMPERATURE_EXTERNAL, self.temperature_external)
            .with_metric(METRIC_TEMPERATURE_EXHAUST, self.temperature_exhaust)
            .with_metric(METRIC_SET_POINT, self.set_point)
            .with_metric(METRIC_MODE, self.mode.as_str())
            .with_metric(METRIC_ERROR_CODE, self.error_code)
    }
}

pub struct Heater {
    config: RwLock<HeaterConfig>,
    readings: Arc<RwLock<HeaterReadings>>,
    publishers: Arc<Publishers>,
    worker: ManagedWorker,
}

impl Heater {
    pub fn new(config: HeaterConfig) -> Self {
        let readings = HeaterReadings::from_config(&config);
        Self {
            config: RwLock::new(config),
            readings: Arc::new(RwLock::new(readings)),
            publishers: Arc::new(ListenerSet::new()),
            worker: ManagedWorker::new("heater"),
        }
    }

    /// Handler id to register with the router
    pub fn id(&self) -> String {
        self.config.read().id.clone()
    }

    pub fn readings(&self) -> HeaterReadings {
        self.readings.read().clone()
    }

    pub fn add_publisher(&self, publisher: Arc<dyn Publisher>) -> bool {
        self.publishers.register(publisher)
    }

    pub fn remove_publisher(&self, publisher: &Arc<dyn Publisher>) -> bool {
        self.publishers.unregister(publisher)
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Start the periodic publisher
    pub async fn start(&self) -> Result<(), WorkerError> {
        let (interval, increment) = self.timing();
        let readings = self.readings.clone();
        let publishers = self.publishers.clone();
        self.worker
            .start(move |cancel| publish_loop(readings, publishers, interval, increment, cancel))
            .await?;
        info!(interval_ms = interval.as_millis() as u64, "Heater simulator started");
        Ok(())
    }

    pub async fn stop(&self) -> StopOutcome {
        self.worker.stop().await
    }

    /// Apply a new configuration and restart the publisher
    ///
    /// Set point and mode are taken from `config`; the current temperatures
    /// are kept.
    pub async fn reconfigure(&self, config: HeaterConfig) -> Result<(), WorkerError> {
        {
            let mut readings = self.readings.write();
            readings.set_point = config.set_point;
            readings.mode = config.mode;
            readings.temperature_external = config.external_temperature;
        }
        *self.config.write() = config;

        let (interval, increment) = self.timing();
        let readings = self.readings.clone();
        let publishers = self.publishers.clone();
        self.worker
            .restart(move |cancel| publish_loop(readings, publishers, interval, increment, cancel))
            .await?;
        info!(interval_ms = interval.as_millis() as u64, "Heater simulator reconfigured");
        Ok(())
    }

    fn timing(&self) -> (Duration, f64) {
        let config = self.config.read();
        (
            Duration::from_millis(config.publish_interval_ms),
            config.temperature_increment,
        )
    }

    fn config_response(&self) -> ResponseEnvelope {
        let readings = self.readings.read();
        let interval = self.config.read().publish_interval_ms;
        ResponseEnvelope::ok()
            .with_metric(METRIC_SET_POINT, readings.set_point)
            .with_metric(METRIC_MODE, readings.mode.as_str())
            .with_metric(METRIC_PUBLISH_INTERVAL, interval as i64)
    }
}

async fn publish_loop(
    readings: Arc<RwLock<HeaterReadings>>,
    publishers: Arc<Publishers>,
    interval: Duration,
    increment: f64,
    cancel: CancelToken,
) {
    while cancel.sleep(interval).await {
        let envelope = {
            let mut readings = readings.write();
            readings.step(increment);
            readings.to_envelope()
        };
        publish_all(&publishers, &envelope, "heater").await;
    }
    debug!("Heater publish loop stopped");
}

fn float_metric(request: &RequestEnvelope, name: &str) -> HandlerResult<Option<f64>> {
    match request.metric(name) {
        None => Ok(None),
        Some(value) => value
            .as_float()
            .map(Some)
            .ok_or_else(|| HandlerError::BadRequest(format!("{} must be a number", name))),
    }
}

#[async_trait]
impl RequestHandler for Heater {
    async fn do_get(
        &self,
        resources: &RequestResources,
        _request: &RequestEnvelope,
    ) -> HandlerResult<ResponseEnvelope> {
        if resources.matches(&["config"]) {
            Ok(self.config_response())
        } else if resources.matches(&["readings"]) {
            let mut response = ResponseEnvelope::ok();
            response.envelope.metrics = self.readings().to_envelope().metrics;
            Ok(response)
        } else {
            Err(HandlerError::NotFound(resources.to_string()))
        }
    }

    async fn do_put(
        &self,
        resources: &RequestResources,
        request: &RequestEnvelope,
    ) -> HandlerResult<ResponseEnvelope> {
        if !resources.matches(&["config"]) {
            return Err(HandlerError::NotFound(resources.to_string()));
        }

        let set_point = float_metric(request, METRIC_SET_POINT)?;
        let mode = match request.metric(METRIC_MODE) {
            None => None,
            Some(MetricValue::String(value)) => Some(
                HeaterMode::parse(value)
                    .ok_or_else(|| HandlerError::BadRequest(format!("unknown mode '{}'", value)))?,
            ),
            Some(other) => {
                return Err(HandlerError::BadRequest(format!(
                    "{} must be a string, got {}",
                    METRIC_MODE,
                    other.type_name()
                )))
            }
        };
        if set_point.is_none() && mode.is_none() {
            return Err(HandlerError::BadRequest(format!(
                "expected {} or {}",
                METRIC_SET_POINT, METRIC_MODE
            )));
        }

        {
            let mut readings = self.readings.write();
            let mut config = self.config.write();
            if let Some(set_point) = set_point {
                readings.set_point = set_point;
                config.set_point = set_point;
            }
            if let Some(mode) = mode {
                readings.mode = mode;
                config.mode = mode;
            }
        }
        info!(?set_point, ?mode, "Heater configuration updated");
        Ok(self.config_response())
    }

    async fn do_exec(
        &self,
        resources: &RequestResources,
        _request: &RequestEnvelope,
    ) -> HandlerResult<ResponseEnvelope> {
        if !resources.matches(&["reset"]) {
            return Err(HandlerError::NotFound(resources.to_string()));
        }
        let fresh = HeaterReadings::from_config(&self.config.read());
        *self.readings.write() = fresh;
        info!("Heater readings reset");
        Ok(ResponseEnvelope::ok())
    }
}
