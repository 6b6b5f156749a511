//! Asset handler
//!
//! Exposes a catalog of assets and their channels:
//!
//! - `GET assets` lists assets. The body may be empty, `[]`, or a JSON
//!   array of `{"name": ...}` objects selecting assets by name.
//! - `EXEC read` reads channels: `[{"name": "a1", "channels": [{"name": "c1"}]}]`.
//!   Omitting `channels` reads every channel of the asset; an empty body
//!   reads every asset.
//! - `EXEC write` writes channels: `[{"name": "a1", "channels": [{"name": "c1", "value": 5}]}]`.
//!   The body is required.
//!
//! Replies carry the JSON result as body.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kura_core::{
    HandlerError, HandlerResult, RequestEnvelope, RequestHandler, RequestResources,
    ResponseEnvelope,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::AssetConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelValueType {
    Boolean,
    Integer,
    Float,
    String,
}

impl ChannelValueType {
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ChannelValueType::Boolean => value.is_boolean(),
            ChannelValueType::Integer => value.is_i64() || value.is_u64(),
            ChannelValueType::Float => value.is_number(),
            ChannelValueType::String => value.is_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelMode {
    #[default]
    Read,
    Write,
    ReadWrite,
}

impl ChannelMode {
    pub fn readable(self) -> bool {
        matches!(self, ChannelMode::Read | ChannelMode::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, ChannelMode::Write | ChannelMode::ReadWrite)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ChannelValueType,
    pub mode: ChannelMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub name: String,
    pub channels: Vec<ChannelInfo>,
}

/// Outcome of reading or writing one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub asset: String,
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChannelRecord {
    fn value(asset: &str, channel: &str, value: Value) -> Self {
        Self {
            asset: asset.to_string(),
            channel: channel.to_string(),
            value: Some(value),
            timestamp: Utc::now(),
            error: None,
        }
    }

    fn failed(asset: &str, channel: &str, error: impl Into<String>) -> Self {
        Self {
            asset: asset.to_string(),
            channel: channel.to_string(),
            value: None,
            timestamp: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// Source of asset definitions and channel values
///
/// Channel-level problems (unknown channel, wrong mode, wrong type) are
/// reported per record; only an unknown asset fails the whole call.
pub trait AssetCatalog: Send + Sync {
    fn assets(&self) -> Vec<AssetInfo>;

    /// Read `channels` of `asset`, or every readable channel when `None`
    fn read(&self, asset: &str, channels: Option<&[String]>) -> HandlerResult<Vec<ChannelRecord>>;

    fn write(&self, asset: &str, values: &[(String, Value)]) -> HandlerResult<Vec<ChannelRecord>>;
}

struct AssetState {
    info: AssetInfo,
    values: BTreeMap<String, Value>,
}

/// Catalog holding channel values in memory
pub struct InMemoryAssetCatalog {
    assets: RwLock<BTreeMap<String, AssetState>>,
}

impl InMemoryAssetCatalog {
    pub fn new(configs: &[AssetConfig]) -> Self {
        let assets = configs
            .iter()
            .map(|config| {
                let info = AssetInfo {
                    name: config.name.clone(),
                    channels: config
                        .channels
                        .iter()
                        .map(|c| ChannelInfo {
                            name: c.name.clone(),
                            value_type: c.value_type,
                            mode: c.mode,
                        })
                        .collect(),
                };
                let values = config
                    .channels
                    .iter()
                    .filter_map(|c| c.initial.clone().map(|v| (c.name.clone(), v)))
                    .collect();
                (config.name.clone(), AssetState { info, values })
            })
            .collect();
        Self {
            assets: RwLock::new(assets),
        }
    }
}

impl AssetCatalog for InMemoryAssetCatalog {
    fn assets(&self) -> Vec<AssetInfo> {
        self.assets.read().values().map(|a| a.info.clone()).collect()
    }

    fn read(&self, asset: &str, channels: Option<&[String]>) -> HandlerResult<Vec<ChannelRecord>> {
        let assets = self.assets.read();
        let state = assets
            .get(asset)
            .ok_or_else(|| HandlerError::NotFound(format!("asset '{}'", asset)))?;

        let names: Vec<String> = match channels {
            Some(names) => names.to_vec(),
            None => state
                .info
                .channels
                .iter()
                .filter(|c| c.mode.readable())
                .map(|c| c.name.clone())
                .collect(),
        };

        Ok(names
            .iter()
            .map(|name| {
                match state.info.channels.iter().find(|c| &c.name == name) {
                    None => ChannelRecord::failed(asset, name, "unknown channel"),
                    Some(c) if !c.mode.readable() => {
                        ChannelRecord::failed(asset, name, "channel is not readable")
                    }
                    Some(_) => match state.values.get(name) {
                        Some(value) => ChannelRecord::value(asset, name, value.clone()),
                        None => ChannelRecord::failed(asset, name, "no value"),
                    },
                }
            })
            .collect())
    }

    fn write(&self, asset: &str, values: &[(String, Value)]) -> HandlerResult<Vec<ChannelRecord>> {
        let mut assets = self.assets.write();
        let state = assets
            .get_mut(asset)
            .ok_or_else(|| HandlerError::NotFound(format!("asset '{}'", asset)))?;

        let mut records = Vec::with_capacity(values.len());
        for (name, value) in values {
            let channel = state.info.channels.iter().find(|c| &c.name == name);
            let record = match channel {
                None => ChannelRecord::failed(asset, name, "unknown channel"),
                Some(c) if !c.mode.writable() => {
                    ChannelRecord::failed(asset, name, "channel is not writable")
                }
                Some(c) if !c.value_type.accepts(value) => ChannelRecord::failed(
                    asset,
                    name,
                    format!("expected {:?} value", c.value_type),
                ),
                Some(_) => {
                    state.values.insert(name.clone(), value.clone());
                    ChannelRecord::value(asset, name, value.clone())
                }
            };
            records.push(record);
        }
        Ok(records)
    }
}

#[derive(Debug, Deserialize)]
struct AssetSelector {
    name: String,
    #[serde(default)]
    channels: Option<Vec<ChannelSelector>>,
}

#[derive(Debug, Deserialize)]
struct ChannelSelector {
    name: String,
    #[serde(default)]
    value: Option<Value>,
}

/// Parse a request body into asset selectors; `None` for an absent or blank body
fn parse_selectors(request: &RequestEnvelope) -> HandlerResult<Option<Vec<AssetSelector>>> {
    let body = request.body().unwrap_or_default();
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| HandlerError::BadRequest(format!("invalid asset selection: {}", e)))
}

fn json_response<T: Serialize>(value: &T) -> HandlerResult<ResponseEnvelope> {
    let body = serde_json::to_vec(value)
        .map_err(|e| HandlerError::internal_with_source("failed to encode response", e))?;
    Ok(ResponseEnvelope::ok().with_body(body))
}

/// Request handler serving an [`AssetCatalog`]
pub struct AssetHandler {
    catalog: Arc<dyn AssetCatalog>,
}

impl AssetHandler {
    pub fn new(catalog: Arc<dyn AssetCatalog>) -> Self {
        Self { catalog }
    }

    fn list(&self, selectors: &[AssetSelector]) -> HandlerResult<Vec<AssetInfo>> {
        let assets = self.catalog.assets();
        if selectors.is_empty() {
            return Ok(assets);
        }
        selectors
            .iter()
            .map(|selector| {
                assets
                    .iter()
                    .find(|a| a.name == selector.name)
                    .cloned()
                    .ok_or_else(|| HandlerError::NotFound(format!("asset '{}'", selector.name)))
            })
            .collect()
    }

    fn read(&self, selectors: &[AssetSelector]) -> HandlerResult<Vec<ChannelRecord>> {
        let mut records = Vec::new();
        for selector in selectors {
            let names: Option<Vec<String>> = selector
                .channels
                .as_ref()
                .map(|channels| channels.iter().map(|c| c.name.clone()).collect());
            records.extend(self.catalog.read(&selector.name, names.as_deref())?);
        }
        Ok(records)
    }

    fn read_all(&self) -> HandlerResult<Vec<ChannelRecord>> {
        let mut records = Vec::new();
        for asset in self.catalog.assets() {
            records.extend(self.catalog.read(&asset.name, None)?);
        }
        Ok(records)
    }

    fn write(&self, selectors: &[AssetSelector]) -> HandlerResult<Vec<ChannelRecord>> {
        let mut records = Vec::new();
        for selector in selectors {
            let channels = selector.channels.as_deref().unwrap_or_default();
            let values = channels
                .iter()
                .map(|c| {
                    c.value.clone().map(|v| (c.name.clone(), v)).ok_or_else(|| {
                        HandlerError::BadRequest(format!(
                            "channel '{}' of '{}' has no value",
                            c.name, selector.name
                        ))
                    })
                })
                .collect::<HandlerResult<Vec<_>>>()?;
            records.extend(self.catalog.write(&selector.name, &values)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl RequestHandler for AssetHandler {
    async fn do_get(
        &self,
        resources: &RequestResources,
        request: &RequestEnvelope,
    ) -> HandlerResult<ResponseEnvelope> {
        if !resources.matches(&["assets"]) {
            return Err(HandlerError::BadRequest(format!(
                "unexpected resources '{}'",
                resources
            )));
        }
        let selectors = parse_selectors(request)?.unwrap_or_default();
        let assets = self.list(&selectors)?;
        debug!(count = assets.len(), "Listing assets");
        json_response(&assets)
    }

    async fn do_exec(
        &self,
        resources: &RequestResources,
        request: &RequestEnvelope,
    ) -> HandlerResult<ResponseEnvelope> {
        let records = if resources.matches(&["read"]) {
            match parse_selectors(request)? {
                Some(selectors) => self.read(&selectors)?,
                None => self.read_all()?,
            }
        } else if resources.matches(&["write"]) {
            let selectors = parse_selectors(request)?
                .ok_or_else(|| HandlerError::BadRequest("write needs a request body".into()))?;
            self.write(&selectors)?
        } else {
            return Err(HandlerError::BadRequest(format!(
                "unexpected resources '{}'",
                resources
            )));
        };
        json_response(&records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn catalog() -> Arc<InMemoryAssetCatalog> {
        Arc::new(InMemoryAssetCatalog::new(&[
            AssetConfig {
                name: "pump".into(),
                channels: vec![
                    ChannelConfig {
                        name: "speed".into(),
                        value_type: ChannelValueType::Integer,
                        mode: ChannelMode::ReadWrite,
                        initial: Some(json!(1200)),
                    },
                    ChannelConfig {
                        name: "enabled".into(),
                        value_type: ChannelValueType::Boolean,
                        mode: ChannelMode::Write,
                        initial: None,
                    },
                ],
            },
            AssetConfig {
                name: "valve".into(),
                channels: vec![ChannelConfig {
                    name: "open".into(),
                    value_type: ChannelValueType::Boolean,
                    mode: ChannelMode::Read,
                    initial: Some(json!(false)),
                }],
            },
        ]))
    }

    fn resources(path: &str) -> RequestResources {
        RequestResources::new(vec![path.to_string()])
    }

    fn request(body: &str) -> RequestEnvelope {
        RequestEnvelope::new("req-1", "console").with_body(body)
    }

    fn body_json(response: &ResponseEnvelope) -> Value {
        serde_json::from_slice(response.body().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn get_all_assets() {
        let handler = AssetHandler::new(catalog());
        for body in ["", "[]"] {
            let response = handler.do_get(&resources("assets"), &request(body)).await.unwrap();
            let listed = body_json(&response);
            assert_eq!(listed.as_array().unwrap().len(), 2);
            assert_eq!(listed[0]["name"], "pump");
            assert_eq!(listed[0]["channels"][0]["type"], "INTEGER");
        }
    }

    #[tokio::test]
    async fn get_selected_assets() {
        let handler = AssetHandler::new(catalog());
        let response = handler
            .do_get(&resources("assets"), &request(r#"[{"name": "valve"}]"#))
            .await
            .unwrap();
        let listed = body_json(&response);
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["name"], "valve");
    }

    #[tokio::test]
    async fn get_rejects_bad_input() {
        let handler = AssetHandler::new(catalog());

        let wrong_resource = handler.do_get(&resources("things"), &request("")).await;
        assert!(matches!(wrong_resource, Err(HandlerError::BadRequest(_))));

        let not_json = handler.do_get(&resources("assets"), &request("{oops")).await;
        assert!(matches!(not_json, Err(HandlerError::BadRequest(_))));

        let not_objects = handler.do_get(&resources("assets"), &request("[1, 2]")).await;
        assert!(matches!(not_objects, Err(HandlerError::BadRequest(_))));

        let unknown = handler
            .do_get(&resources("assets"), &request(r#"[{"name": "boiler"}]"#))
            .await;
        assert!(matches!(unknown, Err(HandlerError::NotFound(_))));
    }

    #[tokio::test]
    async fn read_all_readable_channels() {
        let handler = AssetHandler::new(catalog());
        let response = handler
            .do_exec(&resources("read"), &request(r#"[{"name": "pump"}]"#))
            .await
            .unwrap();
        let records = body_json(&response);
        assert_eq!(records.as_array().unwrap().len(), 1);
        assert_eq!(records[0]["channel"], "speed");
        assert_eq!(records[0]["value"], 1200);
    }

    #[tokio::test]
    async fn write_then_read_back() {
        let catalog = catalog();
        let handler = AssetHandler::new(catalog.clone());
        let response = handler
            .do_exec(
                &resources("write"),
                &request(r#"[{"name": "pump", "channels": [{"name": "speed", "value": 900}, {"name": "enabled", "value": "yes"}]}]"#),
            )
            .await
            .unwrap();
        let records = body_json(&response);
        assert_eq!(records[0]["value"], 900);
        assert!(records[1]["error"].is_string());

        let read = catalog.read("pump", Some(&["speed".to_string()][..])).unwrap();
        assert_eq!(read[0].value, Some(json!(900)));
    }

    #[tokio::test]
    async fn write_to_read_only_channel_fails_per_record() {
        let handler = AssetHandler::new(catalog());
        let response = handler
            .do_exec(
                &resources("write"),
                &request(r#"[{"name": "valve", "channels": [{"name": "open", "value": true}]}]"#),
            )
            .await
            .unwrap();
        let records = body_json(&response);
        assert_eq!(records[0]["error"], "channel is not writable");
    }

    #[tokio::test]
    async fn write_without_value_is_bad_request() {
        let handler = AssetHandler::new(catalog());
        let result = handler
            .do_exec(
                &resources("write"),
                &request(r#"[{"name": "pump", "channels": [{"name": "speed"}]}]"#),
            )
            .await;
        assert!(matches!(result, Err(HandlerError::BadRequest(_))));
    }

    #[tokio::test]
    async fn unknown_exec_is_bad_request() {
        let handler = AssetHandler::new(catalog());
        let result = handler.do_exec(&resources("delete"), &request("[]")).await;
        assert!(matches!(result, Err(HandlerError::BadRequest(_))));
    }

    #[tokio::test]
    async fn read_without_body_reads_every_asset() {
        let handler = AssetHandler::new(catalog());
        for body in ["", "  "] {
            let response = handler.do_exec(&resources("read"), &request(body)).await.unwrap();
            let records = body_json(&response);
            let assets: Vec<&str> = records
                .as_array()
                .unwrap()
                .iter()
                .map(|r| r["asset"].as_str().unwrap())
                .collect();
            assert_eq!(assets, vec!["pump", "valve"]);
        }

        let absent = RequestEnvelope::new("req-2", "console");
        let response = handler.do_exec(&resources("read"), &absent).await.unwrap();
        assert_eq!(body_json(&response).as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn write_without_body_is_bad_request() {
        let handler = AssetHandler::new(catalog());
        let absent = RequestEnvelope::new("req-3", "console");
        let result = handler.do_exec(&resources("write"), &absent).await;
        assert!(matches!(result, Err(HandlerError::BadRequest(_))));

        let blank = handler.do_exec(&resources("write"), &request("")).await;
        assert!(matches!(blank, Err(HandlerError::BadRequest(_))));
    }

    #[tokio::test]
    async fn underscored_exec_resources_are_rejected() {
        let handler = AssetHandler::new(catalog());
        for resource in ["_read", "_write"] {
            let result = handler.do_exec(&resources(resource), &request("[]")).await;
            assert!(matches!(result, Err(HandlerError::BadRequest(_))));
        }
    }
}
