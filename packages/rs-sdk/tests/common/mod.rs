#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use lix_engine::{WasmComponentInstance, WasmLimits, WasmRuntime};
use lix_rs_sdk::{
    open_lix, Lix, LixError, OpenLixConfig, PluginInstallInput, SnapshotSink, SnapshotSource,
    Value,
};
use serde_json::{json, Value as JsonValue};

pub const MOCK_JSON_PLUGIN_KEY: &str = "mock_json";

pub fn mock_json_manifest() -> String {
    json!({
        "key": MOCK_JSON_PLUGIN_KEY,
        "runtime": "wasm-component-v1",
        "api_version": "0.1.0",
        "match": { "path_glob": "*.json" }
    })
    .to_string()
}

/// In-process stand-in for a wasm component that speaks the engine's JSON
/// wire format: it diffs top-level JSON properties into `/property` entities
/// and reconstructs files from the unordered projection.
pub struct MockJsonPluginRuntime;

#[async_trait(?Send)]
impl WasmRuntime for MockJsonPluginRuntime {
    async fn init_component(
        &self,
        _bytes: Vec<u8>,
        _limits: WasmLimits,
    ) -> Result<Arc<dyn WasmComponentInstance>, LixError> {
        Ok(Arc::new(MockJsonPluginInstance))
    }
}

struct MockJsonPluginInstance;

#[async_trait(?Send)]
impl WasmComponentInstance for MockJsonPluginInstance {
    async fn call(&self, export: &str, input: &[u8]) -> Result<Vec<u8>, LixError> {
        match export {
            "detect-changes" => detect_changes(input),
            "apply-changes" => apply_changes(input),
            other => Err(LixError::plugin(format!("unknown export '{other}'"))),
        }
    }
}

fn detect_changes(input: &[u8]) -> Result<Vec<u8>, LixError> {
    let request: JsonValue = serde_json::from_slice(input)
        .map_err(|error| LixError::plugin(format!("invalid detect request: {error}")))?;
    let before = parse_file_object(request.get("before"))?;
    let after = parse_file_object(Some(
        request
            .get("after")
            .ok_or_else(|| LixError::plugin("detect request is missing after"))?,
    ))?
    .unwrap_or_default();
    let before = before.unwrap_or_default();

    let mut changes = Vec::new();
    for (key, value) in &after {
        if before.get(key) != Some(value) {
            changes.push(json!({
                "entity_id": format!("/{key}"),
                "schema_key": "json_property",
                "schema_version": "1",
                "snapshot_content": json!({ "value": value }).to_string(),
            }));
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            changes.push(json!({
                "entity_id": format!("/{key}"),
                "schema_key": "json_property",
                "schema_version": "1",
                "snapshot_content": JsonValue::Null,
            }));
        }
    }

    serde_json::to_vec(&changes)
        .map_err(|error| LixError::plugin(format!("encode detect output: {error}")))
}

fn apply_changes(input: &[u8]) -> Result<Vec<u8>, LixError> {
    let request: JsonValue = serde_json::from_slice(input)
        .map_err(|error| LixError::plugin(format!("invalid apply request: {error}")))?;
    let changes = request
        .get("changes")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| LixError::plugin("apply request is missing changes"))?;

    let mut document = BTreeMap::new();
    for change in changes {
        let Some(entity_id) = change.get("entity_id").and_then(JsonValue::as_str) else {
            continue;
        };
        let Some(snapshot) = change.get("snapshot_content").and_then(JsonValue::as_str) else {
            continue;
        };
        let parsed: JsonValue = serde_json::from_str(snapshot)
            .map_err(|error| LixError::plugin(format!("invalid snapshot JSON: {error}")))?;
        let value = parsed.get("value").cloned().unwrap_or(JsonValue::Null);
        document.insert(entity_id.trim_start_matches('/').to_string(), value);
    }

    serde_json::to_vec(&document)
        .map_err(|error| LixError::plugin(format!("encode apply output: {error}")))
}

fn parse_file_object(
    file: Option<&JsonValue>,
) -> Result<Option<BTreeMap<String, JsonValue>>, LixError> {
    let Some(file) = file else {
        return Ok(None);
    };
    if file.is_null() {
        return Ok(None);
    }
    let data = file
        .get("data")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| LixError::plugin("file payload is missing data bytes"))?;
    let bytes: Vec<u8> = data
        .iter()
        .filter_map(JsonValue::as_u64)
        .map(|byte| byte as u8)
        .collect();
    if bytes.is_empty() {
        return Ok(Some(BTreeMap::new()));
    }
    let parsed: BTreeMap<String, JsonValue> = serde_json::from_slice(&bytes)
        .map_err(|error| LixError::plugin(format!("file bytes are not JSON: {error}")))?;
    Ok(Some(parsed))
}

pub async fn open_test_lix() -> Lix {
    open_lix(OpenLixConfig {
        backend: None,
        key_values: Vec::new(),
        wasm_runtime: Some(Arc::new(MockJsonPluginRuntime)),
    })
    .await
    .expect("lix should open")
}

pub async fn install_mock_json_plugin(lix: &Lix) {
    lix.install_plugin(PluginInstallInput::Parts {
        manifest_json: mock_json_manifest(),
        wasm_bytes: b"mock-json-plugin".to_vec(),
    })
    .await
    .expect("plugin should install");
}

pub fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

pub fn blob(bytes: &[u8]) -> Value {
    Value::Blob(bytes.to_vec())
}

pub fn row_text(result: &lix_rs_sdk::QueryResult, row: usize, column: usize) -> String {
    match &result.rows[row][column] {
        Value::Text(value) => value.clone(),
        other => panic!("expected text cell, got {other:?}"),
    }
}

pub fn row_integer(result: &lix_rs_sdk::QueryResult, row: usize, column: usize) -> i64 {
    match &result.rows[row][column] {
        Value::Integer(value) => *value,
        other => panic!("expected integer cell, got {other:?}"),
    }
}

#[derive(Default)]
pub struct VecSnapshotSink {
    pub bytes: Vec<u8>,
}

#[async_trait(?Send)]
impl SnapshotSink for VecSnapshotSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), LixError> {
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }
}

pub struct VecSnapshotSource {
    pub bytes: Option<Vec<u8>>,
}

#[async_trait(?Send)]
impl SnapshotSource for VecSnapshotSource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, LixError> {
        Ok(self.bytes.take())
    }
}
