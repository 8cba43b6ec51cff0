use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::plugin::types::InstalledPlugin;
use crate::{LixError, WasmComponentInstance, WasmLimits, WasmRuntime};

const DETECT_CHANGES_EXPORTS: &[&str] = &["detect-changes", "api#detect-changes"];
const APPLY_CHANGES_EXPORTS: &[&str] = &["apply-changes", "api#apply-changes"];

/// JSON wire file payload passed by value into the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PluginFile {
    pub(crate) id: String,
    pub(crate) path: String,
    pub(crate) data: Vec<u8>,
}

/// JSON wire entity change, both direction: plugin output of
/// `detect-changes` and input of `apply-changes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PluginEntityChange {
    pub(crate) entity_id: String,
    pub(crate) schema_key: String,
    pub(crate) schema_version: String,
    pub(crate) snapshot_content: Option<String>,
}

#[derive(Debug, Serialize)]
struct DetectChangesRequest {
    before: Option<PluginFile>,
    after: PluginFile,
}

#[derive(Debug, Serialize)]
struct ApplyChangesRequest {
    file: PluginFile,
    changes: Vec<PluginEntityChange>,
}

/// Components are cached per `(key, wasm_hash)` and reused across calls; the
/// sandbox scopes per-call state.
pub(crate) struct CachedPluginComponent {
    pub(crate) wasm_hash: String,
    pub(crate) instance: Arc<dyn WasmComponentInstance>,
}

pub(crate) async fn load_or_init_plugin_component(
    runtime: &dyn WasmRuntime,
    cache: &mut BTreeMap<String, CachedPluginComponent>,
    plugin: &InstalledPlugin,
) -> Result<Arc<dyn WasmComponentInstance>, LixError> {
    if let Some(cached) = cache.get(&plugin.key) {
        if cached.wasm_hash == plugin.wasm_hash {
            return Ok(Arc::clone(&cached.instance));
        }
    }

    let instance = runtime
        .init_component(plugin.wasm.clone(), WasmLimits::default())
        .await?;
    cache.insert(
        plugin.key.clone(),
        CachedPluginComponent {
            wasm_hash: plugin.wasm_hash.clone(),
            instance: Arc::clone(&instance),
        },
    );
    Ok(instance)
}

pub(crate) async fn call_detect_changes(
    instance: &dyn WasmComponentInstance,
    plugin_key: &str,
    before: Option<PluginFile>,
    after: PluginFile,
) -> Result<Vec<PluginEntityChange>, LixError> {
    let payload = serde_json::to_vec(&DetectChangesRequest { before, after }).map_err(|error| {
        LixError::plugin(format!(
            "plugin detect-changes: failed to encode request payload: {error}"
        ))
    })?;
    let output = call_with_export_fallback(instance, DETECT_CHANGES_EXPORTS, &payload).await?;
    serde_json::from_slice(&output).map_err(|error| {
        LixError::plugin(format!(
            "plugin detect-changes: failed to decode output of plugin '{plugin_key}': {error}"
        ))
    })
}

pub(crate) async fn call_apply_changes(
    instance: &dyn WasmComponentInstance,
    plugin_key: &str,
    file: PluginFile,
    changes: Vec<PluginEntityChange>,
) -> Result<Vec<u8>, LixError> {
    let payload = serde_json::to_vec(&ApplyChangesRequest { file, changes }).map_err(|error| {
        LixError::plugin(format!(
            "plugin apply-changes: failed to encode request payload: {error}"
        ))
    })?;
    call_with_export_fallback(instance, APPLY_CHANGES_EXPORTS, &payload)
        .await
        .map_err(|error| {
            LixError::plugin(format!(
                "plugin apply-changes: plugin '{plugin_key}' failed: {}",
                error.message
            ))
        })
}

async fn call_with_export_fallback(
    instance: &dyn WasmComponentInstance,
    exports: &[&str],
    payload: &[u8],
) -> Result<Vec<u8>, LixError> {
    let mut errors = Vec::new();
    for export in exports {
        match instance.call(export, payload).await {
            Ok(output) => return Ok(output),
            Err(error) => errors.push(format!("{export}: {}", error.message)),
        }
    }

    Err(LixError::plugin(format!(
        "failed to call plugin export ({})",
        errors.join("; ")
    )))
}
