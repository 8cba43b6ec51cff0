use crate::plugin::types::{InstalledPlugin, PluginRuntime};
use crate::{LixBackend, LixError, Value};

pub(crate) async fn load_installed_plugins(
    backend: &dyn LixBackend,
) -> Result<Vec<InstalledPlugin>, LixError> {
    let result = backend
        .execute(
            "SELECT key, runtime, api_version, match_path_glob, entry, manifest_json, wasm, \
             wasm_hash FROM lix_internal_plugin ORDER BY key",
            &[],
        )
        .await?;

    let mut plugins = Vec::with_capacity(result.rows.len());
    for row in result.rows {
        plugins.push(installed_plugin_from_row(&row)?);
    }
    Ok(plugins)
}

fn installed_plugin_from_row(row: &[Value]) -> Result<InstalledPlugin, LixError> {
    let key = row_text(row, 0, "key")?;
    let runtime_raw = row_text(row, 1, "runtime")?;
    let runtime = PluginRuntime::parse(&runtime_raw)
        .ok_or_else(|| LixError::plugin(format!("unknown plugin runtime '{runtime_raw}'")))?;
    let wasm = match row.get(6) {
        Some(Value::Blob(bytes)) => bytes.clone(),
        other => {
            return Err(LixError::invariant(format!(
                "plugin row wasm column must be a blob, got {other:?}"
            )))
        }
    };

    Ok(InstalledPlugin {
        key,
        runtime,
        api_version: row_text(row, 2, "api_version")?,
        path_glob: row_text(row, 3, "match_path_glob")?,
        entry: row_text(row, 4, "entry")?,
        manifest_json: row_text(row, 5, "manifest_json")?,
        wasm,
        wasm_hash: row_text(row, 7, "wasm_hash")?,
    })
}

fn row_text(row: &[Value], index: usize, column: &str) -> Result<String, LixError> {
    match row.get(index) {
        Some(Value::Text(text)) => Ok(text.clone()),
        other => Err(LixError::invariant(format!(
            "plugin row column '{column}' must be text, got {other:?}"
        ))),
    }
}
