use std::collections::BTreeMap;

use crate::plugin::matching::select_best_glob_match;
use crate::plugin::runtime::{
    call_apply_changes, load_or_init_plugin_component, CachedPluginComponent, PluginEntityChange,
    PluginFile,
};
use crate::plugin::types::InstalledPlugin;
use crate::sql::execution::conn::SqlConn;
use crate::sql::lowering::views::{resolved_state_sql, StateSourceOptions};
use crate::{LixError, Value, WasmRuntime};

const FILE_DESCRIPTOR_SCHEMA_KEY: &str = "lix_file_descriptor";

/// Plugin call context handed into materialization: the sandbox runtime, the
/// installed plugins and the per-engine component cache.
pub(crate) struct PluginHost<'a> {
    pub(crate) runtime: &'a dyn WasmRuntime,
    pub(crate) plugins: &'a [InstalledPlugin],
    pub(crate) components: &'a mut BTreeMap<String, CachedPluginComponent>,
}

impl PluginHost<'_> {
    pub(crate) fn plugin_for_path(&self, path: &str) -> Option<&InstalledPlugin> {
        select_best_glob_match(path, self.plugins, |plugin| plugin.path_glob.as_str())
    }
}

/// Reconstructs `lix_file.data` for one `(file_id, version_id)`: resolve the
/// live projection, call the owning plugin's `apply-changes`, cache the
/// bytes. Returns the bytes, or `None` when the file has no descriptor.
pub(crate) async fn materialize_file_data(
    conn: &mut SqlConn<'_>,
    host: &mut PluginHost<'_>,
    file_id: &str,
    version_id: &str,
) -> Result<Option<Vec<u8>>, LixError> {
    let Some(path) = load_file_path(conn, file_id, version_id).await? else {
        return Ok(None);
    };

    let projection = load_file_projection(conn, file_id, version_id).await?;
    let data = apply_projection(host, file_id, version_id, &path, projection).await?;

    conn.execute(
        "INSERT INTO lix_internal_file_data_cache (file_id, version_id, data) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (file_id, version_id) DO UPDATE SET data = excluded.data",
        &[
            Value::Text(file_id.to_string()),
            Value::Text(version_id.to_string()),
            Value::Blob(data.clone()),
        ],
    )
    .await?;

    Ok(Some(data))
}

/// Materializes cache entries for descriptors that have none yet, so lowered
/// `lix_file` reads see bytes. Runs on whatever connection the caller is on,
/// including an open transaction.
pub(crate) async fn refresh_missing_file_data(
    conn: &mut SqlConn<'_>,
    host: &mut PluginHost<'_>,
) -> Result<(), LixError> {
    let descriptor_source = resolved_state_sql(
        StateSourceOptions {
            include_tombstones: false,
            active_version_only: false,
        },
        Some(FILE_DESCRIPTOR_SCHEMA_KEY),
    );
    let missing = conn
        .execute(
            &format!(
                "SELECT DISTINCT d.entity_id, \
                        COALESCE(d.inherited_from_version_id, d.version_id) AS owner_version \
                 FROM ({descriptor_source}) d \
                 LEFT JOIN lix_internal_file_data_cache c \
                   ON c.file_id = d.entity_id \
                  AND c.version_id = COALESCE(d.inherited_from_version_id, d.version_id) \
                 WHERE c.file_id IS NULL"
            ),
            &[],
        )
        .await?;

    for row in missing.rows {
        let (Some(Value::Text(file_id)), Some(Value::Text(version_id))) =
            (row.first(), row.get(1))
        else {
            continue;
        };
        let file_id = file_id.clone();
        let version_id = version_id.clone();
        materialize_file_data(conn, host, &file_id, &version_id).await?;
    }
    Ok(())
}

/// The resolved bytes of a file without touching the cache table; used for
/// `detect-changes` before-images.
pub(crate) async fn resolve_file_data(
    conn: &mut SqlConn<'_>,
    host: &mut PluginHost<'_>,
    file_id: &str,
    version_id: &str,
    path: &str,
) -> Result<Option<Vec<u8>>, LixError> {
    let cached = conn
        .execute(
            "SELECT data FROM lix_internal_file_data_cache \
             WHERE file_id = $1 AND version_id = $2",
            &[
                Value::Text(file_id.to_string()),
                Value::Text(version_id.to_string()),
            ],
        )
        .await?;
    if let Some(row) = cached.rows.first() {
        if let Some(Value::Blob(bytes)) = row.first() {
            return Ok(Some(bytes.clone()));
        }
    }

    let projection = load_file_projection(conn, file_id, version_id).await?;
    if projection.is_empty() {
        return Ok(None);
    }
    apply_projection(host, file_id, version_id, path, projection)
        .await
        .map(Some)
}

async fn apply_projection(
    host: &mut PluginHost<'_>,
    file_id: &str,
    version_id: &str,
    path: &str,
    projection: Vec<PluginEntityChange>,
) -> Result<Vec<u8>, LixError> {
    let Some(plugin) = host.plugin_for_path(path) else {
        if projection.is_empty() {
            return Ok(Vec::new());
        }
        return Err(LixError::plugin(format!(
            "no plugin matches path '{path}' for file '{file_id}' in version '{version_id}'"
        )));
    };
    let plugin = plugin.clone();

    let instance = load_or_init_plugin_component(host.runtime, host.components, &plugin).await?;
    call_apply_changes(
        instance.as_ref(),
        &plugin.key,
        PluginFile {
            id: file_id.to_string(),
            path: path.to_string(),
            data: Vec::new(),
        },
        projection,
    )
    .await
}

async fn load_file_path(
    conn: &mut SqlConn<'_>,
    file_id: &str,
    version_id: &str,
) -> Result<Option<String>, LixError> {
    let source = resolved_state_sql(
        StateSourceOptions {
            include_tombstones: false,
            active_version_only: false,
        },
        Some(FILE_DESCRIPTOR_SCHEMA_KEY),
    );
    let result = conn
        .execute(
            &format!(
                "SELECT snapshot_content FROM ({source}) descriptor \
                 WHERE entity_id = $1 AND version_id = $2"
            ),
            &[
                Value::Text(file_id.to_string()),
                Value::Text(version_id.to_string()),
            ],
        )
        .await?;

    let Some(row) = result.rows.first() else {
        return Ok(None);
    };
    let Some(snapshot) = row.first().and_then(Value::as_text) else {
        return Ok(None);
    };
    let parsed: serde_json::Value = serde_json::from_str(snapshot).map_err(|error| {
        LixError::invariant(format!(
            "file descriptor snapshot for '{file_id}' is not valid JSON: {error}"
        ))
    })?;
    Ok(parsed
        .get("path")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string))
}

/// The unordered latest-state projection the plugin reconstructs from.
async fn load_file_projection(
    conn: &mut SqlConn<'_>,
    file_id: &str,
    version_id: &str,
) -> Result<Vec<PluginEntityChange>, LixError> {
    let source = resolved_state_sql(
        StateSourceOptions {
            include_tombstones: false,
            active_version_only: false,
        },
        None,
    );
    let result = conn
        .execute(
            &format!(
                "SELECT entity_id, schema_key, schema_version, snapshot_content \
                 FROM ({source}) projection \
                 WHERE file_id = $1 AND version_id = $2 AND schema_key != $3"
            ),
            &[
                Value::Text(file_id.to_string()),
                Value::Text(version_id.to_string()),
                Value::Text(FILE_DESCRIPTOR_SCHEMA_KEY.to_string()),
            ],
        )
        .await?;

    let mut projection = Vec::with_capacity(result.rows.len());
    for row in result.rows {
        let entity_id = row_text(&row, 0, "entity_id")?;
        let schema_key = row_text(&row, 1, "schema_key")?;
        let schema_version = row_text(&row, 2, "schema_version")?;
        let snapshot_content = row.get(3).and_then(Value::as_text).map(str::to_string);
        projection.push(PluginEntityChange {
            entity_id,
            schema_key,
            schema_version,
            snapshot_content,
        });
    }
    Ok(projection)
}

fn row_text(row: &[Value], index: usize, column: &str) -> Result<String, LixError> {
    match row.get(index) {
        Some(Value::Text(text)) => Ok(text.clone()),
        other => Err(LixError::invariant(format!(
            "file projection column '{column}' must be text, got {other:?}"
        ))),
    }
}
