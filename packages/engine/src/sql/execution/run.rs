use std::collections::BTreeSet;

use serde_json::{json, Map as JsonMap, Value as JsonValue};

use crate::commit::{generate_commit, GenerateCommitArgs};
use crate::filesystem::materialize::{resolve_file_data, PluginHost};
use crate::filesystem::path::{file_name_and_extension, normalize_file_path};
use crate::plugin::runtime::{call_detect_changes, load_or_init_plugin_component, PluginFile};
use crate::schema_catalog::SchemaMetadata;
use crate::sql::execution::conn::SqlConn;
use crate::sql::lowering::views::{resolved_state_sql, StateSourceOptions};
use crate::sql::plan::{
    EntityDeletePlan, EntityUpdatePlan, ExecutionPlan, FileDeletePlan, FileInsertRow,
    FileUpdatePlan, MutationOperation, MutationRow, PlannedStatement, ScopeQuery, WritePlan,
};
use crate::state_commit_stream::{stream_changes_from_mutations, StateCommitStreamChange};
use crate::version::create_version_in_conn;
use crate::{LixError, QueryResult, Value};

use super::postprocess::{apply_commit, load_version_contexts};

const META_FILE_ID: &str = "lix";
const LIX_PLUGIN_KEY: &str = "lix";
const FILE_DESCRIPTOR_SCHEMA_KEY: &str = "lix_file_descriptor";
const STORED_SCHEMA_KEY: &str = "lix_stored_schema";

/// What one executed script hands back to the engine: the last query result
/// plus everything that must happen at or after the commit boundary.
#[derive(Default)]
pub(crate) struct ScriptOutcome {
    pub(crate) result: QueryResult,
    pub(crate) stream_changes: Vec<StateCommitStreamChange>,
    pub(crate) file_refresh_targets: BTreeSet<(String, String)>,
    pub(crate) next_active_version_id: Option<String>,
    pub(crate) schemas_registered: bool,
}

/// Runs a planned script on `conn` in the fixed order: lowered statements,
/// then postprocess (commit formation + materialized state), then tx-scoped
/// effects. Post-commit effects are described in the outcome, not run here.
pub(crate) async fn run_plan(
    conn: &mut SqlConn<'_>,
    host: &mut PluginHost<'_>,
    plan: &ExecutionPlan,
    writer_key: Option<&str>,
    now: &str,
    generate_uuid: &mut dyn FnMut() -> String,
) -> Result<ScriptOutcome, LixError> {
    let mut outcome = ScriptOutcome::default();
    let mut mutations: Vec<MutationRow> = Vec::new();

    for statement in &plan.statements {
        match statement {
            PlannedStatement::Query { sql, params } => {
                outcome.result = conn.execute(sql, params).await?;
            }
            PlannedStatement::Write(write) => {
                execute_write(
                    conn,
                    host,
                    write,
                    &mut mutations,
                    &mut outcome,
                    now,
                    generate_uuid,
                )
                .await?;
                outcome.result = QueryResult::empty();
            }
        }
    }

    if !mutations.is_empty() {
        let affected_versions: BTreeSet<String> = mutations
            .iter()
            .map(|mutation| mutation.version_id.clone())
            .collect();
        let versions = load_version_contexts(conn, &affected_versions).await?;
        let commit = generate_commit(
            GenerateCommitArgs {
                timestamp: now.to_string(),
                writer_key: writer_key.map(str::to_string),
                author_ref: None,
                mutations: mutations.clone(),
                versions,
            },
            &mut *generate_uuid,
        )?;
        apply_commit(conn, &commit).await?;

        outcome.stream_changes = stream_changes_from_mutations(&mutations, writer_key);
        for mutation in &mutations {
            if mutation.schema_key == FILE_DESCRIPTOR_SCHEMA_KEY {
                outcome
                    .file_refresh_targets
                    .insert((mutation.entity_id.clone(), mutation.version_id.clone()));
            } else if mutation.file_id != META_FILE_ID {
                outcome
                    .file_refresh_targets
                    .insert((mutation.file_id.clone(), mutation.version_id.clone()));
            }
        }
    }

    Ok(outcome)
}

async fn execute_write(
    conn: &mut SqlConn<'_>,
    host: &mut PluginHost<'_>,
    write: &WritePlan,
    mutations: &mut Vec<MutationRow>,
    outcome: &mut ScriptOutcome,
    now: &str,
    generate_uuid: &mut dyn FnMut() -> String,
) -> Result<(), LixError> {
    match write {
        WritePlan::EntityInsert { rows } => {
            for row in rows {
                if row.schema_key == STORED_SCHEMA_KEY {
                    register_stored_schema(conn, &row.snapshot_content, now).await?;
                    outcome.schemas_registered = true;
                }
                mutations.push(MutationRow {
                    operation: MutationOperation::Insert,
                    entity_id: row.entity_id.clone(),
                    schema_key: row.schema_key.clone(),
                    schema_version: row.schema_version.clone(),
                    file_id: row.file_id.clone(),
                    version_id: row.version_id.clone(),
                    plugin_key: row.plugin_key.clone(),
                    snapshot_content: Some(row.snapshot_content.clone()),
                    metadata: row.metadata.clone(),
                });
            }
        }
        WritePlan::EntityUpdate(update) => {
            execute_entity_update(conn, update, mutations).await?;
        }
        WritePlan::EntityDelete(delete) => {
            execute_entity_delete(conn, delete, mutations).await?;
        }
        WritePlan::FileInsert { rows } => {
            for row in rows {
                execute_file_insert(host, row, mutations, generate_uuid).await?;
            }
        }
        WritePlan::FileUpdate(update) => {
            execute_file_update(conn, host, update, mutations).await?;
        }
        WritePlan::FileDelete(delete) => {
            execute_file_delete(conn, delete, mutations).await?;
        }
        WritePlan::CreateVersion(create) => {
            create_version_in_conn(conn, create, now, generate_uuid).await?;
        }
        WritePlan::SwitchActiveVersion { version_id } => {
            switch_active_version(conn, version_id).await?;
            outcome.next_active_version_id = Some(version_id.clone());
        }
    }
    Ok(())
}

struct EntityScopeRow {
    entity_id: String,
    schema_key: String,
    schema_version: String,
    file_id: String,
    version_id: String,
    plugin_key: String,
    snapshot_content: Option<JsonValue>,
    metadata: Option<JsonValue>,
}

async fn load_entity_scope(
    conn: &mut SqlConn<'_>,
    scope: &ScopeQuery,
) -> Result<Vec<EntityScopeRow>, LixError> {
    let result = conn.execute(&scope.sql, &scope.params).await?;
    let mut rows = Vec::with_capacity(result.rows.len());
    for row in result.rows {
        rows.push(EntityScopeRow {
            entity_id: row_text(&row, 0, "entity_id")?,
            schema_key: row_text(&row, 1, "schema_key")?,
            schema_version: row_text(&row, 2, "schema_version")?,
            file_id: row_text(&row, 3, "file_id")?,
            version_id: row_text(&row, 4, "version_id")?,
            plugin_key: row_text(&row, 5, "plugin_key")?,
            snapshot_content: row_json(&row, 6)?,
            metadata: row_json(&row, 7)?,
        });
    }
    Ok(rows)
}

async fn execute_entity_update(
    conn: &mut SqlConn<'_>,
    update: &EntityUpdatePlan,
    mutations: &mut Vec<MutationRow>,
) -> Result<(), LixError> {
    for row in load_entity_scope(conn, &update.scope).await? {
        let next_snapshot = match &update.assignments.snapshot_content {
            Some(replacement) => replacement.clone(),
            None => {
                let mut snapshot = match &row.snapshot_content {
                    Some(JsonValue::Object(object)) => object.clone(),
                    Some(other) => {
                        return Err(LixError::invariant(format!(
                            "snapshot of entity '{}' is not a JSON object: {other}",
                            row.entity_id
                        )))
                    }
                    None => JsonMap::new(),
                };
                for (property, value) in &update.assignments.properties {
                    snapshot.insert(property.clone(), value.clone());
                }
                JsonValue::Object(snapshot)
            }
        };
        let metadata = match &update.assignments.metadata {
            Some(assigned) => assigned.clone(),
            None => row.metadata.clone(),
        };

        mutations.push(MutationRow {
            operation: MutationOperation::Update,
            entity_id: row.entity_id,
            schema_key: row.schema_key,
            schema_version: row.schema_version,
            file_id: row.file_id,
            version_id: row.version_id,
            plugin_key: row.plugin_key,
            snapshot_content: Some(next_snapshot),
            metadata,
        });
    }
    Ok(())
}

async fn execute_entity_delete(
    conn: &mut SqlConn<'_>,
    delete: &EntityDeletePlan,
    mutations: &mut Vec<MutationRow>,
) -> Result<(), LixError> {
    for row in load_entity_scope(conn, &delete.scope).await? {
        mutations.push(MutationRow {
            operation: MutationOperation::Delete,
            entity_id: row.entity_id,
            schema_key: row.schema_key,
            schema_version: row.schema_version,
            file_id: row.file_id,
            version_id: row.version_id,
            plugin_key: row.plugin_key,
            snapshot_content: None,
            metadata: None,
        });
    }
    Ok(())
}

fn descriptor_snapshot(
    id: &str,
    path: &str,
    directory_id: Option<&str>,
    hidden: bool,
    metadata: Option<&JsonValue>,
) -> JsonValue {
    let (name, extension) = file_name_and_extension(path);
    let mut snapshot = json!({
        "id": id,
        "path": path,
        "directory_id": directory_id,
        "name": name,
        "extension": extension,
        "hidden": hidden,
    });
    if let (Some(object), Some(metadata)) = (snapshot.as_object_mut(), metadata) {
        object.insert("metadata".to_string(), metadata.clone());
    }
    snapshot
}

fn descriptor_mutation(
    operation: MutationOperation,
    file_id: &str,
    version_id: &str,
    snapshot: Option<JsonValue>,
) -> MutationRow {
    MutationRow {
        operation,
        entity_id: file_id.to_string(),
        schema_key: FILE_DESCRIPTOR_SCHEMA_KEY.to_string(),
        schema_version: "1".to_string(),
        file_id: META_FILE_ID.to_string(),
        version_id: version_id.to_string(),
        plugin_key: LIX_PLUGIN_KEY.to_string(),
        snapshot_content: snapshot,
        metadata: None,
    }
}

async fn execute_file_insert(
    host: &mut PluginHost<'_>,
    row: &FileInsertRow,
    mutations: &mut Vec<MutationRow>,
    generate_uuid: &mut dyn FnMut() -> String,
) -> Result<(), LixError> {
    let path = normalize_file_path(&row.path)?;
    let file_id = row.id.clone().unwrap_or_else(|| generate_uuid());

    mutations.push(descriptor_mutation(
        MutationOperation::Insert,
        &file_id,
        &row.version_id,
        Some(descriptor_snapshot(
            &file_id,
            &path,
            row.directory_id.as_deref(),
            row.hidden,
            row.metadata.as_ref(),
        )),
    ));

    detect_file_mutations(
        host,
        &file_id,
        &row.version_id,
        &path,
        None,
        &row.data,
        MutationOperation::Insert,
        mutations,
    )
    .await
}

async fn execute_file_update(
    conn: &mut SqlConn<'_>,
    host: &mut PluginHost<'_>,
    update: &FileUpdatePlan,
    mutations: &mut Vec<MutationRow>,
) -> Result<(), LixError> {
    let scope_rows = conn.execute(&update.scope.sql, &update.scope.params).await?;
    for row in scope_rows.rows {
        let file_id = row_text(&row, 0, "id")?;
        let before_path = row_text(&row, 1, "path")?;
        let directory_id = row.get(2).and_then(Value::as_text).map(str::to_string);
        let before_data = match row.get(3) {
            Some(Value::Blob(bytes)) => Some(bytes.clone()),
            _ => None,
        };
        let before_hidden = matches!(row.get(4), Some(Value::Integer(flag)) if *flag != 0);
        let before_metadata = row_json(&row, 5)?;
        let version_id = row_text(&row, 6, "version_id")?;

        let after_path = match &update.path {
            Some(path) => normalize_file_path(path)?,
            None => before_path.clone(),
        };
        let after_hidden = update.hidden.unwrap_or(before_hidden);
        let after_metadata = match &update.metadata {
            Some(assigned) => assigned.clone(),
            None => before_metadata.clone(),
        };

        let before_data = match before_data {
            Some(bytes) => Some(bytes),
            None => {
                resolve_file_data(conn, host, &file_id, &version_id, &before_path).await?
            }
        };
        let after_data = match &update.data {
            Some(bytes) => bytes.clone(),
            None => before_data.clone().unwrap_or_default(),
        };

        let descriptor_changed = after_path != before_path
            || after_hidden != before_hidden
            || after_metadata != before_metadata;
        if descriptor_changed {
            mutations.push(descriptor_mutation(
                MutationOperation::Update,
                &file_id,
                &version_id,
                Some(descriptor_snapshot(
                    &file_id,
                    &after_path,
                    directory_id.as_deref(),
                    after_hidden,
                    after_metadata.as_ref(),
                )),
            ));
        }

        if update.data.is_some() || after_path != before_path {
            detect_file_mutations(
                host,
                &file_id,
                &version_id,
                &after_path,
                before_data,
                &after_data,
                MutationOperation::Update,
                mutations,
            )
            .await?;
        }
    }
    Ok(())
}

async fn execute_file_delete(
    conn: &mut SqlConn<'_>,
    delete: &FileDeletePlan,
    mutations: &mut Vec<MutationRow>,
) -> Result<(), LixError> {
    let scope_rows = conn.execute(&delete.scope.sql, &delete.scope.params).await?;
    for row in scope_rows.rows {
        let file_id = row_text(&row, 0, "id")?;
        let version_id = row_text(&row, 6, "version_id")?;

        mutations.push(descriptor_mutation(
            MutationOperation::Delete,
            &file_id,
            &version_id,
            None,
        ));

        // Every entity of the file is tombstoned, regardless of plugin.
        let source = resolved_state_sql(
            StateSourceOptions {
                include_tombstones: false,
                active_version_only: false,
            },
            None,
        );
        let entities = conn
            .execute(
                &format!(
                    "SELECT entity_id, schema_key, schema_version, plugin_key \
                     FROM ({source}) projection \
                     WHERE file_id = $1 AND version_id = $2"
                ),
                &[
                    Value::Text(file_id.clone()),
                    Value::Text(version_id.clone()),
                ],
            )
            .await?;
        for entity in entities.rows {
            mutations.push(MutationRow {
                operation: MutationOperation::Delete,
                entity_id: row_text(&entity, 0, "entity_id")?,
                schema_key: row_text(&entity, 1, "schema_key")?,
                schema_version: row_text(&entity, 2, "schema_version")?,
                file_id: file_id.clone(),
                version_id: version_id.clone(),
                plugin_key: row_text(&entity, 3, "plugin_key")?,
                snapshot_content: None,
                metadata: None,
            });
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn detect_file_mutations(
    host: &mut PluginHost<'_>,
    file_id: &str,
    version_id: &str,
    path: &str,
    before_data: Option<Vec<u8>>,
    after_data: &[u8],
    operation: MutationOperation,
    mutations: &mut Vec<MutationRow>,
) -> Result<(), LixError> {
    let Some(plugin) = host.plugin_for_path(path) else {
        if after_data.is_empty() {
            return Ok(());
        }
        return Err(LixError::plugin(format!(
            "no plugin matches path '{path}'; install a plugin whose match.path_glob covers it"
        )));
    };
    let plugin = plugin.clone();

    let instance = load_or_init_plugin_component(host.runtime, host.components, &plugin).await?;
    let before = before_data.map(|data| PluginFile {
        id: file_id.to_string(),
        path: path.to_string(),
        data,
    });
    let after = PluginFile {
        id: file_id.to_string(),
        path: path.to_string(),
        data: after_data.to_vec(),
    };
    let detected = call_detect_changes(instance.as_ref(), &plugin.key, before, after).await?;

    let mut seen = BTreeSet::new();
    for change in detected {
        if !seen.insert((change.schema_key.clone(), change.entity_id.clone())) {
            return Err(LixError::plugin(format!(
                "plugin '{}' emitted duplicate change for schema_key='{}' entity_id='{}'",
                plugin.key, change.schema_key, change.entity_id
            )));
        }
        let snapshot_content = match change.snapshot_content {
            Some(text) => Some(serde_json::from_str(&text).map_err(|error| {
                LixError::plugin(format!(
                    "plugin '{}' returned invalid snapshot JSON for entity '{}': {error}",
                    plugin.key, change.entity_id
                ))
            })?),
            None => None,
        };
        let operation = if snapshot_content.is_none() {
            MutationOperation::Delete
        } else {
            operation
        };
        mutations.push(MutationRow {
            operation,
            entity_id: change.entity_id,
            schema_key: change.schema_key,
            schema_version: change.schema_version,
            file_id: file_id.to_string(),
            version_id: version_id.to_string(),
            plugin_key: plugin.key.clone(),
            snapshot_content,
            metadata: None,
        });
    }
    Ok(())
}

async fn register_stored_schema(
    conn: &mut SqlConn<'_>,
    snapshot: &JsonValue,
    now: &str,
) -> Result<(), LixError> {
    let definition = snapshot
        .get("value")
        .ok_or_else(|| LixError::planner("lix_stored_schema rows must carry a value document"))?;
    let metadata = SchemaMetadata::from_definition(definition)?;
    conn.execute(
        "INSERT INTO lix_internal_stored_schema (schema_key, schema_version, definition, created_at) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (schema_key, schema_version) DO UPDATE SET definition = excluded.definition",
        &[
            Value::Text(metadata.schema_key),
            Value::Text(metadata.schema_version),
            Value::Text(definition.to_string()),
            Value::Text(now.to_string()),
        ],
    )
    .await?;
    Ok(())
}

async fn switch_active_version(conn: &mut SqlConn<'_>, version_id: &str) -> Result<(), LixError> {
    let exists = conn
        .execute(
            "SELECT 1 FROM lix_internal_version WHERE id = $1",
            &[Value::Text(version_id.to_string())],
        )
        .await?;
    if exists.rows.is_empty() {
        return Err(LixError::planner(format!(
            "unknown version '{version_id}'"
        )));
    }
    conn.execute(
        "UPDATE lix_internal_active_version SET version_id = $1 WHERE id = 1",
        &[Value::Text(version_id.to_string())],
    )
    .await?;
    Ok(())
}

fn row_text(row: &[Value], index: usize, column: &str) -> Result<String, LixError> {
    match row.get(index) {
        Some(Value::Text(text)) => Ok(text.clone()),
        other => Err(LixError::invariant(format!(
            "scope row column '{column}' must be text, got {other:?}"
        ))),
    }
}

fn row_json(row: &[Value], index: usize) -> Result<Option<JsonValue>, LixError> {
    match row.get(index) {
        None | Some(Value::Null) => Ok(None),
        // json_extract of a string property yields bare text; keep it as a
        // JSON string instead of failing.
        Some(Value::Text(text)) => Ok(Some(
            serde_json::from_str(text).unwrap_or(JsonValue::String(text.clone())),
        )),
        Some(Value::Integer(number)) => Ok(Some(JsonValue::from(*number))),
        Some(Value::Real(number)) => Ok(Some(JsonValue::from(*number))),
        Some(other) => Err(LixError::invariant(format!(
            "scope row column {index} must be JSON text, got {other:?}"
        ))),
    }
}
