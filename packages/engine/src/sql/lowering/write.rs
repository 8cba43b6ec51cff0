use std::collections::HashMap;

use serde_json::{Map as JsonMap, Value as JsonValue};
use sqlparser::ast::{
    Assignment, AssignmentTarget, Delete, Expr, FromTable, Insert, ObjectName, SetExpr, Statement,
    TableFactor, TableObject, TableWithJoins, UnaryOperator, Update, Value as SqlValue,
};

use crate::schema_catalog::SchemaMetadata;
use crate::schema_definition::validate_lix_schema;
use crate::sql::params::bind_statement;
use crate::sql::parse::{object_name_terminal, parse_sql_statements};
use crate::sql::plan::{
    CreateVersionPlan, EntityDeletePlan, EntityInsertRow, EntityUpdatePlan, FileDeletePlan,
    FileInsertRow, FileUpdatePlan, ScopeQuery, SnapshotAssignments, WritePlan,
};
use crate::sql::planner::PlannerContext;
use crate::sql::surface::{classify_relation, Surface, ViewScope};
use crate::{LixError, Value};

use super::read::lower_read_statement;
use super::views::{
    entity_view_sql, file_view_sql, resolved_state_sql, StateSourceOptions,
};

const META_FILE_ID: &str = "lix";
const LIX_PLUGIN_KEY: &str = "lix";

/// Columns every entity scope query projects, in order.
pub(crate) const ENTITY_SCOPE_COLUMNS: &[&str] = &[
    "entity_id",
    "schema_key",
    "schema_version",
    "file_id",
    "version_id",
    "plugin_key",
    "snapshot_content",
    "metadata",
];

/// Columns every file scope query projects, in order.
pub(crate) const FILE_SCOPE_COLUMNS: &[&str] = &[
    "id",
    "path",
    "directory_id",
    "data",
    "hidden",
    "metadata",
    "version_id",
];

/// Lowers a mutation statement against a logical surface into a write plan.
/// Returns `None` when the statement does not target a logical surface.
pub(crate) fn lower_write_statement(
    statement: &Statement,
    params: &[Value],
    ctx: &PlannerContext,
) -> Result<Option<WritePlan>, LixError> {
    match statement {
        Statement::Insert(insert) => lower_insert(insert, params, ctx),
        Statement::Update(update) => lower_update(update, params, ctx),
        Statement::Delete(delete) => lower_delete(delete, params, ctx),
        _ => Ok(None),
    }
}

fn lower_insert(
    insert: &Insert,
    params: &[Value],
    ctx: &PlannerContext,
) -> Result<Option<WritePlan>, LixError> {
    let TableObject::TableName(name) = &insert.table else {
        return Ok(None);
    };
    let Some(surface) = classify_target(name, ctx)? else {
        return Ok(None);
    };

    if insert.on.is_some() {
        return Err(LixError::planner(
            "ON CONFLICT clauses are not supported on logical views; inserts already upsert",
        ));
    }

    let columns: Vec<String> = insert
        .columns
        .iter()
        .map(|column| column.value.to_ascii_lowercase())
        .collect();
    let rows = insert_value_rows(insert, params, &columns)?;

    match surface {
        Surface::State => {
            entity_insert_from_state_rows(&columns, &rows, ctx, None).map(Some)
        }
        Surface::StateByVersion => {
            entity_insert_from_state_rows(&columns, &rows, ctx, Some("version_id")).map(Some)
        }
        Surface::EntityView { schema_key, scope } => match scope {
            ViewScope::History => Err(read_only_error(&schema_key, "history views")),
            ViewScope::Active | ViewScope::ByVersion => {
                entity_insert_from_view_rows(&schema_key, scope, &columns, &rows, ctx).map(Some)
            }
        },
        Surface::File { scope } => match scope {
            ViewScope::History => Err(read_only_error("lix_file_history", "history views")),
            ViewScope::Active | ViewScope::ByVersion => {
                file_insert_from_rows(scope, &columns, &rows, ctx).map(Some)
            }
        },
        Surface::Version => create_version_from_rows(&columns, &rows).map(Some),
        Surface::ActiveVersion => Err(LixError::planner(
            "lix_active_version is a singleton; use UPDATE to switch versions",
        )),
        Surface::StateHistory => Err(read_only_error("lix_state_history", "history views")),
        Surface::StateWithTombstones => {
            Err(read_only_error("lix_state_with_tombstones", "tombstone views"))
        }
        Surface::Commit | Surface::Change => {
            Err(read_only_error("lix_commit / lix_change", "change-store views"))
        }
    }
}

fn lower_update(
    update: &Update,
    params: &[Value],
    ctx: &PlannerContext,
) -> Result<Option<WritePlan>, LixError> {
    let Some(name) = update_target_name(&update.table) else {
        return Ok(None);
    };
    let Some(surface) = classify_target(&name, ctx)? else {
        return Ok(None);
    };
    if !update.table.joins.is_empty() {
        return Err(LixError::planner(
            "UPDATE with JOIN is not supported on logical views",
        ));
    }

    match surface {
        Surface::State | Surface::StateByVersion => {
            let assignments = state_assignments(&update.assignments, params)?;
            let scope = entity_scope_query(
                state_scope_source(&surface),
                "lix_state",
                update.selection.as_ref(),
                params,
                ctx,
            )?;
            Ok(Some(WritePlan::EntityUpdate(EntityUpdatePlan {
                scope,
                assignments,
            })))
        }
        Surface::EntityView { schema_key, scope } => match scope {
            ViewScope::History => Err(read_only_error(&schema_key, "history views")),
            ViewScope::Active | ViewScope::ByVersion => {
                let metadata = schema_metadata(ctx, &schema_key)?;
                let assignments =
                    entity_view_assignments(&update.assignments, params, &metadata, ctx)?;
                let scope_query = entity_view_scope_query(
                    &metadata,
                    scope,
                    &schema_key,
                    update.selection.as_ref(),
                    params,
                    ctx,
                )?;
                Ok(Some(WritePlan::EntityUpdate(EntityUpdatePlan {
                    scope: scope_query,
                    assignments,
                })))
            }
        },
        Surface::File { scope } => match scope {
            ViewScope::History => Err(read_only_error("lix_file_history", "history views")),
            ViewScope::Active | ViewScope::ByVersion => {
                let plan =
                    file_update_plan(&update.assignments, update.selection.as_ref(), params, scope, ctx)?;
                Ok(Some(WritePlan::FileUpdate(plan)))
            }
        },
        Surface::ActiveVersion => {
            let version_id = active_version_assignment(&update.assignments, params)?;
            Ok(Some(WritePlan::SwitchActiveVersion { version_id }))
        }
        Surface::Version => Err(LixError::planner(
            "UPDATE lix_version is not supported; use create_version / switch_version",
        )),
        Surface::StateHistory => Err(read_only_error("lix_state_history", "history views")),
        Surface::StateWithTombstones => {
            Err(read_only_error("lix_state_with_tombstones", "tombstone views"))
        }
        Surface::Commit | Surface::Change => {
            Err(read_only_error("lix_commit / lix_change", "change-store views"))
        }
    }
}

fn lower_delete(
    delete: &Delete,
    params: &[Value],
    ctx: &PlannerContext,
) -> Result<Option<WritePlan>, LixError> {
    let Some(name) = delete_target_name(delete) else {
        return Ok(None);
    };
    let Some(surface) = classify_target(&name, ctx)? else {
        return Ok(None);
    };

    match surface {
        Surface::State | Surface::StateByVersion => {
            let scope = entity_scope_query(
                state_scope_source(&surface),
                "lix_state",
                delete.selection.as_ref(),
                params,
                ctx,
            )?;
            Ok(Some(WritePlan::EntityDelete(EntityDeletePlan { scope })))
        }
        Surface::EntityView { schema_key, scope } => match scope {
            ViewScope::History => Err(read_only_error(&schema_key, "history views")),
            ViewScope::Active | ViewScope::ByVersion => {
                let metadata = schema_metadata(ctx, &schema_key)?;
                let scope_query = entity_view_scope_query(
                    &metadata,
                    scope,
                    &schema_key,
                    delete.selection.as_ref(),
                    params,
                    ctx,
                )?;
                Ok(Some(WritePlan::EntityDelete(EntityDeletePlan {
                    scope: scope_query,
                })))
            }
        },
        Surface::File { scope } => match scope {
            ViewScope::History => Err(read_only_error("lix_file_history", "history views")),
            ViewScope::Active | ViewScope::ByVersion => {
                let scope_query =
                    file_scope_query(scope, delete.selection.as_ref(), params, ctx)?;
                Ok(Some(WritePlan::FileDelete(FileDeletePlan {
                    scope: scope_query,
                })))
            }
        },
        Surface::Version | Surface::ActiveVersion => Err(LixError::planner(
            "DELETE is not supported on version views",
        )),
        Surface::StateHistory => Err(read_only_error("lix_state_history", "history views")),
        Surface::StateWithTombstones => {
            Err(read_only_error("lix_state_with_tombstones", "tombstone views"))
        }
        Surface::Commit | Surface::Change => {
            Err(read_only_error("lix_commit / lix_change", "change-store views"))
        }
    }
}

fn classify_target(name: &ObjectName, ctx: &PlannerContext) -> Result<Option<Surface>, LixError> {
    let Some(table_name) = object_name_terminal(name) else {
        return Ok(None);
    };
    classify_relation(&table_name, &ctx.catalog)
}

fn update_target_name(table: &TableWithJoins) -> Option<ObjectName> {
    match &table.relation {
        TableFactor::Table { name, .. } => Some(name.clone()),
        _ => None,
    }
}

fn delete_target_name(delete: &Delete) -> Option<ObjectName> {
    let tables = match &delete.from {
        FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
    };
    let first = tables.first()?;
    match &first.relation {
        TableFactor::Table { name, .. } => Some(name.clone()),
        _ => None,
    }
}

fn read_only_error(view: &str, kind: &str) -> LixError {
    LixError::planner(format!("{view} is read-only ({kind} accept no writes)"))
}

// --- INSERT ---------------------------------------------------------------

fn insert_value_rows(
    insert: &Insert,
    params: &[Value],
    columns: &[String],
) -> Result<Vec<Vec<Value>>, LixError> {
    let Some(source) = insert.source.as_ref() else {
        return Err(LixError::planner(
            "inserts into logical views require VALUES rows",
        ));
    };
    let SetExpr::Values(values) = source.body.as_ref() else {
        return Err(LixError::planner(
            "INSERT ... SELECT into logical views is not supported; use VALUES",
        ));
    };

    let mut rows = Vec::with_capacity(values.rows.len());
    for row in &values.rows {
        if row.len() != columns.len() {
            return Err(LixError::planner(format!(
                "insert row has {} values but {} columns were named",
                row.len(),
                columns.len()
            )));
        }
        let mut resolved = Vec::with_capacity(row.len());
        for expr in row {
            resolved.push(literal_from_expr(expr, params)?);
        }
        rows.push(resolved);
    }
    Ok(rows)
}

fn entity_insert_from_state_rows(
    columns: &[String],
    rows: &[Vec<Value>],
    ctx: &PlannerContext,
    version_column: Option<&str>,
) -> Result<WritePlan, LixError> {
    let index = column_index(columns);
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let entity_id = required_text(&index, row, "entity_id")?;
        let schema_key = required_text(&index, row, "schema_key")?;
        let file_id = required_text(&index, row, "file_id")?;
        let snapshot_text = required_text(&index, row, "snapshot_content")?;
        let snapshot_content: JsonValue = serde_json::from_str(&snapshot_text).map_err(|error| {
            LixError::planner(format!("snapshot_content must be valid JSON: {error}"))
        })?;

        let metadata = optional_json(&index, row, "metadata")?;
        let plugin_key =
            optional_text(&index, row, "plugin_key")?.unwrap_or_else(|| LIX_PLUGIN_KEY.to_string());
        let version_id = match version_column {
            Some(column) => required_text(&index, row, column)?,
            None => ctx.active_version_id.clone(),
        };

        let metadata_definition = ctx.catalog.definition(&schema_key).cloned();
        let schema_version = match ctx.catalog.get(&schema_key) {
            Some(metadata) => metadata.schema_version.clone(),
            None => {
                return Err(LixError::planner(format!(
                    "no schema registered for '{schema_key}'; register it via lix_stored_schema first"
                )))
            }
        };
        if let Some(definition) = metadata_definition.as_ref() {
            validate_lix_schema(definition, &snapshot_content)?;
        }

        out.push(EntityInsertRow {
            schema_key,
            schema_version,
            entity_id,
            file_id,
            version_id,
            plugin_key,
            snapshot_content,
            metadata,
        });
    }
    Ok(WritePlan::EntityInsert { rows: out })
}

fn entity_insert_from_view_rows(
    schema_key: &str,
    scope: ViewScope,
    columns: &[String],
    rows: &[Vec<Value>],
    ctx: &PlannerContext,
) -> Result<WritePlan, LixError> {
    let metadata = schema_metadata(ctx, schema_key)?;
    let definition = ctx
        .catalog
        .definition(schema_key)
        .cloned()
        .ok_or_else(|| LixError::planner(format!("no schema registered for '{schema_key}'")))?;
    let index = column_index(columns);

    for column in columns {
        let is_property = metadata.properties.iter().any(|p| p == column);
        let is_lixcol = matches!(
            column.as_str(),
            "lixcol_file_id" | "lixcol_version_id" | "version_id" | "lixcol_metadata"
        );
        if !is_property && !is_lixcol {
            return Err(LixError::planner(format!(
                "unknown column '{column}' for view '{schema_key}'"
            )));
        }
    }

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut snapshot = JsonMap::new();
        for property in &metadata.properties {
            let Some(position) = index.get(property.as_str()) else {
                continue;
            };
            let value = row[*position].clone();
            if value.is_null() {
                continue;
            }
            let property_definition = definition
                .get("properties")
                .and_then(|properties| properties.get(property));
            snapshot.insert(
                property.clone(),
                json_value_for_property(value, property_definition)?,
            );
        }
        let snapshot_content = JsonValue::Object(snapshot);
        validate_lix_schema(&definition, &snapshot_content)?;
        let entity_id = metadata.entity_id_from_snapshot(&snapshot_content)?;

        let file_id =
            optional_text(&index, row, "lixcol_file_id")?.unwrap_or_else(|| META_FILE_ID.to_string());
        let version_id = match scope {
            ViewScope::ByVersion => optional_text(&index, row, "lixcol_version_id")?
                .or(optional_text(&index, row, "version_id")?)
                .ok_or_else(|| {
                    LixError::planner(format!(
                        "{schema_key}_by_version insert requires lixcol_version_id"
                    ))
                })?,
            _ => ctx.active_version_id.clone(),
        };
        let metadata_value = optional_json(&index, row, "lixcol_metadata")?;

        out.push(EntityInsertRow {
            schema_key: schema_key.to_string(),
            schema_version: metadata.schema_version.clone(),
            entity_id,
            file_id,
            version_id,
            plugin_key: LIX_PLUGIN_KEY.to_string(),
            snapshot_content,
            metadata: metadata_value,
        });
    }
    Ok(WritePlan::EntityInsert { rows: out })
}

fn file_insert_from_rows(
    scope: ViewScope,
    columns: &[String],
    rows: &[Vec<Value>],
    ctx: &PlannerContext,
) -> Result<WritePlan, LixError> {
    let index = column_index(columns);
    for column in columns {
        if !matches!(
            column.as_str(),
            "id" | "path"
                | "data"
                | "directory_id"
                | "hidden"
                | "metadata"
                | "version_id"
                | "lixcol_version_id"
        ) {
            return Err(LixError::planner(format!(
                "unknown column '{column}' for lix_file insert"
            )));
        }
    }

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let path = required_text(&index, row, "path")?;
        let data = match index.get("data").map(|position| row[*position].clone()) {
            Some(Value::Blob(bytes)) => bytes,
            Some(Value::Text(text)) => text.into_bytes(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(LixError::planner(format!(
                    "lix_file.data must be a blob, got {other:?}"
                )))
            }
        };
        let version_id = match scope {
            ViewScope::ByVersion => optional_text(&index, row, "lixcol_version_id")?
                .or(optional_text(&index, row, "version_id")?)
                .ok_or_else(|| {
                    LixError::planner("lix_file_by_version insert requires lixcol_version_id")
                })?,
            _ => ctx.active_version_id.clone(),
        };
        out.push(FileInsertRow {
            id: optional_text(&index, row, "id")?,
            path,
            data,
            directory_id: optional_text(&index, row, "directory_id")?,
            hidden: optional_bool(&index, row, "hidden")?.unwrap_or(false),
            metadata: optional_json(&index, row, "metadata")?,
            version_id,
        });
    }
    Ok(WritePlan::FileInsert { rows: out })
}

fn create_version_from_rows(columns: &[String], rows: &[Vec<Value>]) -> Result<WritePlan, LixError> {
    if rows.len() != 1 {
        return Err(LixError::planner(
            "lix_version insert expects exactly one row",
        ));
    }
    let index = column_index(columns);
    let row = &rows[0];
    Ok(WritePlan::CreateVersion(CreateVersionPlan {
        id: optional_text(&index, row, "id")?,
        name: optional_text(&index, row, "name")?,
        inherits_from_version_id: optional_text(&index, row, "inherits_from_version_id")?,
        hidden: optional_bool(&index, row, "hidden")?.unwrap_or(false),
    }))
}

// --- UPDATE ---------------------------------------------------------------

fn state_assignments(
    assignments: &[Assignment],
    params: &[Value],
) -> Result<SnapshotAssignments, LixError> {
    let mut out = SnapshotAssignments::default();
    for assignment in assignments {
        let column = assignment_column(assignment)?;
        let value = literal_from_expr(&assignment.value, params)?;
        match column.as_str() {
            "snapshot_content" => {
                let text = value.as_text().ok_or_else(|| {
                    LixError::planner("snapshot_content assignment must be JSON text")
                })?;
                let parsed = serde_json::from_str(text).map_err(|error| {
                    LixError::planner(format!("snapshot_content must be valid JSON: {error}"))
                })?;
                out.snapshot_content = Some(parsed);
            }
            "metadata" => {
                out.metadata = Some(json_from_value_opt(value)?);
            }
            other => {
                return Err(LixError::planner(format!(
                    "column '{other}' of lix_state is not writable"
                )))
            }
        }
    }
    Ok(out)
}

fn entity_view_assignments(
    assignments: &[Assignment],
    params: &[Value],
    metadata: &SchemaMetadata,
    ctx: &PlannerContext,
) -> Result<SnapshotAssignments, LixError> {
    let definition = ctx.catalog.definition(&metadata.schema_key).cloned();
    let mut out = SnapshotAssignments::default();
    for assignment in assignments {
        let column = assignment_column(assignment)?;
        let value = literal_from_expr(&assignment.value, params)?;
        if column == "lixcol_metadata" {
            out.metadata = Some(json_from_value_opt(value)?);
            continue;
        }
        if !metadata.properties.iter().any(|p| *p == column) {
            return Err(LixError::planner(format!(
                "column '{column}' of view '{}' is not writable",
                metadata.schema_key
            )));
        }
        let property_definition = definition
            .as_ref()
            .and_then(|definition| definition.get("properties"))
            .and_then(|properties| properties.get(&column));
        out.properties
            .push((column, json_value_for_property(value, property_definition)?));
    }
    Ok(out)
}

fn file_update_plan(
    assignments: &[Assignment],
    selection: Option<&Expr>,
    params: &[Value],
    scope: ViewScope,
    ctx: &PlannerContext,
) -> Result<FileUpdatePlan, LixError> {
    let mut plan = FileUpdatePlan {
        scope: file_scope_query(scope, selection, params, ctx)?,
        path: None,
        data: None,
        hidden: None,
        metadata: None,
    };
    for assignment in assignments {
        let column = assignment_column(assignment)?;
        let value = literal_from_expr(&assignment.value, params)?;
        match column.as_str() {
            "path" => {
                plan.path = Some(value.as_text().map(str::to_string).ok_or_else(|| {
                    LixError::planner("lix_file.path assignment must be text")
                })?);
            }
            "data" => {
                plan.data = Some(match value {
                    Value::Blob(bytes) => bytes,
                    Value::Text(text) => text.into_bytes(),
                    other => {
                        return Err(LixError::planner(format!(
                            "lix_file.data must be a blob, got {other:?}"
                        )))
                    }
                });
            }
            "hidden" => {
                plan.hidden = Some(matches!(value, Value::Integer(flag) if flag != 0));
            }
            "metadata" => {
                plan.metadata = Some(json_from_value_opt(value)?);
            }
            other => {
                return Err(LixError::planner(format!(
                    "column '{other}' of lix_file is not writable"
                )))
            }
        }
    }
    Ok(plan)
}

fn active_version_assignment(
    assignments: &[Assignment],
    params: &[Value],
) -> Result<String, LixError> {
    for assignment in assignments {
        let column = assignment_column(assignment)?;
        if column == "version_id" {
            let value = literal_from_expr(&assignment.value, params)?;
            return value
                .as_text()
                .map(str::to_string)
                .ok_or_else(|| LixError::planner("version_id assignment must be text"));
        }
    }
    Err(LixError::planner(
        "lix_active_version update must assign version_id",
    ))
}

fn assignment_column(assignment: &Assignment) -> Result<String, LixError> {
    match &assignment.target {
        AssignmentTarget::ColumnName(name) => object_name_terminal(name)
            .map(|column| column.to_ascii_lowercase())
            .ok_or_else(|| LixError::planner("unsupported assignment target")),
        AssignmentTarget::Tuple(_) => {
            Err(LixError::planner("tuple assignments are not supported"))
        }
    }
}

// --- scope queries --------------------------------------------------------

fn state_scope_source(surface: &Surface) -> String {
    resolved_state_sql(
        StateSourceOptions {
            include_tombstones: false,
            active_version_only: matches!(surface, Surface::State),
        },
        None,
    )
}

fn entity_scope_query(
    source_sql: String,
    alias: &str,
    selection: Option<&Expr>,
    params: &[Value],
    ctx: &PlannerContext,
) -> Result<ScopeQuery, LixError> {
    let projection = ENTITY_SCOPE_COLUMNS.join(", ");
    build_scope_query(&projection, &source_sql, alias, selection, params, ctx)
}

fn entity_view_scope_query(
    metadata: &SchemaMetadata,
    scope: ViewScope,
    alias: &str,
    selection: Option<&Expr>,
    params: &[Value],
    ctx: &PlannerContext,
) -> Result<ScopeQuery, LixError> {
    let source_sql = entity_view_sql(metadata, scope, ctx.dialect);
    let projection = ENTITY_SCOPE_COLUMNS
        .iter()
        .map(|column| format!("lixcol_{column} AS {column}"))
        .collect::<Vec<_>>()
        .join(", ");
    build_scope_query(&projection, &source_sql, alias, selection, params, ctx)
}

fn file_scope_query(
    scope: ViewScope,
    selection: Option<&Expr>,
    params: &[Value],
    ctx: &PlannerContext,
) -> Result<ScopeQuery, LixError> {
    let source_sql = file_view_sql(scope, ctx.dialect);
    let projection = FILE_SCOPE_COLUMNS
        .iter()
        .map(|column| match *column {
            "version_id" => "lixcol_version_id AS version_id".to_string(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ");
    build_scope_query(&projection, &source_sql, "lix_file", selection, params, ctx)
}

fn build_scope_query(
    projection: &str,
    source_sql: &str,
    alias: &str,
    selection: Option<&Expr>,
    params: &[Value],
    ctx: &PlannerContext,
) -> Result<ScopeQuery, LixError> {
    let mut sql = format!("SELECT {projection} FROM ({source_sql}) {alias}");
    if let Some(selection) = selection {
        sql.push_str(" WHERE ");
        sql.push_str(&selection.to_string());
    }

    // Subqueries in the WHERE clause may reference logical views themselves.
    let mut statements = parse_sql_statements(&sql)
        .map_err(|error| LixError::lowering(format!("scope query failed to parse: {error}")))?;
    let mut statement = statements.remove(0);
    lower_read_statement(&mut statement, &ctx.catalog, ctx.dialect)?;

    // The SET clause's placeholders were resolved at plan time, so the scope
    // query references a subset of the statement's parameters. Re-binding
    // renumbers them densely and drops the unused ones.
    let bound = bind_statement(&statement.to_string(), params, ctx.dialect)?;

    Ok(ScopeQuery {
        sql: bound.sql,
        params: bound.params,
    })
}

// --- literals -------------------------------------------------------------

fn column_index(columns: &[String]) -> HashMap<&str, usize> {
    columns
        .iter()
        .enumerate()
        .map(|(index, column)| (column.as_str(), index))
        .collect()
}

fn required_text(
    index: &HashMap<&str, usize>,
    row: &[Value],
    column: &str,
) -> Result<String, LixError> {
    optional_text(index, row, column)?
        .ok_or_else(|| LixError::planner(format!("insert requires a '{column}' value")))
}

fn optional_text(
    index: &HashMap<&str, usize>,
    row: &[Value],
    column: &str,
) -> Result<Option<String>, LixError> {
    let Some(position) = index.get(column) else {
        return Ok(None);
    };
    match &row[*position] {
        Value::Null => Ok(None),
        Value::Text(text) => Ok(Some(text.clone())),
        other => Err(LixError::planner(format!(
            "column '{column}' must be text, got {other:?}"
        ))),
    }
}

fn optional_bool(
    index: &HashMap<&str, usize>,
    row: &[Value],
    column: &str,
) -> Result<Option<bool>, LixError> {
    let Some(position) = index.get(column) else {
        return Ok(None);
    };
    match &row[*position] {
        Value::Null => Ok(None),
        Value::Integer(flag) => Ok(Some(*flag != 0)),
        other => Err(LixError::planner(format!(
            "column '{column}' must be an integer flag, got {other:?}"
        ))),
    }
}

fn optional_json(
    index: &HashMap<&str, usize>,
    row: &[Value],
    column: &str,
) -> Result<Option<JsonValue>, LixError> {
    let Some(position) = index.get(column) else {
        return Ok(None);
    };
    json_from_value_opt(row[*position].clone())
}

fn json_from_value_opt(value: Value) -> Result<Option<JsonValue>, LixError> {
    match value {
        Value::Null => Ok(None),
        Value::Text(text) => Ok(Some(
            serde_json::from_str(&text).unwrap_or(JsonValue::String(text)),
        )),
        Value::Integer(number) => Ok(Some(JsonValue::from(number))),
        Value::Real(number) => Ok(Some(JsonValue::from(number))),
        Value::Blob(_) => Err(LixError::planner("blobs are not valid JSON metadata")),
    }
}

/// Converts a bound SQL value into the JSON shape the property declares:
/// object/array properties parse text as JSON, everything else stays scalar.
fn json_value_for_property(
    value: Value,
    property_definition: Option<&JsonValue>,
) -> Result<JsonValue, LixError> {
    let expects_json = property_definition
        .and_then(|definition| definition.get("type"))
        .map(|declared| match declared {
            JsonValue::String(name) => name == "object" || name == "array",
            JsonValue::Array(names) => names
                .iter()
                .any(|name| name == "object" || name == "array"),
            _ => false,
        })
        .unwrap_or(false);

    match value {
        Value::Null => Ok(JsonValue::Null),
        Value::Integer(number) => Ok(JsonValue::from(number)),
        Value::Real(number) => Ok(JsonValue::from(number)),
        Value::Text(text) => {
            if expects_json {
                serde_json::from_str(&text).map_err(|error| {
                    LixError::planner(format!(
                        "property expects a JSON document, got invalid JSON text: {error}"
                    ))
                })
            } else {
                Ok(JsonValue::String(text))
            }
        }
        Value::Blob(_) => Err(LixError::planner(
            "blob values cannot be stored in entity snapshots",
        )),
    }
}

pub(crate) fn literal_from_expr(expr: &Expr, params: &[Value]) -> Result<Value, LixError> {
    match expr {
        Expr::Value(value) => literal_from_sql_value(&value.value, params),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal_from_expr(expr, params)? {
            Value::Integer(number) => Ok(Value::Integer(-number)),
            Value::Real(number) => Ok(Value::Real(-number)),
            other => Err(LixError::planner(format!(
                "cannot negate non-numeric literal {other:?}"
            ))),
        },
        other => Err(LixError::planner(format!(
            "unsupported expression in write statement: {other}"
        ))),
    }
}

fn literal_from_sql_value(value: &SqlValue, params: &[Value]) -> Result<Value, LixError> {
    match value {
        SqlValue::Null => Ok(Value::Null),
        SqlValue::Boolean(flag) => Ok(Value::Integer(i64::from(*flag))),
        SqlValue::Number(number, _) => {
            if let Ok(integer) = number.parse::<i64>() {
                Ok(Value::Integer(integer))
            } else {
                number
                    .parse::<f64>()
                    .map(Value::Real)
                    .map_err(|_| LixError::planner(format!("invalid numeric literal '{number}'")))
            }
        }
        SqlValue::SingleQuotedString(text) | SqlValue::DoubleQuotedString(text) => {
            Ok(Value::Text(text.clone()))
        }
        SqlValue::HexStringLiteral(hex) => decode_hex_literal(hex),
        SqlValue::Placeholder(token) => {
            let trimmed = token.trim();
            let numeric = trimmed
                .strip_prefix('?')
                .or_else(|| trimmed.strip_prefix('$'))
                .ok_or_else(|| {
                    LixError::planner(format!("unsupported placeholder '{trimmed}'"))
                })?;
            let position = numeric.parse::<usize>().map_err(|_| {
                LixError::invariant(format!(
                    "planner encountered unbound placeholder '{trimmed}'; placeholders bind once"
                ))
            })?;
            params
                .get(position.saturating_sub(1))
                .cloned()
                .ok_or_else(|| {
                    LixError::binding(format!(
                        "placeholder '{trimmed}' references a missing parameter"
                    ))
                })
        }
        other => Err(LixError::planner(format!(
            "unsupported literal in write statement: {other}"
        ))),
    }
}

fn decode_hex_literal(hex: &str) -> Result<Value, LixError> {
    if hex.len() % 2 != 0 {
        return Err(LixError::planner(format!(
            "hex literal has odd length: '{hex}'"
        )));
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    let raw = hex.as_bytes();
    for pair in raw.chunks(2) {
        let high = hex_digit(pair[0])?;
        let low = hex_digit(pair[1])?;
        bytes.push((high << 4) | low);
    }
    Ok(Value::Blob(bytes))
}

fn hex_digit(byte: u8) -> Result<u8, LixError> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        b'A'..=b'F' => Ok(byte - b'A' + 10),
        other => Err(LixError::planner(format!(
            "invalid hex digit '{}'",
            other as char
        ))),
    }
}

fn schema_metadata(ctx: &PlannerContext, schema_key: &str) -> Result<SchemaMetadata, LixError> {
    ctx.catalog
        .get(schema_key)
        .cloned()
        .ok_or_else(|| LixError::planner(format!("no schema registered for '{schema_key}'")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::lower_write_statement;
    use crate::backend::SqlDialect;
    use crate::schema_catalog::SchemaCatalog;
    use crate::sql::parse::parse_sql_statements;
    use crate::sql::plan::WritePlan;
    use crate::sql::planner::PlannerContext;
    use crate::{LixErrorCode, Value};

    fn test_ctx() -> PlannerContext {
        PlannerContext {
            active_version_id: "main".to_string(),
            catalog: Arc::new(SchemaCatalog::with_builtin_schemas()),
            dialect: SqlDialect::Sqlite,
            access_to_internal: false,
        }
    }

    fn lower(sql: &str, params: &[Value]) -> Option<WritePlan> {
        let statements = parse_sql_statements(sql).expect("parse sql");
        lower_write_statement(&statements[0], params, &test_ctx()).expect("lowering")
    }

    #[test]
    fn key_value_insert_synthesizes_snapshot_and_entity_id() {
        let plan = lower(
            "INSERT INTO lix_key_value (key, value) VALUES ('flag', 'on')",
            &[],
        )
        .expect("write plan");
        let WritePlan::EntityInsert { rows } = plan else {
            panic!("expected entity insert, got {plan:?}");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entity_id, "flag");
        assert_eq!(rows[0].schema_key, "lix_key_value");
        assert_eq!(rows[0].version_id, "main");
        assert_eq!(
            rows[0].snapshot_content,
            serde_json::json!({ "key": "flag", "value": "on" })
        );
    }

    #[test]
    fn key_value_insert_resolves_bound_placeholders() {
        let plan = lower(
            "INSERT INTO lix_key_value (key, value) VALUES (?1, ?2)",
            &[
                Value::Text("k".to_string()),
                Value::Text("v".to_string()),
            ],
        )
        .expect("write plan");
        let WritePlan::EntityInsert { rows } = plan else {
            panic!("expected entity insert");
        };
        assert_eq!(rows[0].entity_id, "k");
    }

    #[test]
    fn state_insert_requires_registered_schema() {
        let statements = parse_sql_statements(
            "INSERT INTO lix_state (entity_id, schema_key, file_id, snapshot_content) \
             VALUES ('e', 'unregistered_schema', 'f', '{}')",
        )
        .expect("parse sql");
        let err = lower_write_statement(&statements[0], &[], &test_ctx())
            .expect_err("unregistered schema should fail");
        assert_eq!(err.code, LixErrorCode::Planner);
    }

    #[test]
    fn file_insert_accepts_blob_data() {
        let plan = lower(
            "INSERT INTO lix_file (id, path, data) VALUES ('f1', '/a.json', x'7b7d')",
            &[],
        )
        .expect("write plan");
        let WritePlan::FileInsert { rows } = plan else {
            panic!("expected file insert");
        };
        assert_eq!(rows[0].data, b"{}".to_vec());
        assert_eq!(rows[0].path, "/a.json");
    }

    #[test]
    fn file_update_carries_scope_query_over_lowered_view() {
        let plan = lower(
            "UPDATE lix_file SET data = x'01' WHERE id = 'f1'",
            &[],
        )
        .expect("write plan");
        let WritePlan::FileUpdate(update) = plan else {
            panic!("expected file update");
        };
        assert_eq!(update.data.as_deref(), Some(&[1u8][..]));
        assert!(update.scope.sql.contains("lix_internal_state_materialized"));
        assert!(update.scope.sql.contains("WHERE id = 'f1'"));
    }

    #[test]
    fn history_views_reject_writes() {
        let statements = parse_sql_statements(
            "INSERT INTO lix_key_value_history (key, value) VALUES ('a', 'b')",
        )
        .expect("parse sql");
        let err = lower_write_statement(&statements[0], &[], &test_ctx())
            .expect_err("history writes should fail");
        assert_eq!(err.code, LixErrorCode::Planner);
    }

    #[test]
    fn active_version_update_becomes_switch_plan() {
        let plan = lower(
            "UPDATE lix_active_version SET version_id = 'branch'",
            &[],
        )
        .expect("write plan");
        assert_eq!(
            plan,
            WritePlan::SwitchActiveVersion {
                version_id: "branch".to_string()
            }
        );
    }

    #[test]
    fn passthrough_tables_produce_no_write_plan() {
        assert!(lower("INSERT INTO app_table (id) VALUES (1)", &[]).is_none());
    }
}
