use crate::backend::SqlDialect;
use crate::schema_catalog::SchemaMetadata;
use crate::sql::parse::{escape_sql_string, quote_ident};
use crate::sql::surface::ViewScope;

pub(crate) const ACTIVE_VERSION_SUBQUERY: &str =
    "(SELECT version_id FROM lix_internal_active_version WHERE id = 1)";

pub(crate) const ACTIVE_TIP_SUBQUERY: &str = "(SELECT commit_id FROM lix_internal_version \
     WHERE id = (SELECT version_id FROM lix_internal_active_version WHERE id = 1))";

const FILE_DESCRIPTOR_SCHEMA_KEY: &str = "lix_file_descriptor";

/// Columns exposed by the `lix_state*` views, in projection order.
pub(crate) const STATE_VIEW_COLUMNS: &[&str] = &[
    "entity_id",
    "schema_key",
    "schema_version",
    "file_id",
    "version_id",
    "plugin_key",
    "snapshot_content",
    "metadata",
    "writer_key",
    "change_id",
    "commit_id",
    "inherited_from_version_id",
    "created_at",
    "updated_at",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StateSourceOptions {
    pub(crate) include_tombstones: bool,
    pub(crate) active_version_only: bool,
}

/// The state resolver: for every version, the nearest row along its
/// inheritance chain wins per `(entity_id, schema_key, file_id)`. Inherited
/// winners surface the contributing ancestor in `inherited_from_version_id`.
pub(crate) fn resolved_state_sql(options: StateSourceOptions, schema_key: Option<&str>) -> String {
    let mut predicates = vec!["inheritance_rank = 1".to_string()];
    if !options.include_tombstones {
        predicates.push("is_tombstone = 0".to_string());
    }
    if options.active_version_only {
        predicates.push(format!("version_id = {ACTIVE_VERSION_SUBQUERY}"));
    }
    if let Some(schema_key) = schema_key {
        predicates.push(format!("schema_key = '{}'", escape_sql_string(schema_key)));
    }

    format!(
        "SELECT {columns} \
         FROM (\
           SELECT s.entity_id, s.schema_key, s.schema_version, s.file_id, \
                  a.version_id AS version_id, s.plugin_key, s.snapshot_content, s.metadata, \
                  s.writer_key, s.change_id, s.commit_id, \
                  CASE WHEN a.inheritance_depth > 0 THEN s.version_id ELSE NULL END \
                    AS inherited_from_version_id, \
                  s.is_tombstone, s.created_at, s.updated_at, \
                  ROW_NUMBER() OVER (\
                    PARTITION BY a.version_id, s.entity_id, s.schema_key, s.file_id \
                    ORDER BY a.inheritance_depth\
                  ) AS inheritance_rank \
           FROM lix_internal_version_ancestry a \
           JOIN lix_internal_state_materialized s ON s.version_id = a.ancestor_version_id\
         ) winner \
         WHERE {predicates}",
        columns = STATE_VIEW_COLUMNS.join(", "),
        predicates = predicates.join(" AND "),
    )
}

/// Historical entity states along the commit ancestry of the active version's
/// tip. `depth` 0 is the tip commit.
pub(crate) fn state_history_sql(schema_key: Option<&str>) -> String {
    let mut predicates = vec![format!("anc.commit_id = {ACTIVE_TIP_SUBQUERY}")];
    if let Some(schema_key) = schema_key {
        predicates.push(format!(
            "ch.schema_key = '{}'",
            escape_sql_string(schema_key)
        ));
    }

    format!(
        "SELECT ch.entity_id, ch.schema_key, ch.schema_version, ch.file_id, ch.plugin_key, \
                sn.content AS snapshot_content, ch.metadata, ch.writer_key, \
                ch.id AS change_id, cm.id AS commit_id, anc.commit_id AS root_commit_id, \
                anc.depth AS depth, ch.created_at \
         FROM lix_internal_commit_ancestry anc \
         JOIN lix_internal_commit cm ON cm.id = anc.ancestor_id \
         JOIN lix_internal_change_set_element cse ON cse.change_set_id = cm.change_set_id \
         JOIN lix_internal_change ch ON ch.id = cse.change_id \
         JOIN lix_internal_snapshot sn ON sn.id = ch.snapshot_id \
         WHERE {predicates}",
        predicates = predicates.join(" AND "),
    )
}

/// Read projection for a registered entity view: one column per schema
/// property extracted from the snapshot, plus the canonical `lixcol_*`
/// columns.
pub(crate) fn entity_view_sql(
    metadata: &SchemaMetadata,
    scope: ViewScope,
    dialect: SqlDialect,
) -> String {
    let mut select_parts = Vec::new();
    for property in &metadata.properties {
        select_parts.push(format!(
            "{extract} AS {alias}",
            extract = json_extract_expr(dialect, "snapshot_content", property),
            alias = quote_ident(property),
        ));
    }

    match scope {
        ViewScope::Active | ViewScope::ByVersion => {
            for (column, alias) in [
                ("entity_id", "lixcol_entity_id"),
                ("schema_key", "lixcol_schema_key"),
                ("schema_version", "lixcol_schema_version"),
                ("file_id", "lixcol_file_id"),
                ("version_id", "lixcol_version_id"),
                ("plugin_key", "lixcol_plugin_key"),
                ("snapshot_content", "lixcol_snapshot_content"),
                ("metadata", "lixcol_metadata"),
                ("writer_key", "lixcol_writer_key"),
                ("change_id", "lixcol_change_id"),
                ("commit_id", "lixcol_commit_id"),
                (
                    "inherited_from_version_id",
                    "lixcol_inherited_from_version_id",
                ),
                ("created_at", "lixcol_created_at"),
                ("updated_at", "lixcol_updated_at"),
            ] {
                select_parts.push(format!("{column} AS {alias}"));
            }
            let source = resolved_state_sql(
                StateSourceOptions {
                    include_tombstones: false,
                    active_version_only: scope == ViewScope::Active,
                },
                Some(&metadata.schema_key),
            );
            format!(
                "SELECT {projection} FROM ({source}) entity_state",
                projection = select_parts.join(", "),
            )
        }
        ViewScope::History => {
            for (column, alias) in [
                ("entity_id", "lixcol_entity_id"),
                ("schema_key", "lixcol_schema_key"),
                ("schema_version", "lixcol_schema_version"),
                ("file_id", "lixcol_file_id"),
                ("plugin_key", "lixcol_plugin_key"),
                ("snapshot_content", "lixcol_snapshot_content"),
                ("metadata", "lixcol_metadata"),
                ("writer_key", "lixcol_writer_key"),
                ("change_id", "lixcol_change_id"),
                ("commit_id", "lixcol_commit_id"),
                ("root_commit_id", "lixcol_root_commit_id"),
                ("depth", "lixcol_depth"),
                ("created_at", "lixcol_created_at"),
            ] {
                select_parts.push(format!("{column} AS {alias}"));
            }
            let source = state_history_sql(Some(&metadata.schema_key));
            format!(
                "SELECT {projection} FROM ({source}) entity_history",
                projection = select_parts.join(", "),
            )
        }
    }
}

/// The `lix_file` view: descriptor projection joined with the materialized
/// data cache. Inherited descriptors read the cache row of the contributing
/// ancestor version.
pub(crate) fn file_view_sql(scope: ViewScope, dialect: SqlDialect) -> String {
    debug_assert!(scope != ViewScope::History);
    let descriptor_source = resolved_state_sql(
        StateSourceOptions {
            include_tombstones: false,
            active_version_only: scope == ViewScope::Active,
        },
        Some(FILE_DESCRIPTOR_SCHEMA_KEY),
    );

    let mut select_parts = Vec::new();
    for property in ["id", "path", "directory_id", "name", "extension", "metadata"] {
        select_parts.push(format!(
            "{extract} AS {alias}",
            extract = json_extract_expr(dialect, "d.snapshot_content", property),
            alias = quote_ident(property),
        ));
    }
    select_parts.push(format!(
        "COALESCE({extract}, 0) AS hidden",
        extract = json_extract_expr(dialect, "d.snapshot_content", "hidden"),
    ));
    select_parts.push("c.data AS data".to_string());
    for (column, alias) in [
        ("d.entity_id", "lixcol_entity_id"),
        ("d.version_id", "lixcol_version_id"),
        (
            "d.inherited_from_version_id",
            "lixcol_inherited_from_version_id",
        ),
        ("d.writer_key", "lixcol_writer_key"),
        ("d.change_id", "lixcol_change_id"),
        ("d.commit_id", "lixcol_commit_id"),
        ("d.created_at", "lixcol_created_at"),
        ("d.updated_at", "lixcol_updated_at"),
    ] {
        select_parts.push(format!("{column} AS {alias}"));
    }

    format!(
        "SELECT {projection} \
         FROM ({descriptor_source}) d \
         LEFT JOIN lix_internal_file_data_cache c \
           ON c.file_id = d.entity_id \
          AND c.version_id = COALESCE(d.inherited_from_version_id, d.version_id)",
        projection = select_parts.join(", "),
    )
}

/// Descriptor history for `lix_file_history`; file bytes are not
/// reconstructed per historical commit.
pub(crate) fn file_history_sql(dialect: SqlDialect) -> String {
    let source = state_history_sql(Some(FILE_DESCRIPTOR_SCHEMA_KEY));
    let mut select_parts = Vec::new();
    for property in ["id", "path", "directory_id", "name", "extension", "metadata"] {
        select_parts.push(format!(
            "{extract} AS {alias}",
            extract = json_extract_expr(dialect, "snapshot_content", property),
            alias = quote_ident(property),
        ));
    }
    for (column, alias) in [
        ("entity_id", "lixcol_entity_id"),
        ("change_id", "lixcol_change_id"),
        ("commit_id", "lixcol_commit_id"),
        ("root_commit_id", "lixcol_root_commit_id"),
        ("depth", "lixcol_depth"),
        ("created_at", "lixcol_created_at"),
    ] {
        select_parts.push(format!("{column} AS {alias}"));
    }
    format!(
        "SELECT {projection} FROM ({source}) file_history",
        projection = select_parts.join(", "),
    )
}

pub(crate) fn version_view_sql() -> String {
    "SELECT id, name, inherits_from_version_id, hidden, commit_id, working_commit_id \
     FROM lix_internal_version"
        .to_string()
}

pub(crate) fn active_version_view_sql() -> String {
    "SELECT version_id FROM lix_internal_active_version WHERE id = 1".to_string()
}

pub(crate) fn commit_view_sql() -> String {
    "SELECT id, version_id, change_set_id, author_ref, metadata, created_at \
     FROM lix_internal_commit"
        .to_string()
}

pub(crate) fn change_view_sql() -> String {
    "SELECT ch.id, ch.entity_id, ch.schema_key, ch.schema_version, ch.file_id, ch.plugin_key, \
            ch.snapshot_id, sn.content AS snapshot_content, ch.metadata, ch.writer_key, \
            ch.created_at \
     FROM lix_internal_change ch \
     JOIN lix_internal_snapshot sn ON sn.id = ch.snapshot_id"
        .to_string()
}

pub(crate) fn json_extract_expr(dialect: SqlDialect, column: &str, property: &str) -> String {
    let escaped = escape_sql_string(property);
    match dialect {
        SqlDialect::Sqlite => format!("json_extract({column}, '$.{escaped}')"),
        SqlDialect::Postgres => {
            format!("jsonb_extract_path_text(CAST({column} AS JSONB), '{escaped}')")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        entity_view_sql, file_view_sql, resolved_state_sql, state_history_sql, StateSourceOptions,
    };
    use crate::backend::SqlDialect;
    use crate::schema_catalog::SchemaCatalog;
    use crate::sql::parse::parse_sql_statements;
    use crate::sql::surface::ViewScope;

    fn assert_parses(sql: &str) {
        parse_sql_statements(sql).unwrap_or_else(|error| {
            panic!("generated SQL must parse: {error}\n{sql}");
        });
    }

    #[test]
    fn resolved_state_sql_parses_in_every_variant() {
        for include_tombstones in [false, true] {
            for active_version_only in [false, true] {
                assert_parses(&resolved_state_sql(
                    StateSourceOptions {
                        include_tombstones,
                        active_version_only,
                    },
                    None,
                ));
            }
        }
        assert_parses(&resolved_state_sql(
            StateSourceOptions {
                include_tombstones: false,
                active_version_only: true,
            },
            Some("lix_key_value"),
        ));
    }

    #[test]
    fn history_and_view_sql_parse() {
        assert_parses(&state_history_sql(None));
        assert_parses(&state_history_sql(Some("lix_file_descriptor")));
        assert_parses(&file_view_sql(ViewScope::Active, SqlDialect::Sqlite));
        assert_parses(&file_view_sql(ViewScope::ByVersion, SqlDialect::Postgres));

        let catalog = SchemaCatalog::with_builtin_schemas();
        let metadata = catalog.get("lix_key_value").expect("builtin schema");
        assert_parses(&entity_view_sql(metadata, ViewScope::Active, SqlDialect::Sqlite));
        assert_parses(&entity_view_sql(metadata, ViewScope::ByVersion, SqlDialect::Sqlite));
        assert_parses(&entity_view_sql(metadata, ViewScope::History, SqlDialect::Sqlite));
    }
}
