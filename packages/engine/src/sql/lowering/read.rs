use std::ops::ControlFlow;

use sqlparser::ast::{Ident, Statement, TableAlias, TableFactor, VisitMut, VisitorMut};

use crate::backend::SqlDialect;
use crate::schema_catalog::SchemaCatalog;
use crate::sql::parse::{object_name_terminal, parse_sql_statements};
use crate::sql::surface::{classify_relation, Surface, ViewScope};
use crate::LixError;

use super::views::{
    active_version_view_sql, change_view_sql, commit_view_sql, entity_view_sql, file_history_sql,
    file_view_sql, resolved_state_sql, state_history_sql, version_view_sql, StateSourceOptions,
};

/// Replaces every logical-surface relation in `statement` with a derived
/// subquery over the internal tables. Returns whether anything was rewritten.
pub(crate) fn lower_read_statement(
    statement: &mut Statement,
    catalog: &SchemaCatalog,
    dialect: SqlDialect,
) -> Result<bool, LixError> {
    let mut rewriter = SurfaceRewriter {
        catalog,
        dialect,
        changed: false,
        error: None,
    };
    let _ = statement.visit(&mut rewriter);
    if let Some(error) = rewriter.error {
        return Err(error);
    }
    Ok(rewriter.changed)
}

struct SurfaceRewriter<'a> {
    catalog: &'a SchemaCatalog,
    dialect: SqlDialect,
    changed: bool,
    error: Option<LixError>,
}

impl VisitorMut for SurfaceRewriter<'_> {
    type Break = ();

    // Post-order: the substituted subquery is already lowered and must not be
    // visited again.
    fn post_visit_table_factor(&mut self, table_factor: &mut TableFactor) -> ControlFlow<()> {
        let TableFactor::Table { name, alias, .. } = table_factor else {
            return ControlFlow::Continue(());
        };
        let Some(table_name) = object_name_terminal(name) else {
            return ControlFlow::Continue(());
        };

        let surface = match classify_relation(&table_name, self.catalog) {
            Ok(Some(surface)) => surface,
            Ok(None) => return ControlFlow::Continue(()),
            Err(error) => {
                self.error = Some(error);
                return ControlFlow::Break(());
            }
        };

        let view_sql = match view_sql_for_surface(&surface, self.catalog, self.dialect) {
            Ok(sql) => sql,
            Err(error) => {
                self.error = Some(error);
                return ControlFlow::Break(());
            }
        };
        let subquery = match parse_single_query(&view_sql) {
            Ok(query) => query,
            Err(error) => {
                self.error = Some(error);
                return ControlFlow::Break(());
            }
        };

        let derived_alias = alias.clone().unwrap_or_else(|| TableAlias {
            explicit: false,
            name: Ident::new(table_name.to_ascii_lowercase()),
            columns: Vec::new(),
        });
        *table_factor = TableFactor::Derived {
            lateral: false,
            subquery: Box::new(subquery),
            alias: Some(derived_alias),
        };
        self.changed = true;
        ControlFlow::Continue(())
    }
}

pub(crate) fn view_sql_for_surface(
    surface: &Surface,
    catalog: &SchemaCatalog,
    dialect: SqlDialect,
) -> Result<String, LixError> {
    let sql = match surface {
        Surface::State => resolved_state_sql(
            StateSourceOptions {
                include_tombstones: false,
                active_version_only: true,
            },
            None,
        ),
        Surface::StateByVersion => resolved_state_sql(
            StateSourceOptions {
                include_tombstones: false,
                active_version_only: false,
            },
            None,
        ),
        Surface::StateWithTombstones => resolved_state_sql(
            StateSourceOptions {
                include_tombstones: true,
                active_version_only: true,
            },
            None,
        ),
        Surface::StateHistory => state_history_sql(None),
        Surface::File {
            scope: ViewScope::History,
        } => file_history_sql(dialect),
        Surface::File { scope } => file_view_sql(*scope, dialect),
        Surface::EntityView { schema_key, scope } => {
            let metadata = catalog.get(schema_key).ok_or_else(|| {
                LixError::planner(format!("no schema registered for '{schema_key}'"))
            })?;
            entity_view_sql(metadata, *scope, dialect)
        }
        Surface::Version => version_view_sql(),
        Surface::ActiveVersion => active_version_view_sql(),
        Surface::Commit => commit_view_sql(),
        Surface::Change => change_view_sql(),
    };
    Ok(sql)
}

pub(crate) fn parse_single_query(sql: &str) -> Result<sqlparser::ast::Query, LixError> {
    let mut statements = parse_sql_statements(sql)
        .map_err(|error| LixError::lowering(format!("lowered SQL failed to parse: {error}")))?;
    if statements.len() != 1 {
        return Err(LixError::lowering(
            "lowered view SQL must contain exactly one statement",
        ));
    }
    match statements.remove(0) {
        Statement::Query(query) => Ok(*query),
        other => Err(LixError::lowering(format!(
            "lowered view SQL must be a query, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::lower_read_statement;
    use crate::backend::SqlDialect;
    use crate::schema_catalog::SchemaCatalog;
    use crate::sql::parse::parse_sql_statements;
    use crate::LixErrorCode;

    fn lower(sql: &str) -> String {
        let catalog = SchemaCatalog::with_builtin_schemas();
        let mut statements = parse_sql_statements(sql).expect("parse sql");
        let mut statement = statements.remove(0);
        lower_read_statement(&mut statement, &catalog, SqlDialect::Sqlite).expect("lowering");
        statement.to_string()
    }

    #[test]
    fn lowers_lix_state_to_internal_tables() {
        let lowered = lower("SELECT snapshot_content FROM lix_state WHERE entity_id = '/theme'");
        assert!(lowered.contains("lix_internal_state_materialized"));
        assert!(lowered.contains("lix_internal_version_ancestry"));
        assert!(!lowered.contains("FROM lix_state "));
    }

    #[test]
    fn lowers_entity_views_with_property_projection() {
        let lowered = lower("SELECT key, value FROM lix_key_value WHERE key = 'flag'");
        assert!(lowered.contains("json_extract"));
        assert!(lowered.contains("lix_key_value"));
        assert!(lowered.contains("schema_key = 'lix_key_value'"));
    }

    #[test]
    fn lowers_relations_inside_subqueries_and_joins() {
        let lowered = lower(
            "SELECT t.id FROM some_table t \
             WHERE EXISTS (SELECT 1 FROM lix_state WHERE file_id = t.id)",
        );
        assert!(lowered.contains("lix_internal_state_materialized"));
        assert!(lowered.contains("some_table"));
    }

    #[test]
    fn preserves_explicit_aliases() {
        let lowered = lower("SELECT s.entity_id FROM lix_state AS s");
        assert!(lowered.contains(") AS s") || lowered.contains(") s"));
    }

    #[test]
    fn unknown_lix_relation_fails_lowering() {
        let catalog = SchemaCatalog::with_builtin_schemas();
        let mut statements =
            parse_sql_statements("SELECT * FROM lix_bogus_view").expect("parse sql");
        let mut statement = statements.remove(0);
        let err = lower_read_statement(&mut statement, &catalog, SqlDialect::Sqlite)
            .expect_err("unknown view should fail");
        assert_eq!(err.code, LixErrorCode::Planner);
    }

    #[test]
    fn lowered_history_exposes_depth_ordering() {
        let lowered = lower(
            "SELECT snapshot_content FROM lix_state_history \
             WHERE entity_id = '/theme' ORDER BY depth DESC",
        );
        assert!(lowered.contains("lix_internal_commit_ancestry"));
        assert!(lowered.contains("ORDER BY depth DESC"));
    }
}
