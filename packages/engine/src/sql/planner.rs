use std::ops::ControlFlow;
use std::sync::Arc;

use sqlparser::ast::{visit_relations, ObjectName, Statement};

use crate::backend::SqlDialect;
use crate::plugin::matching::glob_matches_path;
use crate::schema_catalog::SchemaCatalog;
use crate::sql::lowering::read::lower_read_statement;
use crate::sql::lowering::write::lower_write_statement;
use crate::sql::params::{bind_statement_with_cursor, ParamCursor};
use crate::sql::parse::{
    object_name_terminal, parse_sql_statements, reject_internal_table_access,
};
use crate::sql::plan::{
    plan_fingerprint, ExecutionPlan, PlanEffect, PlanRequirement, PlannedStatement, WritePlan,
};
use crate::{LixError, Value};

const STORED_SCHEMA_KEY: &str = "lix_stored_schema";

/// Everything the planner needs from the engine, gathered before planning so
/// the planner itself performs no I/O.
#[derive(Debug, Clone)]
pub(crate) struct PlannerContext {
    pub(crate) active_version_id: String,
    pub(crate) catalog: Arc<SchemaCatalog>,
    pub(crate) dialect: SqlDialect,
    /// Allows sessions booted for internal tooling to address
    /// `lix_internal_*` tables directly.
    pub(crate) access_to_internal: bool,
}

/// Plugin matchers the planner consults to derive `NeedPlugin` requirements.
#[derive(Debug, Clone, Default)]
pub(crate) struct PlannerPlugins {
    pub(crate) matchers: Vec<(String, String)>,
}

impl PlannerPlugins {
    fn key_for_path(&self, path: &str) -> Option<&str> {
        self.matchers
            .iter()
            .find(|(_, glob)| glob_matches_path(glob, path))
            .map(|(key, _)| key.as_str())
    }
}

/// A script whose placeholders have been resolved. Binding happens exactly
/// once; see [`plan_bound_script`].
pub(crate) struct BoundScript {
    statements: Vec<BoundStatement>,
}

struct BoundStatement {
    statement: Statement,
    params: Vec<Value>,
}

pub(crate) fn bind_script_once(
    sql: &str,
    params: &[Value],
    dialect: SqlDialect,
) -> Result<BoundScript, LixError> {
    let statements = parse_sql_statements(sql)?;

    let mut cursor = ParamCursor::new();
    let mut bound_statements = Vec::with_capacity(statements.len());
    for statement in statements {
        let bound =
            bind_statement_with_cursor(&statement.to_string(), params, dialect, cursor)?;
        cursor = bound.cursor;
        let mut reparsed = parse_sql_statements(&bound.sql)?;
        if reparsed.len() != 1 {
            return Err(LixError::invariant(
                "binding must preserve statement boundaries",
            ));
        }
        bound_statements.push(BoundStatement {
            statement: reparsed.remove(0),
            params: bound.params,
        });
    }

    Ok(BoundScript {
        statements: bound_statements,
    })
}

/// Plans a SQL script: bind once, classify surfaces, lower reads and writes,
/// derive requirements and effects, fingerprint the result.
pub(crate) fn plan_script(
    sql: &str,
    params: &[Value],
    ctx: &PlannerContext,
    plugins: &PlannerPlugins,
) -> Result<ExecutionPlan, LixError> {
    if !ctx.access_to_internal {
        let statements = parse_sql_statements(sql)?;
        reject_internal_table_access(&statements)?;
    }
    let bound = bind_script_once(sql, params, ctx.dialect)?;
    plan_bound_script(bound, &[], ctx, plugins)
}

/// Planning over an already-bound script. Supplying parameters again is a
/// hard error: placeholders bind exactly once per script.
pub(crate) fn plan_bound_script(
    bound: BoundScript,
    rebind_params: &[Value],
    ctx: &PlannerContext,
    plugins: &PlannerPlugins,
) -> Result<ExecutionPlan, LixError> {
    if !rebind_params.is_empty() {
        return Err(LixError::binding(
            "placeholders already bound; a script binds its parameters exactly once",
        ));
    }

    let mut planned = Vec::with_capacity(bound.statements.len());
    let mut requirements = Vec::new();
    let mut effects = Vec::new();

    for BoundStatement { statement, params } in bound.statements {
        derive_statement_requirements(&statement, &mut requirements);

        if let Some(write) = lower_write_statement(&statement, &params, ctx)? {
            derive_write_requirements(&write, plugins, &mut requirements);
            derive_write_effects(&write, &mut effects);
            planned.push(PlannedStatement::Write(write));
            continue;
        }

        let mut lowered = statement;
        lower_read_statement(&mut lowered, &ctx.catalog, ctx.dialect)?;
        planned.push(PlannedStatement::Query {
            sql: lowered.to_string(),
            params,
        });
    }

    if effects.contains(&PlanEffect::RecordChanges) {
        effects.push(PlanEffect::NotifyObservers);
    }
    dedupe(&mut requirements);
    dedupe(&mut effects);

    let fingerprint = plan_fingerprint(&planned);
    Ok(ExecutionPlan {
        statements: planned,
        requirements,
        effects,
        fingerprint,
    })
}

fn derive_statement_requirements(
    statement: &Statement,
    requirements: &mut Vec<PlanRequirement>,
) {
    let mut touches_active_surface = false;
    let mut touches_file_surface = false;
    let _ = visit_relations(statement, |relation: &ObjectName| {
        if let Some(name) = object_name_terminal(relation) {
            let normalized = name.to_ascii_lowercase();
            if normalized.starts_with("lix_") {
                touches_active_surface = true;
            }
            if normalized == "lix_file" || normalized == "lix_file_by_version" {
                touches_file_surface = true;
            }
        }
        ControlFlow::<()>::Continue(())
    });

    if touches_active_surface {
        requirements.push(PlanRequirement::NeedActiveVersion);
    }
    if touches_file_surface {
        requirements.push(PlanRequirement::NeedFileData);
    }
}

fn derive_write_requirements(
    write: &WritePlan,
    plugins: &PlannerPlugins,
    requirements: &mut Vec<PlanRequirement>,
) {
    match write {
        WritePlan::EntityInsert { rows } => {
            for row in rows {
                requirements.push(PlanRequirement::NeedSchema {
                    key: row.schema_key.clone(),
                    version: row.schema_version.clone(),
                });
            }
        }
        WritePlan::FileInsert { rows } => {
            for row in rows {
                if let Some(key) = plugins.key_for_path(&row.path) {
                    requirements.push(PlanRequirement::NeedPlugin(key.to_string()));
                }
            }
        }
        _ => {}
    }
}

fn derive_write_effects(write: &WritePlan, effects: &mut Vec<PlanEffect>) {
    match write {
        WritePlan::EntityInsert { rows } => {
            effects.push(PlanEffect::RecordChanges);
            for row in rows {
                if row.schema_key == STORED_SCHEMA_KEY {
                    effects.push(PlanEffect::RegisterSchema(row.entity_id.clone()));
                }
            }
        }
        WritePlan::EntityUpdate(_) | WritePlan::EntityDelete(_) => {
            effects.push(PlanEffect::RecordChanges);
        }
        WritePlan::FileInsert { .. } | WritePlan::FileUpdate(_) | WritePlan::FileDelete(_) => {
            effects.push(PlanEffect::RecordChanges);
            effects.push(PlanEffect::RefreshFileData);
        }
        WritePlan::CreateVersion(_) => {
            effects.push(PlanEffect::RecordChanges);
        }
        WritePlan::SwitchActiveVersion { version_id } => {
            effects.push(PlanEffect::SwitchActiveVersion(version_id.clone()));
        }
    }
}

fn dedupe<T: PartialEq>(values: &mut Vec<T>) {
    let mut index = 0;
    while index < values.len() {
        if values[..index].contains(&values[index]) {
            values.remove(index);
        } else {
            index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{bind_script_once, plan_bound_script, plan_script, PlannerContext, PlannerPlugins};
    use crate::backend::SqlDialect;
    use crate::schema_catalog::SchemaCatalog;
    use crate::sql::plan::{PlanEffect, PlanRequirement};
    use crate::{LixErrorCode, Value};

    fn test_ctx() -> PlannerContext {
        PlannerContext {
            active_version_id: "main".to_string(),
            catalog: Arc::new(SchemaCatalog::with_builtin_schemas()),
            dialect: SqlDialect::Sqlite,
            access_to_internal: false,
        }
    }

    #[test]
    fn planning_is_deterministic_across_runs() {
        let ctx = test_ctx();
        let plugins = PlannerPlugins::default();
        let sql = "SELECT snapshot_content FROM lix_state WHERE entity_id = ?";
        let params = vec![Value::Text("/theme".to_string())];

        let first = plan_script(sql, &params, &ctx, &plugins).expect("plan");
        let second = plan_script(sql, &params, &ctx, &plugins).expect("plan");
        assert_eq!(first.fingerprint, second.fingerprint);
    }

    #[test]
    fn different_params_produce_different_fingerprints() {
        let ctx = test_ctx();
        let plugins = PlannerPlugins::default();
        let sql = "SELECT snapshot_content FROM lix_state WHERE entity_id = ?";

        let first = plan_script(sql, &[Value::Text("/a".to_string())], &ctx, &plugins)
            .expect("plan");
        let second = plan_script(sql, &[Value::Text("/b".to_string())], &ctx, &plugins)
            .expect("plan");
        assert_ne!(first.fingerprint, second.fingerprint);
    }

    #[test]
    fn rebinding_a_bound_script_is_a_hard_error() {
        let ctx = test_ctx();
        let plugins = PlannerPlugins::default();
        let bound = bind_script_once(
            "SELECT key FROM lix_key_value WHERE key = ?",
            &[Value::Text("a".to_string())],
            SqlDialect::Sqlite,
        )
        .expect("bind");

        let err = plan_bound_script(bound, &[Value::Text("b".to_string())], &ctx, &plugins)
            .expect_err("rebinding should fail");
        assert_eq!(err.code, LixErrorCode::Binding);
        assert!(err.message.contains("already bound"));
    }

    #[test]
    fn internal_table_references_fail_before_planning() {
        let ctx = test_ctx();
        let plugins = PlannerPlugins::default();
        let err = plan_script("SELECT * FROM lix_internal_change", &[], &ctx, &plugins)
            .expect_err("internal access should fail");
        assert_eq!(err.code, LixErrorCode::PrivateTableAccess);
    }

    #[test]
    fn write_plans_carry_requirements_and_effects() {
        let ctx = test_ctx();
        let plugins = PlannerPlugins {
            matchers: vec![("plugin_json".to_string(), "*.json".to_string())],
        };
        let plan = plan_script(
            "INSERT INTO lix_file (id, path, data) VALUES ('f', '/s.json', x'7b7d')",
            &[],
            &ctx,
            &plugins,
        )
        .expect("plan");

        assert!(plan
            .requirements
            .contains(&PlanRequirement::NeedPlugin("plugin_json".to_string())));
        assert!(plan.effects.contains(&PlanEffect::RecordChanges));
        assert!(plan.effects.contains(&PlanEffect::RefreshFileData));
        assert!(plan.effects.contains(&PlanEffect::NotifyObservers));
    }

    #[test]
    fn stored_schema_insert_registers_schema_effect() {
        let ctx = test_ctx();
        let plugins = PlannerPlugins::default();
        let schema = serde_json::json!({
            "x-lix-key": "demo_note",
            "x-lix-version": "1",
            "x-lix-primary-key": ["/id"],
            "type": "object",
            "properties": { "id": {"type": "string"}, "body": {"type": "string"} }
        })
        .to_string();
        let plan = plan_script(
            "INSERT INTO lix_stored_schema (key, version, value) VALUES ('demo_note', '1', ?)",
            &[Value::Text(schema)],
            &ctx,
            &plugins,
        )
        .expect("plan");

        assert!(plan
            .effects
            .iter()
            .any(|effect| matches!(effect, PlanEffect::RegisterSchema(key) if key == "demo_note~1")));
    }
}
