use std::ops::ControlFlow;

use sqlparser::ast::{visit_relations, ObjectName, ObjectNamePart, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::LixError;

pub(crate) const INTERNAL_TABLE_PREFIX: &str = "lix_internal_";

pub(crate) fn parse_sql_statements(sql: &str) -> Result<Vec<Statement>, LixError> {
    Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|error| LixError::parse(format!("failed to parse SQL: {error}")))
}

/// Guardrail: user SQL must not touch `lix_internal_*` relations anywhere,
/// including CTEs and subqueries. Lowered SQL is exempt because it never
/// passes through here.
pub(crate) fn reject_internal_table_access(statements: &[Statement]) -> Result<(), LixError> {
    for statement in statements {
        let mut offending: Option<String> = None;
        let _ = visit_relations(statement, |relation: &ObjectName| {
            if let Some(name) = object_name_terminal(relation) {
                if name.to_ascii_lowercase().starts_with(INTERNAL_TABLE_PREFIX) {
                    offending = Some(name);
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::<()>::Continue(())
        });
        if let Some(name) = offending {
            return Err(LixError::private_table_access(format!(
                "queries against '{name}' are not allowed; lix_internal_* tables are private"
            )));
        }
    }
    Ok(())
}

pub(crate) fn object_name_terminal(name: &ObjectName) -> Option<String> {
    name.0
        .last()
        .and_then(ObjectNamePart::as_ident)
        .map(|ident| ident.value.clone())
}

pub(crate) fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}

pub(crate) fn quote_ident(value: &str) -> String {
    let escaped = value.replace('"', "\"\"");
    format!("\"{escaped}\"")
}
