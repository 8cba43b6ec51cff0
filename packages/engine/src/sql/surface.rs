use crate::schema_catalog::SchemaCatalog;
use crate::LixError;

/// Scope variant of a logical view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ViewScope {
    /// Resolved against the active version.
    Active,
    /// Per-version rows, including inherited ones.
    ByVersion,
    /// Time-scoped rows along the commit ancestry.
    History,
}

/// A logical surface with its own lowering rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Surface {
    State,
    StateByVersion,
    StateHistory,
    StateWithTombstones,
    File { scope: ViewScope },
    EntityView { schema_key: String, scope: ViewScope },
    Version,
    ActiveVersion,
    Commit,
    Change,
}

/// Classifies a relation name against the registered surfaces. Returns
/// `Ok(None)` for tables the engine passes through untouched, and an error
/// for `lix_`-prefixed names with no registered schema.
pub(crate) fn classify_relation(
    table_name: &str,
    catalog: &SchemaCatalog,
) -> Result<Option<Surface>, LixError> {
    let normalized = table_name.to_ascii_lowercase();

    // Physical tables: lowered SQL targets them directly, and sessions booted
    // with internal access may too. User SQL was already screened.
    if normalized.starts_with("lix_internal_") {
        return Ok(None);
    }

    let surface = match normalized.as_str() {
        "lix_state" => Some(Surface::State),
        "lix_state_by_version" => Some(Surface::StateByVersion),
        "lix_state_history" => Some(Surface::StateHistory),
        "lix_state_with_tombstones" => Some(Surface::StateWithTombstones),
        "lix_file" => Some(Surface::File {
            scope: ViewScope::Active,
        }),
        "lix_file_by_version" => Some(Surface::File {
            scope: ViewScope::ByVersion,
        }),
        "lix_file_history" => Some(Surface::File {
            scope: ViewScope::History,
        }),
        "lix_version" => Some(Surface::Version),
        "lix_active_version" => Some(Surface::ActiveVersion),
        "lix_commit" => Some(Surface::Commit),
        "lix_change" => Some(Surface::Change),
        _ => None,
    };
    if surface.is_some() {
        return Ok(surface);
    }

    if !normalized.starts_with("lix_") {
        return Ok(None);
    }

    let (base, scope) = split_view_scope(&normalized);
    if catalog.get(base).is_some() {
        return Ok(Some(Surface::EntityView {
            schema_key: base.to_string(),
            scope,
        }));
    }

    Err(LixError::planner(format!(
        "unknown table '{table_name}': no schema registered for '{base}'"
    )))
}

fn split_view_scope(normalized: &str) -> (&str, ViewScope) {
    if let Some(base) = normalized.strip_suffix("_by_version") {
        if !base.is_empty() {
            return (base, ViewScope::ByVersion);
        }
    }
    if let Some(base) = normalized.strip_suffix("_history") {
        if !base.is_empty() {
            return (base, ViewScope::History);
        }
    }
    (normalized, ViewScope::Active)
}

#[cfg(test)]
mod tests {
    use super::{classify_relation, Surface, ViewScope};
    use crate::schema_catalog::SchemaCatalog;
    use crate::LixErrorCode;

    #[test]
    fn classifies_state_and_file_surfaces() {
        let catalog = SchemaCatalog::with_builtin_schemas();
        assert_eq!(
            classify_relation("lix_state", &catalog).expect("classify"),
            Some(Surface::State)
        );
        assert_eq!(
            classify_relation("LIX_STATE_HISTORY", &catalog).expect("classify"),
            Some(Surface::StateHistory)
        );
        assert_eq!(
            classify_relation("lix_file_by_version", &catalog).expect("classify"),
            Some(Surface::File {
                scope: ViewScope::ByVersion
            })
        );
    }

    #[test]
    fn classifies_registered_entity_views_with_scopes() {
        let catalog = SchemaCatalog::with_builtin_schemas();
        assert_eq!(
            classify_relation("lix_key_value", &catalog).expect("classify"),
            Some(Surface::EntityView {
                schema_key: "lix_key_value".to_string(),
                scope: ViewScope::Active
            })
        );
        assert_eq!(
            classify_relation("lix_key_value_history", &catalog).expect("classify"),
            Some(Surface::EntityView {
                schema_key: "lix_key_value".to_string(),
                scope: ViewScope::History
            })
        );
    }

    #[test]
    fn unknown_lix_tables_are_planner_errors() {
        let catalog = SchemaCatalog::with_builtin_schemas();
        let err = classify_relation("lix_nonexistent", &catalog).expect_err("should fail");
        assert_eq!(err.code, LixErrorCode::Planner);
    }

    #[test]
    fn foreign_tables_pass_through() {
        let catalog = SchemaCatalog::with_builtin_schemas();
        assert_eq!(classify_relation("users", &catalog).expect("classify"), None);
    }
}
