use std::fmt::Write as _;

use serde_json::Value as JsonValue;

use crate::Value;

/// One entity-level delta produced by write lowering. Postprocess turns these
/// into change / commit rows and materialized-state upserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MutationOperation {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MutationRow {
    pub(crate) operation: MutationOperation,
    pub(crate) entity_id: String,
    pub(crate) schema_key: String,
    pub(crate) schema_version: String,
    pub(crate) file_id: String,
    pub(crate) version_id: String,
    pub(crate) plugin_key: String,
    pub(crate) snapshot_content: Option<JsonValue>,
    pub(crate) metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlanRequirement {
    NeedActiveVersion,
    NeedPlugin(String),
    NeedSchema { key: String, version: String },
    NeedFileData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlanEffect {
    RecordChanges,
    RefreshFileData,
    SwitchActiveVersion(String),
    RegisterSchema(String),
    NotifyObservers,
}

/// Snapshot column assignments of an entity-view or state UPDATE.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SnapshotAssignments {
    /// Per-property patches (entity views).
    pub(crate) properties: Vec<(String, JsonValue)>,
    /// Whole-snapshot replacement (`snapshot_content = …`).
    pub(crate) snapshot_content: Option<JsonValue>,
    pub(crate) metadata: Option<Option<JsonValue>>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EntityInsertRow {
    pub(crate) schema_key: String,
    pub(crate) schema_version: String,
    pub(crate) entity_id: String,
    pub(crate) file_id: String,
    pub(crate) version_id: String,
    pub(crate) plugin_key: String,
    pub(crate) snapshot_content: JsonValue,
    pub(crate) metadata: Option<JsonValue>,
}

/// A `SELECT` run inside the write transaction whose rows identify the
/// entities a mutation targets.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScopeQuery {
    pub(crate) sql: String,
    pub(crate) params: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EntityUpdatePlan {
    pub(crate) scope: ScopeQuery,
    pub(crate) assignments: SnapshotAssignments,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EntityDeletePlan {
    pub(crate) scope: ScopeQuery,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FileInsertRow {
    pub(crate) id: Option<String>,
    pub(crate) path: String,
    pub(crate) data: Vec<u8>,
    pub(crate) directory_id: Option<String>,
    pub(crate) hidden: bool,
    pub(crate) metadata: Option<JsonValue>,
    pub(crate) version_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FileUpdatePlan {
    pub(crate) scope: ScopeQuery,
    pub(crate) path: Option<String>,
    pub(crate) data: Option<Vec<u8>>,
    pub(crate) hidden: Option<bool>,
    pub(crate) metadata: Option<Option<JsonValue>>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FileDeletePlan {
    pub(crate) scope: ScopeQuery,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CreateVersionPlan {
    pub(crate) id: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) inherits_from_version_id: Option<String>,
    pub(crate) hidden: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WritePlan {
    EntityInsert { rows: Vec<EntityInsertRow> },
    EntityUpdate(EntityUpdatePlan),
    EntityDelete(EntityDeletePlan),
    FileInsert { rows: Vec<FileInsertRow> },
    FileUpdate(FileUpdatePlan),
    FileDelete(FileDeletePlan),
    CreateVersion(CreateVersionPlan),
    SwitchActiveVersion { version_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PlannedStatement {
    /// Fully lowered read (or passthrough) SQL with dense parameters.
    Query { sql: String, params: Vec<Value> },
    Write(WritePlan),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExecutionPlan {
    pub(crate) statements: Vec<PlannedStatement>,
    pub(crate) requirements: Vec<PlanRequirement>,
    pub(crate) effects: Vec<PlanEffect>,
    pub(crate) fingerprint: String,
}

impl ExecutionPlan {
    pub(crate) fn has_writes(&self) -> bool {
        self.statements
            .iter()
            .any(|statement| matches!(statement, PlannedStatement::Write(_)))
    }

    pub(crate) fn requires_file_data(&self) -> bool {
        self.requirements
            .iter()
            .any(|requirement| matches!(requirement, PlanRequirement::NeedFileData))
    }
}

/// Stable hash of the normalized plan structure (P10). The rendering uses
/// ASCII separators so structurally different plans never collide on
/// concatenation.
pub(crate) fn plan_fingerprint(statements: &[PlannedStatement]) -> String {
    let mut serialized = String::new();

    for statement in statements {
        match statement {
            PlannedStatement::Query { sql, params } => {
                serialized.push_str("query:");
                serialized.push_str(sql);
                serialized.push('\u{1e}');
                for value in params {
                    let encoded = serde_json::to_string(value)
                        .expect("serializing plan params must succeed");
                    serialized.push_str(&encoded);
                    serialized.push('\u{1d}');
                }
            }
            PlannedStatement::Write(write) => {
                let _ = write!(serialized, "write:{write:?}");
            }
        }
        serialized.push('\u{1f}');
    }

    blake3::hash(serialized.as_bytes()).to_hex().to_string()
}
