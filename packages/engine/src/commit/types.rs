use std::collections::BTreeMap;

use crate::sql::plan::MutationRow;

/// Per-version pointers read inside the write transaction before a commit is
/// generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionContext {
    pub version_id: String,
    pub tip_commit_id: String,
    pub working_commit_id: String,
    pub working_change_set_id: String,
}

#[derive(Debug, Clone)]
pub(crate) struct GenerateCommitArgs {
    pub(crate) timestamp: String,
    pub(crate) writer_key: Option<String>,
    pub(crate) author_ref: Option<String>,
    pub(crate) mutations: Vec<MutationRow>,
    pub(crate) versions: BTreeMap<String, VersionContext>,
}

/// Content-addressed snapshot row; `content` is `None` for the shared
/// `no-content` tombstone sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRow {
    pub id: String,
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRow {
    pub id: String,
    pub entity_id: String,
    pub schema_key: String,
    pub schema_version: String,
    pub file_id: String,
    pub plugin_key: String,
    pub snapshot_id: String,
    pub metadata: Option<String>,
    pub writer_key: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRow {
    pub id: String,
    pub version_id: String,
    pub change_set_id: String,
    pub parent_commit_id: Option<String>,
    pub author_ref: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetElementRow {
    pub change_set_id: String,
    pub change_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTipUpdate {
    pub version_id: String,
    pub commit_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedUpsert {
    pub entity_id: String,
    pub schema_key: String,
    pub schema_version: String,
    pub file_id: String,
    pub version_id: String,
    pub plugin_key: String,
    pub snapshot_content: Option<String>,
    pub metadata: Option<String>,
    pub writer_key: Option<String>,
    pub change_id: String,
    pub commit_id: String,
    pub is_tombstone: bool,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateCommitResult {
    pub snapshots: Vec<SnapshotRow>,
    pub changes: Vec<ChangeRow>,
    pub commits: Vec<CommitRow>,
    pub change_set_elements: Vec<ChangeSetElementRow>,
    pub version_tips: Vec<VersionTipUpdate>,
    pub materialized: Vec<MaterializedUpsert>,
}
