use std::collections::{BTreeMap, BTreeSet};

use crate::sql::plan::MutationRow;
use crate::LixError;

use super::types::{
    ChangeRow, ChangeSetElementRow, CommitRow, GenerateCommitArgs, GenerateCommitResult,
    MaterializedUpsert, SnapshotRow, VersionTipUpdate,
};

pub(crate) const NO_CONTENT_SNAPSHOT_ID: &str = "no-content";

pub(crate) fn snapshot_content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// `change.id = H(entity_id, schema_key, schema_version, file_id, plugin_key,
/// snapshot_id)`. Identical logical changes share one change row; the commit
/// graph links them into each commit that records them.
pub(crate) fn change_content_hash(
    entity_id: &str,
    schema_key: &str,
    schema_version: &str,
    file_id: &str,
    plugin_key: &str,
    snapshot_id: &str,
) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [
        entity_id,
        schema_key,
        schema_version,
        file_id,
        plugin_key,
        snapshot_id,
    ] {
        hasher.update(part.as_bytes());
        hasher.update(&[0x1f]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Pure commit formation: turns the transaction's mutation rows into
/// content-addressed snapshot/change rows, one commit per affected version
/// (parented on that version's tip), change-set memberships for both the
/// commit's own set and the version's working set, tip advances, and
/// materialized-state upserts.
pub(crate) fn generate_commit<F>(
    args: GenerateCommitArgs,
    mut generate_uuid: F,
) -> Result<GenerateCommitResult, LixError>
where
    F: FnMut() -> String,
{
    if args.mutations.is_empty() {
        return Ok(GenerateCommitResult::default());
    }

    // Last write per (entity, schema, file, version) wins within one commit.
    let mut latest_by_key: BTreeMap<(String, String, String, String), usize> = BTreeMap::new();
    for (index, mutation) in args.mutations.iter().enumerate() {
        let key = (
            mutation.entity_id.clone(),
            mutation.schema_key.clone(),
            mutation.file_id.clone(),
            mutation.version_id.clone(),
        );
        latest_by_key.insert(key, index);
    }
    let mut ordered_indexes: Vec<usize> = latest_by_key.into_values().collect();
    ordered_indexes.sort_unstable();
    let mutations: Vec<&MutationRow> = ordered_indexes
        .into_iter()
        .filter_map(|index| args.mutations.get(index))
        .collect();

    let mut result = GenerateCommitResult::default();
    let mut snapshot_ids = BTreeSet::new();
    let mut change_ids = BTreeSet::new();

    let mut meta_by_version: BTreeMap<String, (String, String)> = BTreeMap::new();
    let affected_versions: BTreeSet<String> = mutations
        .iter()
        .map(|mutation| mutation.version_id.clone())
        .collect();
    for version_id in &affected_versions {
        let context = args.versions.get(version_id).ok_or_else(|| {
            LixError::invariant(format!(
                "generate_commit: missing version context for '{version_id}'"
            ))
        })?;
        let commit_id = generate_uuid();
        let change_set_id = generate_uuid();
        result.commits.push(CommitRow {
            id: commit_id.clone(),
            version_id: version_id.clone(),
            change_set_id: change_set_id.clone(),
            parent_commit_id: Some(context.tip_commit_id.clone()),
            author_ref: args.author_ref.clone(),
            created_at: args.timestamp.clone(),
        });
        result.version_tips.push(VersionTipUpdate {
            version_id: version_id.clone(),
            commit_id: commit_id.clone(),
        });
        meta_by_version.insert(version_id.clone(), (commit_id, change_set_id));
    }

    for mutation in mutations {
        let (snapshot_id, content) = match &mutation.snapshot_content {
            Some(content) => {
                let serialized = content.to_string();
                (snapshot_content_hash(&serialized), Some(serialized))
            }
            None => (NO_CONTENT_SNAPSHOT_ID.to_string(), None),
        };
        if snapshot_id != NO_CONTENT_SNAPSHOT_ID && snapshot_ids.insert(snapshot_id.clone()) {
            result.snapshots.push(SnapshotRow {
                id: snapshot_id.clone(),
                content,
            });
        }

        let change_id = change_content_hash(
            &mutation.entity_id,
            &mutation.schema_key,
            &mutation.schema_version,
            &mutation.file_id,
            &mutation.plugin_key,
            &snapshot_id,
        );
        let metadata = mutation.metadata.as_ref().map(ToString::to_string);
        if change_ids.insert(change_id.clone()) {
            result.changes.push(ChangeRow {
                id: change_id.clone(),
                entity_id: mutation.entity_id.clone(),
                schema_key: mutation.schema_key.clone(),
                schema_version: mutation.schema_version.clone(),
                file_id: mutation.file_id.clone(),
                plugin_key: mutation.plugin_key.clone(),
                snapshot_id: snapshot_id.clone(),
                metadata: metadata.clone(),
                writer_key: args.writer_key.clone(),
                created_at: args.timestamp.clone(),
            });
        }

        let (commit_id, change_set_id) = meta_by_version
            .get(&mutation.version_id)
            .cloned()
            .ok_or_else(|| {
                LixError::invariant(format!(
                    "generate_commit: missing commit meta for version '{}'",
                    mutation.version_id
                ))
            })?;
        result.change_set_elements.push(ChangeSetElementRow {
            change_set_id,
            change_id: change_id.clone(),
        });

        let working_change_set_id = args
            .versions
            .get(&mutation.version_id)
            .map(|context| context.working_change_set_id.clone())
            .ok_or_else(|| {
                LixError::invariant(format!(
                    "generate_commit: missing version context for '{}'",
                    mutation.version_id
                ))
            })?;
        result.change_set_elements.push(ChangeSetElementRow {
            change_set_id: working_change_set_id,
            change_id: change_id.clone(),
        });

        result.materialized.push(MaterializedUpsert {
            entity_id: mutation.entity_id.clone(),
            schema_key: mutation.schema_key.clone(),
            schema_version: mutation.schema_version.clone(),
            file_id: mutation.file_id.clone(),
            version_id: mutation.version_id.clone(),
            plugin_key: mutation.plugin_key.clone(),
            snapshot_content: mutation.snapshot_content.as_ref().map(ToString::to_string),
            metadata,
            writer_key: args.writer_key.clone(),
            change_id,
            commit_id,
            is_tombstone: mutation.snapshot_content.is_none(),
            timestamp: args.timestamp.clone(),
        });
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::{change_content_hash, generate_commit, NO_CONTENT_SNAPSHOT_ID};
    use crate::commit::types::{GenerateCommitArgs, VersionContext};
    use crate::sql::plan::{MutationOperation, MutationRow};

    fn mutation(entity_id: &str, snapshot: Option<serde_json::Value>) -> MutationRow {
        MutationRow {
            operation: if snapshot.is_some() {
                MutationOperation::Insert
            } else {
                MutationOperation::Delete
            },
            entity_id: entity_id.to_string(),
            schema_key: "lix_key_value".to_string(),
            schema_version: "1".to_string(),
            file_id: "lix".to_string(),
            version_id: "main".to_string(),
            plugin_key: "lix".to_string(),
            snapshot_content: snapshot,
            metadata: None,
        }
    }

    fn versions() -> BTreeMap<String, VersionContext> {
        let mut versions = BTreeMap::new();
        versions.insert(
            "main".to_string(),
            VersionContext {
                version_id: "main".to_string(),
                tip_commit_id: "tip-0".to_string(),
                working_commit_id: "working-0".to_string(),
                working_change_set_id: "working-cs-0".to_string(),
            },
        );
        versions
    }

    fn args(mutations: Vec<MutationRow>) -> GenerateCommitArgs {
        GenerateCommitArgs {
            timestamp: "2026-01-01T00:00:00.000Z".to_string(),
            writer_key: Some("w1".to_string()),
            author_ref: None,
            mutations,
            versions: versions(),
        }
    }

    fn uuid_sequence() -> impl FnMut() -> String {
        let mut counter = 0usize;
        move || {
            counter += 1;
            format!("uuid-{counter}")
        }
    }

    #[test]
    fn forms_one_commit_per_affected_version_and_advances_the_tip() {
        let result = generate_commit(
            args(vec![mutation("a", Some(json!({"key": "a", "value": 1})))]),
            uuid_sequence(),
        )
        .expect("generate commit");

        assert_eq!(result.commits.len(), 1);
        assert_eq!(result.commits[0].parent_commit_id.as_deref(), Some("tip-0"));
        assert_eq!(result.version_tips.len(), 1);
        assert_eq!(result.version_tips[0].commit_id, result.commits[0].id);
    }

    #[test]
    fn change_ids_are_content_addressed() {
        let result = generate_commit(
            args(vec![mutation("a", Some(json!({"key": "a", "value": 1})))]),
            uuid_sequence(),
        )
        .expect("generate commit");

        let change = &result.changes[0];
        let expected = change_content_hash(
            "a",
            "lix_key_value",
            "1",
            "lix",
            "lix",
            &result.snapshots[0].id,
        );
        assert_eq!(change.id, expected);
        assert_eq!(change.writer_key.as_deref(), Some("w1"));
    }

    #[test]
    fn tombstones_use_the_no_content_snapshot() {
        let result =
            generate_commit(args(vec![mutation("a", None)]), uuid_sequence()).expect("commit");
        assert!(result.snapshots.is_empty());
        assert_eq!(result.changes[0].snapshot_id, NO_CONTENT_SNAPSHOT_ID);
        assert!(result.materialized[0].is_tombstone);
    }

    #[test]
    fn identical_snapshots_are_deduplicated() {
        let result = generate_commit(
            args(vec![
                mutation("a", Some(json!({"key": "a"}))),
                mutation("b", Some(json!({"key": "a"}))),
            ]),
            uuid_sequence(),
        )
        .expect("commit");
        assert_eq!(result.snapshots.len(), 1);
        assert_eq!(result.changes.len(), 2);
    }

    #[test]
    fn last_write_per_entity_wins_within_one_commit() {
        let result = generate_commit(
            args(vec![
                mutation("a", Some(json!({"key": "a", "value": 1}))),
                mutation("a", Some(json!({"key": "a", "value": 2}))),
            ]),
            uuid_sequence(),
        )
        .expect("commit");
        assert_eq!(result.changes.len(), 1);
        assert!(result.changes[0].id.len() == 64);
        assert_eq!(
            result.materialized[0].snapshot_content.as_deref(),
            Some(json!({"key": "a", "value": 2}).to_string().as_str())
        );
    }

    #[test]
    fn change_set_elements_cover_commit_and_working_sets() {
        let result = generate_commit(
            args(vec![mutation("a", Some(json!({"key": "a"})))]),
            uuid_sequence(),
        )
        .expect("commit");
        let sets: Vec<&str> = result
            .change_set_elements
            .iter()
            .map(|element| element.change_set_id.as_str())
            .collect();
        assert!(sets.contains(&result.commits[0].change_set_id.as_str()));
        assert!(sets.contains(&"working-cs-0"));
    }

    #[test]
    fn missing_version_context_is_an_invariant_error() {
        let mut bad = args(vec![mutation("a", Some(json!({"key": "a"})))]);
        bad.versions.clear();
        let err = generate_commit(bad, uuid_sequence()).expect_err("should fail");
        assert!(err.message.contains("missing version context"));
    }
}
