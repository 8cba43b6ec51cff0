use std::collections::{BTreeMap, BTreeSet};

use crate::commit::{GenerateCommitResult, VersionContext};
use crate::{LixError, Value};

use super::conn::SqlConn;

/// Reads the per-version pointers a commit needs, inside the transaction.
pub(crate) async fn load_version_contexts(
    conn: &mut SqlConn<'_>,
    version_ids: &BTreeSet<String>,
) -> Result<BTreeMap<String, VersionContext>, LixError> {
    let mut contexts = BTreeMap::new();
    for version_id in version_ids {
        let result = conn
            .execute(
                "SELECT commit_id, working_commit_id, working_change_set_id \
                 FROM lix_internal_version WHERE id = $1",
                &[Value::Text(version_id.clone())],
            )
            .await?;
        let Some(row) = result.rows.first() else {
            return Err(LixError::planner(format!(
                "unknown version '{version_id}'"
            )));
        };
        contexts.insert(
            version_id.clone(),
            VersionContext {
                version_id: version_id.clone(),
                tip_commit_id: row_text(row, 0, "commit_id")?,
                working_commit_id: row_text(row, 1, "working_commit_id")?,
                working_change_set_id: row_text(row, 2, "working_change_set_id")?,
            },
        );
    }
    Ok(contexts)
}

/// Applies a generated commit to the change store: snapshots and changes are
/// write-once (`ON CONFLICT DO NOTHING`), the ancestry closure extends the
/// parent's rows, tips advance, materialized state upserts.
pub(crate) async fn apply_commit(
    conn: &mut SqlConn<'_>,
    result: &GenerateCommitResult,
) -> Result<(), LixError> {
    for snapshot in &result.snapshots {
        conn.execute(
            "INSERT INTO lix_internal_snapshot (id, content) VALUES ($1, $2) \
             ON CONFLICT (id) DO NOTHING",
            &[
                Value::Text(snapshot.id.clone()),
                match &snapshot.content {
                    Some(content) => Value::Text(content.clone()),
                    None => Value::Null,
                },
            ],
        )
        .await?;
    }

    for change in &result.changes {
        conn.execute(
            "INSERT INTO lix_internal_change \
             (id, entity_id, schema_key, schema_version, file_id, plugin_key, snapshot_id, \
              metadata, writer_key, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (id) DO NOTHING",
            &[
                Value::Text(change.id.clone()),
                Value::Text(change.entity_id.clone()),
                Value::Text(change.schema_key.clone()),
                Value::Text(change.schema_version.clone()),
                Value::Text(change.file_id.clone()),
                Value::Text(change.plugin_key.clone()),
                Value::Text(change.snapshot_id.clone()),
                optional_text(&change.metadata),
                optional_text(&change.writer_key),
                Value::Text(change.created_at.clone()),
            ],
        )
        .await?;
    }

    for commit in &result.commits {
        conn.execute(
            "INSERT INTO lix_internal_commit \
             (id, version_id, change_set_id, author_ref, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
            &[
                Value::Text(commit.id.clone()),
                Value::Text(commit.version_id.clone()),
                Value::Text(commit.change_set_id.clone()),
                optional_text(&commit.author_ref),
                Value::Text(commit.created_at.clone()),
            ],
        )
        .await?;

        record_commit_ancestry(conn, &commit.id, commit.parent_commit_id.as_deref()).await?;
    }

    for element in &result.change_set_elements {
        conn.execute(
            "INSERT INTO lix_internal_change_set_element (change_set_id, change_id) \
             VALUES ($1, $2) ON CONFLICT (change_set_id, change_id) DO NOTHING",
            &[
                Value::Text(element.change_set_id.clone()),
                Value::Text(element.change_id.clone()),
            ],
        )
        .await?;
    }

    for tip in &result.version_tips {
        conn.execute(
            "UPDATE lix_internal_version SET commit_id = $1 WHERE id = $2",
            &[
                Value::Text(tip.commit_id.clone()),
                Value::Text(tip.version_id.clone()),
            ],
        )
        .await?;
    }

    for upsert in &result.materialized {
        conn.execute(
            "INSERT INTO lix_internal_state_materialized \
             (entity_id, schema_key, schema_version, file_id, version_id, plugin_key, \
              snapshot_content, metadata, writer_key, change_id, commit_id, is_tombstone, \
              created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13) \
             ON CONFLICT (entity_id, schema_key, file_id, version_id) DO UPDATE SET \
               schema_version = excluded.schema_version, \
               plugin_key = excluded.plugin_key, \
               snapshot_content = excluded.snapshot_content, \
               metadata = excluded.metadata, \
               writer_key = excluded.writer_key, \
               change_id = excluded.change_id, \
               commit_id = excluded.commit_id, \
               is_tombstone = excluded.is_tombstone, \
               updated_at = excluded.updated_at",
            &[
                Value::Text(upsert.entity_id.clone()),
                Value::Text(upsert.schema_key.clone()),
                Value::Text(upsert.schema_version.clone()),
                Value::Text(upsert.file_id.clone()),
                Value::Text(upsert.version_id.clone()),
                Value::Text(upsert.plugin_key.clone()),
                optional_text(&upsert.snapshot_content),
                optional_text(&upsert.metadata),
                optional_text(&upsert.writer_key),
                Value::Text(upsert.change_id.clone()),
                Value::Text(upsert.commit_id.clone()),
                Value::Integer(i64::from(upsert.is_tombstone)),
                Value::Text(upsert.timestamp.clone()),
            ],
        )
        .await?;
    }

    Ok(())
}

/// Inserts the self edge plus the parent's closure shifted by one. Commits
/// are immutable after this point, so the closure never needs maintenance.
pub(crate) async fn record_commit_ancestry(
    conn: &mut SqlConn<'_>,
    commit_id: &str,
    parent_commit_id: Option<&str>,
) -> Result<(), LixError> {
    conn.execute(
        "INSERT INTO lix_internal_commit_ancestry (commit_id, ancestor_id, depth) \
         VALUES ($1, $1, 0) ON CONFLICT (commit_id, ancestor_id) DO NOTHING",
        &[Value::Text(commit_id.to_string())],
    )
    .await?;

    if let Some(parent_commit_id) = parent_commit_id {
        conn.execute(
            "INSERT INTO lix_internal_commit_parent (commit_id, parent_commit_id) \
             VALUES ($1, $2) ON CONFLICT (commit_id, parent_commit_id) DO NOTHING",
            &[
                Value::Text(commit_id.to_string()),
                Value::Text(parent_commit_id.to_string()),
            ],
        )
        .await?;
        conn.execute(
            "INSERT INTO lix_internal_commit_ancestry (commit_id, ancestor_id, depth) \
             SELECT $1, ancestor_id, depth + 1 FROM lix_internal_commit_ancestry \
             WHERE commit_id = $2 \
             ON CONFLICT (commit_id, ancestor_id) DO NOTHING",
            &[
                Value::Text(commit_id.to_string()),
                Value::Text(parent_commit_id.to_string()),
            ],
        )
        .await?;
    }

    Ok(())
}

fn optional_text(value: &Option<String>) -> Value {
    match value {
        Some(text) => Value::Text(text.clone()),
        None => Value::Null,
    }
}

fn row_text(row: &[Value], index: usize, column: &str) -> Result<String, LixError> {
    match row.get(index) {
        Some(Value::Text(text)) => Ok(text.clone()),
        other => Err(LixError::invariant(format!(
            "version row column '{column}' must be text, got {other:?}"
        ))),
    }
}
