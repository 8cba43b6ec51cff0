use crate::sql::execution::conn::SqlConn;
use crate::sql::execution::postprocess::record_commit_ancestry;
use crate::{LixError, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCheckpointResult {
    pub id: String,
    pub change_set_id: String,
}

/// Seals the active version's working commit: it becomes a real commit whose
/// change set is everything recorded since the last checkpoint, parented on
/// the current tip. A fresh working commit / change-set pair is allocated.
pub(crate) async fn create_checkpoint_in_conn(
    conn: &mut SqlConn<'_>,
    version_id: &str,
    now: &str,
    generate_uuid: &mut dyn FnMut() -> String,
) -> Result<CreateCheckpointResult, LixError> {
    let result = conn
        .execute(
            "SELECT commit_id, working_commit_id, working_change_set_id \
             FROM lix_internal_version WHERE id = $1",
            &[Value::Text(version_id.to_string())],
        )
        .await?;
    let Some(row) = result.rows.first() else {
        return Err(LixError::planner(format!(
            "unknown version '{version_id}'"
        )));
    };
    let tip_commit_id = row_text(row, 0, "commit_id")?;
    let working_commit_id = row_text(row, 1, "working_commit_id")?;
    let working_change_set_id = row_text(row, 2, "working_change_set_id")?;

    conn.execute(
        "INSERT INTO lix_internal_commit (id, version_id, change_set_id, author_ref, created_at) \
         VALUES ($1, $2, $3, NULL, $4)",
        &[
            Value::Text(working_commit_id.clone()),
            Value::Text(version_id.to_string()),
            Value::Text(working_change_set_id.clone()),
            Value::Text(now.to_string()),
        ],
    )
    .await?;
    record_commit_ancestry(conn, &working_commit_id, Some(&tip_commit_id)).await?;

    conn.execute(
        "UPDATE lix_internal_version \
         SET commit_id = $1, working_commit_id = $2, working_change_set_id = $3 \
         WHERE id = $4",
        &[
            Value::Text(working_commit_id.clone()),
            Value::Text(generate_uuid()),
            Value::Text(generate_uuid()),
            Value::Text(version_id.to_string()),
        ],
    )
    .await?;

    Ok(CreateCheckpointResult {
        id: working_commit_id,
        change_set_id: working_change_set_id,
    })
}

fn row_text(row: &[Value], index: usize, column: &str) -> Result<String, LixError> {
    match row.get(index) {
        Some(Value::Text(text)) => Ok(text.clone()),
        other => Err(LixError::invariant(format!(
            "version row column '{column}' must be text, got {other:?}"
        ))),
    }
}
