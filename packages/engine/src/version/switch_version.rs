use crate::{LixBackend, LixError, Value};

/// Repoints the singleton active-version pointer. The caller updates its own
/// cached active version id after this succeeds.
pub(crate) async fn switch_version_in_backend(
    backend: &dyn LixBackend,
    version_id: &str,
) -> Result<(), LixError> {
    let exists = backend
        .execute(
            "SELECT 1 FROM lix_internal_version WHERE id = $1",
            &[Value::Text(version_id.to_string())],
        )
        .await?;
    if exists.rows.is_empty() {
        return Err(LixError::planner(format!(
            "unknown version '{version_id}'"
        )));
    }

    backend
        .execute(
            "UPDATE lix_internal_active_version SET version_id = $1 WHERE id = 1",
            &[Value::Text(version_id.to_string())],
        )
        .await?;
    Ok(())
}
