use crate::commit::NO_CONTENT_SNAPSHOT_ID;
use crate::sql::execution::conn::SqlConn;
use crate::version::{GLOBAL_VERSION_ID, MAIN_VERSION_ID};
use crate::{LixBackend, LixError, SqlDialect, Value};

const INIT_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS lix_internal_snapshot (\
     id TEXT PRIMARY KEY,\
     content TEXT\
     )",
    "CREATE TABLE IF NOT EXISTS lix_internal_change (\
     id TEXT PRIMARY KEY,\
     entity_id TEXT NOT NULL,\
     schema_key TEXT NOT NULL,\
     schema_version TEXT NOT NULL,\
     file_id TEXT NOT NULL,\
     plugin_key TEXT NOT NULL,\
     snapshot_id TEXT NOT NULL,\
     metadata TEXT,\
     writer_key TEXT,\
     created_at TEXT NOT NULL\
     )",
    "CREATE INDEX IF NOT EXISTS idx_lix_internal_change_entity \
     ON lix_internal_change (entity_id, schema_key, file_id)",
    "CREATE TABLE IF NOT EXISTS lix_internal_commit (\
     id TEXT PRIMARY KEY,\
     version_id TEXT NOT NULL,\
     change_set_id TEXT NOT NULL,\
     author_ref TEXT,\
     created_at TEXT NOT NULL\
     )",
    "CREATE INDEX IF NOT EXISTS idx_lix_internal_commit_change_set \
     ON lix_internal_commit (change_set_id)",
    "CREATE TABLE IF NOT EXISTS lix_internal_commit_parent (\
     commit_id TEXT NOT NULL,\
     parent_commit_id TEXT NOT NULL,\
     PRIMARY KEY (commit_id, parent_commit_id)\
     )",
    "CREATE TABLE IF NOT EXISTS lix_internal_commit_ancestry (\
     commit_id TEXT NOT NULL,\
     ancestor_id TEXT NOT NULL,\
     depth BIGINT NOT NULL,\
     PRIMARY KEY (commit_id, ancestor_id)\
     )",
    "CREATE INDEX IF NOT EXISTS idx_lix_internal_commit_ancestry_commit_depth \
     ON lix_internal_commit_ancestry (commit_id, depth)",
    "CREATE INDEX IF NOT EXISTS idx_lix_internal_commit_ancestry_ancestor \
     ON lix_internal_commit_ancestry (ancestor_id)",
    "CREATE TABLE IF NOT EXISTS lix_internal_change_set_element (\
     change_set_id TEXT NOT NULL,\
     change_id TEXT NOT NULL,\
     PRIMARY KEY (change_set_id, change_id)\
     )",
    "CREATE TABLE IF NOT EXISTS lix_internal_version (\
     id TEXT PRIMARY KEY,\
     name TEXT NOT NULL,\
     inherits_from_version_id TEXT,\
     hidden INTEGER NOT NULL DEFAULT 0,\
     commit_id TEXT NOT NULL,\
     working_commit_id TEXT NOT NULL,\
     working_change_set_id TEXT NOT NULL,\
     created_at TEXT NOT NULL\
     )",
    "CREATE TABLE IF NOT EXISTS lix_internal_version_ancestry (\
     version_id TEXT NOT NULL,\
     ancestor_version_id TEXT NOT NULL,\
     inheritance_depth BIGINT NOT NULL,\
     PRIMARY KEY (version_id, ancestor_version_id)\
     )",
    "CREATE INDEX IF NOT EXISTS idx_lix_internal_version_ancestry_version_depth \
     ON lix_internal_version_ancestry (version_id, inheritance_depth)",
    "CREATE TABLE IF NOT EXISTS lix_internal_active_version (\
     id INTEGER PRIMARY KEY,\
     version_id TEXT NOT NULL\
     )",
    "CREATE TABLE IF NOT EXISTS lix_internal_state_materialized (\
     entity_id TEXT NOT NULL,\
     schema_key TEXT NOT NULL,\
     schema_version TEXT NOT NULL,\
     file_id TEXT NOT NULL,\
     version_id TEXT NOT NULL,\
     plugin_key TEXT NOT NULL,\
     snapshot_content TEXT,\
     metadata TEXT,\
     writer_key TEXT,\
     change_id TEXT NOT NULL,\
     commit_id TEXT NOT NULL,\
     is_tombstone INTEGER NOT NULL DEFAULT 0,\
     created_at TEXT NOT NULL,\
     updated_at TEXT NOT NULL,\
     PRIMARY KEY (entity_id, schema_key, file_id, version_id)\
     )",
    "CREATE INDEX IF NOT EXISTS idx_lix_internal_state_materialized_version \
     ON lix_internal_state_materialized (version_id)",
    "CREATE INDEX IF NOT EXISTS idx_lix_internal_state_materialized_vfs \
     ON lix_internal_state_materialized (version_id, file_id, schema_key, entity_id)",
    "CREATE INDEX IF NOT EXISTS idx_lix_internal_state_materialized_schema \
     ON lix_internal_state_materialized (schema_key, version_id)",
    "CREATE TABLE IF NOT EXISTS lix_internal_stored_schema (\
     schema_key TEXT NOT NULL,\
     schema_version TEXT NOT NULL,\
     definition TEXT NOT NULL,\
     created_at TEXT NOT NULL,\
     PRIMARY KEY (schema_key, schema_version)\
     )",
    "CREATE TABLE IF NOT EXISTS lix_internal_plugin (\
     key TEXT PRIMARY KEY,\
     runtime TEXT NOT NULL,\
     api_version TEXT NOT NULL,\
     match_path_glob TEXT NOT NULL,\
     entry TEXT NOT NULL,\
     manifest_json TEXT NOT NULL,\
     wasm BLOB NOT NULL,\
     wasm_hash TEXT NOT NULL,\
     created_at TEXT NOT NULL,\
     updated_at TEXT NOT NULL\
     )",
    "CREATE TABLE IF NOT EXISTS lix_internal_file_data_cache (\
     file_id TEXT NOT NULL,\
     version_id TEXT NOT NULL,\
     data BLOB NOT NULL,\
     PRIMARY KEY (file_id, version_id)\
     )",
    "CREATE INDEX IF NOT EXISTS idx_lix_internal_file_data_cache_version \
     ON lix_internal_file_data_cache (version_id)",
];

pub(crate) async fn init_backend(backend: &dyn LixBackend) -> Result<(), LixError> {
    if backend.dialect() == SqlDialect::Sqlite {
        backend.execute("PRAGMA foreign_keys = ON", &[]).await?;
    }
    for statement in INIT_STATEMENTS {
        backend.execute(statement, &[]).await?;
    }
    Ok(())
}

/// Seeds the no-content snapshot, the `global` root version, the default
/// `main` version inheriting from it, and the active-version pointer.
/// Returns whether this boot created a fresh database.
pub(crate) async fn seed_backend(
    backend: &dyn LixBackend,
    now: &str,
    generate_uuid: &mut dyn FnMut() -> String,
) -> Result<bool, LixError> {
    backend
        .execute(
            "INSERT INTO lix_internal_snapshot (id, content) VALUES ($1, NULL) \
             ON CONFLICT (id) DO NOTHING",
            &[Value::Text(NO_CONTENT_SNAPSHOT_ID.to_string())],
        )
        .await?;

    let existing = backend
        .execute(
            "SELECT 1 FROM lix_internal_version WHERE id = $1",
            &[Value::Text(GLOBAL_VERSION_ID.to_string())],
        )
        .await?;
    let fresh = existing.rows.is_empty();
    if fresh {
        let mut conn = SqlConn::Backend(backend);
        crate::version::seed_root_version(
            &mut conn,
            GLOBAL_VERSION_ID,
            GLOBAL_VERSION_ID,
            true,
            now,
            generate_uuid,
        )
        .await?;
        crate::version::create_version_in_conn(
            &mut conn,
            &crate::sql::plan::CreateVersionPlan {
                id: Some(MAIN_VERSION_ID.to_string()),
                name: Some(MAIN_VERSION_ID.to_string()),
                inherits_from_version_id: Some(GLOBAL_VERSION_ID.to_string()),
                hidden: false,
            },
            now,
            generate_uuid,
        )
        .await?;
    }

    backend
        .execute(
            "INSERT INTO lix_internal_active_version (id, version_id) VALUES (1, $1) \
             ON CONFLICT (id) DO NOTHING",
            &[Value::Text(MAIN_VERSION_ID.to_string())],
        )
        .await?;

    Ok(fresh)
}

pub(crate) async fn load_active_version_id(backend: &dyn LixBackend) -> Result<String, LixError> {
    let result = backend
        .execute(
            "SELECT version_id FROM lix_internal_active_version WHERE id = 1",
            &[],
        )
        .await?;
    match result.rows.first().and_then(|row| row.first()) {
        Some(Value::Text(version_id)) => Ok(version_id.clone()),
        other => Err(LixError::invariant(format!(
            "active version pointer is missing or malformed: {other:?}"
        ))),
    }
}
