//! Engine-level pipeline checks against a minimal rusqlite backend, without
//! any host SDK in between.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use lix_engine::{
    boot, BootArgs, BootKeyValue, Engine, ExecuteOptions, LixBackend, LixError, LixTransaction,
    NoopWasmRuntime, QueryResult, SqlDialect, Value,
};
use rusqlite::{params_from_iter, Connection};
use std::sync::Arc;

struct TestSqliteBackend {
    conn: Mutex<Connection>,
}

struct TestSqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    finalized: bool,
}

impl TestSqliteBackend {
    fn in_memory() -> Self {
        Self {
            conn: Mutex::new(Connection::open_in_memory().expect("in-memory sqlite")),
        }
    }
}

fn run_sql(conn: &Connection, sql: &str, params: &[Value]) -> Result<QueryResult, LixError> {
    if params.is_empty() && sql.contains(';') {
        conn.execute_batch(sql)
            .map_err(|err| LixError::backend(err.to_string()))?;
        return Ok(QueryResult::empty());
    }
    let mut stmt = conn
        .prepare(sql)
        .map_err(|err| LixError::backend(err.to_string()))?;
    let columns = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let bound = params.iter().map(|value| match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Integer(value) => rusqlite::types::Value::Integer(*value),
        Value::Real(value) => rusqlite::types::Value::Real(*value),
        Value::Text(value) => rusqlite::types::Value::Text(value.clone()),
        Value::Blob(value) => rusqlite::types::Value::Blob(value.clone()),
    });
    let mut rows = stmt
        .query(params_from_iter(bound))
        .map_err(|err| LixError::backend(err.to_string()))?;
    let mut result_rows = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|err| LixError::backend(err.to_string()))?
    {
        let mut cells = Vec::new();
        for idx in 0..row.as_ref().column_count() {
            let cell = row
                .get_ref(idx)
                .map_err(|err| LixError::backend(err.to_string()))?;
            cells.push(match cell {
                rusqlite::types::ValueRef::Null => Value::Null,
                rusqlite::types::ValueRef::Integer(value) => Value::Integer(value),
                rusqlite::types::ValueRef::Real(value) => Value::Real(value),
                rusqlite::types::ValueRef::Text(value) => {
                    Value::Text(String::from_utf8_lossy(value).to_string())
                }
                rusqlite::types::ValueRef::Blob(value) => Value::Blob(value.to_vec()),
            });
        }
        result_rows.push(cells);
    }
    Ok(QueryResult {
        rows: result_rows,
        columns,
    })
}

#[async_trait(?Send)]
impl LixBackend for TestSqliteBackend {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, LixError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| LixError::backend("sqlite mutex poisoned"))?;
        run_sql(&conn, sql, params)
    }

    async fn begin_transaction(&self) -> Result<Box<dyn LixTransaction + '_>, LixError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| LixError::backend("sqlite mutex poisoned"))?;
        conn.execute_batch("BEGIN IMMEDIATE TRANSACTION")
            .map_err(|err| LixError::backend(err.to_string()))?;
        Ok(Box::new(TestSqliteTransaction {
            conn,
            finalized: false,
        }))
    }
}

#[async_trait(?Send)]
impl LixTransaction for TestSqliteTransaction<'_> {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult, LixError> {
        run_sql(&self.conn, sql, params)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), LixError> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|err| LixError::backend(err.to_string()))?;
        self.finalized = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), LixError> {
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|err| LixError::backend(err.to_string()))?;
        self.finalized = true;
        Ok(())
    }
}

impl Drop for TestSqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finalized && !std::thread::panicking() {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

fn boot_engine() -> Engine {
    boot(BootArgs::new(
        Box::new(TestSqliteBackend::in_memory()),
        Arc::new(NoopWasmRuntime),
    ))
}

fn cell_text(result: &QueryResult, row: usize, column: usize) -> String {
    match &result.rows[row][column] {
        Value::Text(text) => text.clone(),
        other => panic!("expected text cell, got {other:?}"),
    }
}

#[tokio::test]
async fn write_read_cycle_produces_changes_and_commits() {
    let engine = boot_engine();

    engine
        .execute(
            "INSERT INTO lix_key_value (key, value) VALUES ('k', 'v')",
            &[],
        )
        .await
        .expect("insert should succeed");

    let state = engine
        .execute(
            "SELECT value FROM lix_key_value WHERE key = 'k'",
            &[],
        )
        .await
        .expect("read should succeed");
    assert_eq!(cell_text(&state, 0, 0), "v");

    // The change store records a content-addressed change for the entity.
    let changes = engine
        .execute(
            "SELECT entity_id, snapshot_content FROM lix_change WHERE schema_key = 'lix_key_value'",
            &[],
        )
        .await
        .expect("change read should succeed");
    assert_eq!(changes.rows.len(), 1);
    assert_eq!(cell_text(&changes, 0, 0), "k");

    let commits = engine
        .execute(
            "SELECT count(*) FROM lix_commit WHERE version_id = 'main'",
            &[],
        )
        .await
        .expect("commit read should succeed");
    assert_eq!(commits.rows[0][0], Value::Integer(1));
}

#[tokio::test]
async fn boot_key_values_seed_a_fresh_database() {
    let mut args = BootArgs::new(
        Box::new(TestSqliteBackend::in_memory()),
        Arc::new(NoopWasmRuntime),
    );
    args.key_values = vec![BootKeyValue {
        key: "lix_deterministic_mode".to_string(),
        value: serde_json::json!({ "enabled": false }),
        version_id: None,
    }];
    let engine = boot(args);

    let rows = engine
        .execute(
            "SELECT value FROM lix_key_value WHERE key = 'lix_deterministic_mode'",
            &[],
        )
        .await
        .expect("boot key value should be readable");
    assert_eq!(rows.rows.len(), 1);
}

#[tokio::test]
async fn writer_key_lands_on_change_rows() {
    let engine = boot_engine();

    engine
        .execute_with_options(
            "INSERT INTO lix_key_value (key, value) VALUES ('k', 'v')",
            &[],
            ExecuteOptions {
                writer_key: Some("w1".to_string()),
            },
        )
        .await
        .expect("insert should succeed");

    let rows = engine
        .execute(
            "SELECT writer_key FROM lix_change WHERE entity_id = 'k' AND schema_key = 'lix_key_value'",
            &[],
        )
        .await
        .expect("change read should succeed");
    assert_eq!(cell_text(&rows, 0, 0), "w1");
}

#[tokio::test]
async fn tombstoned_entities_disappear_from_live_state() {
    let engine = boot_engine();

    engine
        .execute("INSERT INTO lix_key_value (key, value) VALUES ('k', 'v')", &[])
        .await
        .expect("insert");
    engine
        .execute("DELETE FROM lix_key_value WHERE key = 'k'", &[])
        .await
        .expect("delete");

    let live = engine
        .execute(
            "SELECT count(*) FROM lix_state WHERE entity_id = 'k' AND schema_key = 'lix_key_value'",
            &[],
        )
        .await
        .expect("live read");
    assert_eq!(live.rows[0][0], Value::Integer(0));

    let tombstones = engine
        .execute(
            "SELECT count(*) FROM lix_state_with_tombstones \
             WHERE entity_id = 'k' AND schema_key = 'lix_key_value'",
            &[],
        )
        .await
        .expect("tombstone read");
    assert_eq!(tombstones.rows[0][0], Value::Integer(1));
}
