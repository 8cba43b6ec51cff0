use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use lix_engine::{
    collect_snapshot, LixBackend, LixError, LixTransaction, QueryResult, SnapshotSink,
    SnapshotSource, SqlDialect, Value, SNAPSHOT_CHUNK_SIZE,
};
use rusqlite::backup::Progress;
use rusqlite::{params_from_iter, Connection, DatabaseName};
use tempfile::NamedTempFile;

/// SQLite adapter over one connection. The engine owns the adapter
/// exclusively and serializes every call, so the mutex exists only to hand
/// the connection to an open transaction.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn in_memory() -> Result<Self, LixError> {
        Connection::open_in_memory()
            .map(Self::from_connection)
            .map_err(sqlite_error)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LixError> {
        Connection::open(path)
            .map(Self::from_connection)
            .map_err(sqlite_error)
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn session(&self) -> Result<MutexGuard<'_, Connection>, LixError> {
        self.conn
            .lock()
            .map_err(|_| LixError::backend("sqlite connection mutex poisoned"))
    }
}

#[async_trait(?Send)]
impl LixBackend for SqliteBackend {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, LixError> {
        let conn = self.session()?;
        run_statement(&conn, sql, params)
    }

    async fn begin_transaction(&self) -> Result<Box<dyn LixTransaction + '_>, LixError> {
        let conn = self.session()?;
        conn.execute_batch("BEGIN IMMEDIATE TRANSACTION")
            .map_err(sqlite_error)?;
        Ok(Box::new(SqliteTx { conn, open: true }))
    }

    async fn export_snapshot(&self, sink: &mut dyn SnapshotSink) -> Result<(), LixError> {
        // The backup API wants a file target; a scratch temp file carries the
        // image and removes itself when it goes out of scope.
        let scratch = NamedTempFile::new().map_err(io_error)?;
        self.session()?
            .backup(DatabaseName::Main, scratch.path(), None)
            .map_err(sqlite_error)?;
        let image = std::fs::read(scratch.path()).map_err(io_error)?;
        drop(scratch);

        for chunk in image.chunks(SNAPSHOT_CHUNK_SIZE) {
            sink.write_chunk(chunk).await?;
        }
        sink.finish().await
    }

    async fn restore_from_snapshot(
        &self,
        source: &mut dyn SnapshotSource,
    ) -> Result<(), LixError> {
        let image = collect_snapshot(source).await?;
        if image.is_empty() {
            return Err(LixError::backend("snapshot stream is empty"));
        }

        let scratch = NamedTempFile::new().map_err(io_error)?;
        std::fs::write(scratch.path(), &image).map_err(io_error)?;
        self.session()?
            .restore(DatabaseName::Main, scratch.path(), None::<fn(Progress)>)
            .map_err(sqlite_error)
    }
}

struct SqliteTx<'a> {
    conn: MutexGuard<'a, Connection>,
    open: bool,
}

impl SqliteTx<'_> {
    fn end(mut self: Box<Self>, sql: &str) -> Result<(), LixError> {
        self.conn.execute_batch(sql).map_err(sqlite_error)?;
        self.open = false;
        Ok(())
    }
}

#[async_trait(?Send)]
impl LixTransaction for SqliteTx<'_> {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult, LixError> {
        run_statement(&self.conn, sql, params)
    }

    async fn commit(self: Box<Self>) -> Result<(), LixError> {
        self.end("COMMIT")
    }

    async fn rollback(self: Box<Self>) -> Result<(), LixError> {
        self.end("ROLLBACK")
    }
}

impl Drop for SqliteTx<'_> {
    fn drop(&mut self) {
        if self.open && !std::thread::panicking() {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

fn run_statement(conn: &Connection, sql: &str, params: &[Value]) -> Result<QueryResult, LixError> {
    // Parameterless multi-statement scripts go through the batch API; it
    // returns no rows.
    if params.is_empty() && is_script(sql) {
        conn.execute_batch(sql).map_err(sqlite_error)?;
        return Ok(QueryResult::empty());
    }

    let mut statement = conn.prepare(sql).map_err(sqlite_error)?;
    let columns: Vec<String> = statement
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();

    let decoded = statement
        .query_and_then(
            params_from_iter(params.iter().map(encode_cell)),
            |row| -> Result<Vec<Value>, rusqlite::Error> {
                (0..columns.len())
                    .map(|index| row.get::<_, rusqlite::types::Value>(index).map(decode_cell))
                    .collect()
            },
        )
        .map_err(sqlite_error)?;

    let mut rows = Vec::new();
    for row in decoded {
        rows.push(row.map_err(sqlite_error)?);
    }
    Ok(QueryResult { rows, columns })
}

/// More than one statement, ignoring a single trailing terminator.
fn is_script(sql: &str) -> bool {
    sql.trim_end().trim_end_matches(';').contains(';')
}

fn encode_cell(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Integer(value) => rusqlite::types::Value::Integer(*value),
        Value::Real(value) => rusqlite::types::Value::Real(*value),
        Value::Text(value) => rusqlite::types::Value::Text(value.clone()),
        Value::Blob(value) => rusqlite::types::Value::Blob(value.clone()),
    }
}

fn decode_cell(value: rusqlite::types::Value) -> Value {
    match value {
        rusqlite::types::Value::Null => Value::Null,
        rusqlite::types::Value::Integer(value) => Value::Integer(value),
        rusqlite::types::Value::Real(value) => Value::Real(value),
        rusqlite::types::Value::Text(value) => Value::Text(value),
        rusqlite::types::Value::Blob(value) => Value::Blob(value),
    }
}

fn sqlite_error(error: rusqlite::Error) -> LixError {
    LixError::backend(error.to_string())
}

fn io_error(error: std::io::Error) -> LixError {
    LixError::backend(error.to_string())
}
