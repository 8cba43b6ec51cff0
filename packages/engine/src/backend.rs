use async_trait::async_trait;

use crate::{LixError, QueryResult, SnapshotSink, SnapshotSource, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Sqlite,
    Postgres,
}

/// A SQL engine behind one logical connection.
///
/// The adapter executes statements verbatim; it must not rewrite SQL. The
/// engine owns the connection exclusively and serializes all calls.
#[async_trait(?Send)]
pub trait LixBackend: Send + Sync {
    fn dialect(&self) -> SqlDialect;

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, LixError>;

    async fn begin_transaction(&self) -> Result<Box<dyn LixTransaction + '_>, LixError>;

    /// Streams a full, portable database image (for example a `.lix` file)
    /// into `sink`.
    async fn export_snapshot(&self, _sink: &mut dyn SnapshotSink) -> Result<(), LixError> {
        Err(LixError::backend(
            "export_snapshot is not supported by this backend",
        ))
    }

    /// Replaces the backend state with a previously exported database image.
    async fn restore_from_snapshot(
        &self,
        _source: &mut dyn SnapshotSource,
    ) -> Result<(), LixError> {
        Err(LixError::backend(
            "restore_from_snapshot is not supported by this backend",
        ))
    }

    /// Releases the underlying connection. Idempotent.
    async fn close(&self) -> Result<(), LixError> {
        Ok(())
    }
}

#[async_trait(?Send)]
pub trait LixTransaction {
    fn dialect(&self) -> SqlDialect;

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult, LixError>;

    async fn commit(self: Box<Self>) -> Result<(), LixError>;

    async fn rollback(self: Box<Self>) -> Result<(), LixError>;
}
