mod backend;
mod wasm;

use std::sync::Arc;

use lix_engine::{boot, BootArgs};

pub use backend::sqlite::SqliteBackend;
pub use lix_engine::{
    collect_snapshot, BootKeyValue, CreateCheckpointResult, CreateVersionArgs, CreatedVersion,
    Engine, EngineTransaction, EngineTransactionFuture, ExecuteOptions, InstallPluginResult,
    LixBackend, LixError, LixErrorCode, LixTransaction, ObserveEvent, ObserveEventsOwned,
    ObserveQuery, PluginInstallInput, QueryResult, SnapshotSink, SnapshotSource, SqlDialect,
    StateCommitStream, StateCommitStreamBatch, StateCommitStreamChange, StateCommitStreamFilter,
    StateCommitStreamOperation, Value, WasmComponentInstance, WasmLimits, WasmRuntime,
    SNAPSHOT_CHUNK_SIZE,
};
pub use wasm::WasmtimeRuntime;

pub struct OpenLixConfig {
    pub backend: Option<Box<dyn LixBackend + Send + Sync>>,
    pub key_values: Vec<BootKeyValue>,
    pub wasm_runtime: Option<Arc<dyn WasmRuntime>>,
}

impl Default for OpenLixConfig {
    fn default() -> Self {
        Self {
            backend: None,
            key_values: Vec::new(),
            wasm_runtime: None,
        }
    }
}

/// The embeddable engine with its native host: an in-memory SQLite backend
/// and a wasmtime plugin sandbox unless the caller brings their own.
pub struct Lix {
    engine: Arc<Engine>,
}

pub async fn open_lix(config: OpenLixConfig) -> Result<Lix, LixError> {
    let backend = match config.backend {
        Some(backend) => backend,
        None => Box::new(SqliteBackend::in_memory()?),
    };
    let wasm_runtime: Arc<dyn WasmRuntime> = match config.wasm_runtime {
        Some(runtime) => runtime,
        None => Arc::new(WasmtimeRuntime::new()?),
    };

    let mut args = BootArgs::new(backend, wasm_runtime);
    args.key_values = config.key_values;
    Ok(Lix {
        engine: Arc::new(boot(args)),
    })
}

impl Lix {
    pub async fn execute(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryResult, LixError> {
        self.engine.execute(sql, params).await
    }

    pub async fn execute_with_options(
        &self,
        sql: &str,
        params: &[Value],
        options: ExecuteOptions,
    ) -> Result<QueryResult, LixError> {
        self.engine.execute_with_options(sql, params, options).await
    }

    /// Atomic batch; post-commit effects flush once after the outer commit.
    pub async fn execute_transaction(
        &self,
        statements: &[(String, Vec<Value>)],
        options: ExecuteOptions,
    ) -> Result<QueryResult, LixError> {
        self.engine.execute_transaction(statements, options).await
    }

    pub async fn begin_transaction(&self) -> Result<EngineTransaction<'_>, LixError> {
        self.engine.begin_transaction().await
    }

    pub async fn begin_transaction_with_options(
        &self,
        options: ExecuteOptions,
    ) -> Result<EngineTransaction<'_>, LixError> {
        self.engine.begin_transaction_with_options(options).await
    }

    /// Transaction helper: commits when `body` returns `Ok`, rolls back when
    /// it returns `Err`.
    pub async fn transaction<'eng, T, F>(&'eng self, body: F) -> Result<T, LixError>
    where
        F: for<'tx> FnOnce(&'tx mut EngineTransaction<'eng>) -> EngineTransactionFuture<'tx, T>,
    {
        self.engine.transaction(body).await
    }

    pub async fn create_version(
        &self,
        args: CreateVersionArgs,
    ) -> Result<CreatedVersion, LixError> {
        self.engine.create_version(args).await
    }

    pub async fn switch_version(&self, version_id: &str) -> Result<(), LixError> {
        self.engine.switch_version(version_id).await
    }

    pub async fn create_checkpoint(&self) -> Result<CreateCheckpointResult, LixError> {
        self.engine.create_checkpoint().await
    }

    pub async fn install_plugin(
        &self,
        input: PluginInstallInput,
    ) -> Result<InstallPluginResult, LixError> {
        self.engine.install_plugin(input).await
    }

    pub async fn export_snapshot(&self, sink: &mut dyn SnapshotSink) -> Result<(), LixError> {
        self.engine.export_snapshot(sink).await
    }

    pub async fn restore_from_snapshot(
        &self,
        source: &mut dyn SnapshotSource,
    ) -> Result<(), LixError> {
        self.engine.restore_from_snapshot(source).await
    }

    pub fn state_commit_stream(&self, filter: StateCommitStreamFilter) -> StateCommitStream {
        self.engine.state_commit_stream(filter)
    }

    pub fn observe(&self, query: ObserveQuery) -> Result<ObserveEventsOwned, LixError> {
        lix_engine::observe_owned(Arc::clone(&self.engine), query)
    }

    pub fn close(&self) {
        self.engine.close();
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}
