mod backend;
mod boot;
mod builtin_schema;
mod checkpoint;
mod commit;
mod engine;
mod error;
mod filesystem;
mod init;
mod observe;
mod plugin;
mod schema_catalog;
mod schema_definition;
mod snapshot;
mod sql;
mod state_commit_stream;
mod types;
mod version;
mod wasm_runtime;

pub use backend::{LixBackend, LixTransaction, SqlDialect};
pub use boot::{boot, BootArgs, BootKeyValue};
pub use checkpoint::CreateCheckpointResult;
pub use commit::{
    ChangeRow, ChangeSetElementRow, CommitRow, GenerateCommitResult, MaterializedUpsert,
    SnapshotRow, VersionContext, VersionTipUpdate,
};
pub use engine::{Engine, EngineTransaction, EngineTransactionFuture, ExecuteOptions};
pub use error::{LixError, LixErrorCode};
pub use observe::{observe_owned, ObserveEvent, ObserveEvents, ObserveEventsOwned, ObserveQuery};
pub use plugin::{
    InstallPluginResult, InstalledPlugin, PluginInstallInput, PluginManifest, PluginMatch,
    PluginRuntime,
};
pub use schema_definition::{
    lix_schema_definition, lix_schema_definition_json, validate_lix_schema,
    validate_lix_schema_definition,
};
pub use snapshot::{collect_snapshot, SnapshotSink, SnapshotSource, SNAPSHOT_CHUNK_SIZE};
pub use state_commit_stream::{
    StateCommitStream, StateCommitStreamBatch, StateCommitStreamChange, StateCommitStreamFilter,
    StateCommitStreamOperation,
};
pub use types::{QueryResult, Value};
pub use version::{CreateVersionArgs, CreatedVersion};
pub use wasm_runtime::{
    NoopWasmRuntime, WasmComponentInstance, WasmLimits, WasmRuntime, DEFAULT_PLUGIN_MEMORY_LIMIT,
};
