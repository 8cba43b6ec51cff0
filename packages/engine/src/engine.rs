use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::json;
use uuid::Uuid;

use crate::boot::{BootArgs, BootKeyValue};
use crate::checkpoint::{create_checkpoint_in_conn, CreateCheckpointResult};
use crate::filesystem::materialize::{
    materialize_file_data, refresh_missing_file_data, PluginHost,
};
use crate::init::{init_backend, load_active_version_id, seed_backend};
use crate::plugin::install::{install_plugin, InstallPluginResult, PluginInstallInput};
use crate::plugin::runtime::CachedPluginComponent;
use crate::plugin::storage::load_installed_plugins;
use crate::plugin::types::InstalledPlugin;
use crate::schema_catalog::{SchemaCatalog, SchemaMetadata};
use crate::sql::execution::conn::SqlConn;
use crate::sql::execution::run::{run_plan, ScriptOutcome};
use crate::sql::plan::{EntityInsertRow, ExecutionPlan, PlannedStatement, WritePlan};
use crate::sql::planner::{plan_script, PlannerContext, PlannerPlugins};
use crate::state_commit_stream::{
    StateCommitStream, StateCommitStreamBus, StateCommitStreamChange, StateCommitStreamFilter,
};
use crate::version::{
    create_version_in_conn, switch_version_in_backend, CreateVersionArgs, CreatedVersion,
    MAIN_VERSION_ID,
};
use crate::{LixBackend, LixError, QueryResult, SnapshotSink, SnapshotSource, Value, WasmRuntime};

const POST_COMMIT_EFFECT_ATTEMPTS: u32 = 3;

pub type EngineTransactionFuture<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<T, LixError>> + 'a>>;

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Attribution tag stored on every change this call emits; streams expose
    /// it so writers can suppress their own echoes.
    pub writer_key: Option<String>,
}

pub struct Engine {
    backend: Box<dyn LixBackend + Send + Sync>,
    wasm_runtime: Arc<dyn WasmRuntime>,
    boot_key_values: Vec<BootKeyValue>,
    access_to_internal: bool,
    initialized: AtomicBool,
    closed: AtomicBool,
    active_version_id: RwLock<String>,
    schema_catalog_cache: RwLock<Option<Arc<SchemaCatalog>>>,
    installed_plugins_cache: RwLock<Option<Arc<Vec<InstalledPlugin>>>>,
    plugin_component_cache: Mutex<BTreeMap<String, CachedPluginComponent>>,
    state_commit_stream_bus: Arc<StateCommitStreamBus>,
}

pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

pub(crate) fn generate_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

impl Engine {
    pub(crate) fn from_boot_args(args: BootArgs) -> Self {
        Self {
            backend: args.backend,
            wasm_runtime: args.wasm_runtime,
            boot_key_values: args.key_values,
            access_to_internal: args.access_to_internal,
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            active_version_id: RwLock::new(MAIN_VERSION_ID.to_string()),
            schema_catalog_cache: RwLock::new(None),
            installed_plugins_cache: RwLock::new(None),
            plugin_component_cache: Mutex::new(BTreeMap::new()),
            state_commit_stream_bus: Arc::new(StateCommitStreamBus::default()),
        }
    }

    pub fn dialect(&self) -> crate::SqlDialect {
        self.backend.dialect()
    }

    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, LixError> {
        self.execute_with_options(sql, params, ExecuteOptions::default())
            .await
    }

    pub async fn execute_with_options(
        &self,
        sql: &str,
        params: &[Value],
        options: ExecuteOptions,
    ) -> Result<QueryResult, LixError> {
        self.ensure_open()?;
        self.ensure_initialized().await?;

        let plan = self.plan(sql, params).await?;
        self.execute_plan(&plan, &options).await
    }

    /// Atomic batch: all statements run inside one transaction; post-commit
    /// effects flush exactly once after the outer commit.
    pub async fn execute_transaction(
        &self,
        statements: &[(String, Vec<Value>)],
        options: ExecuteOptions,
    ) -> Result<QueryResult, LixError> {
        let mut transaction = self.begin_transaction_with_options(options).await?;
        let mut result = QueryResult::empty();
        for (sql, params) in statements {
            match transaction.execute(sql, params).await {
                Ok(statement_result) => result = statement_result,
                Err(error) => {
                    transaction.rollback().await?;
                    return Err(error);
                }
            }
        }
        transaction.commit().await?;
        Ok(result)
    }

    pub async fn begin_transaction(&self) -> Result<EngineTransaction<'_>, LixError> {
        self.begin_transaction_with_options(ExecuteOptions::default())
            .await
    }

    pub async fn begin_transaction_with_options(
        &self,
        options: ExecuteOptions,
    ) -> Result<EngineTransaction<'_>, LixError> {
        self.ensure_open()?;
        self.ensure_initialized().await?;
        // Warm the planner caches now: while the transaction holds the
        // connection, cache misses could not reach the backend.
        self.schema_catalog().await?;
        self.installed_plugins().await?;
        let transaction = self.backend.begin_transaction().await?;
        Ok(EngineTransaction {
            engine: self,
            transaction: Some(transaction),
            options,
            active_version_id_override: None,
            pending_stream_changes: Vec::new(),
            pending_file_refresh_targets: BTreeSet::new(),
            pending_schema_invalidation: false,
        })
    }

    /// Transaction helper: commits when the closure returns `Ok`, rolls back
    /// when it returns `Err`.
    pub async fn transaction<'eng, T, F>(&'eng self, body: F) -> Result<T, LixError>
    where
        F: for<'tx> FnOnce(&'tx mut EngineTransaction<'eng>) -> EngineTransactionFuture<'tx, T>,
    {
        let mut transaction = self.begin_transaction().await?;
        match body(&mut transaction).await {
            Ok(value) => {
                transaction.commit().await?;
                Ok(value)
            }
            Err(error) => {
                let _ = transaction.rollback().await;
                Err(error)
            }
        }
    }

    pub async fn create_version(&self, args: CreateVersionArgs) -> Result<CreatedVersion, LixError> {
        self.ensure_open()?;
        self.ensure_initialized().await?;

        let mut transaction = self.backend.begin_transaction().await?;
        let created = {
            let mut conn = SqlConn::Transaction(transaction.as_mut());
            let mut generate_uuid = generate_uuid_v7;
            create_version_in_conn(&mut conn, &args.into(), &now_timestamp(), &mut generate_uuid)
                .await
        };
        match created {
            Ok(created) => {
                transaction.commit().await?;
                Ok(created)
            }
            Err(error) => {
                let _ = transaction.rollback().await;
                Err(error)
            }
        }
    }

    pub async fn switch_version(&self, version_id: &str) -> Result<(), LixError> {
        self.ensure_open()?;
        self.ensure_initialized().await?;
        switch_version_in_backend(self.backend.as_ref(), version_id).await?;
        *self.active_version_id_mut()? = version_id.to_string();
        Ok(())
    }

    pub async fn create_checkpoint(&self) -> Result<CreateCheckpointResult, LixError> {
        self.ensure_open()?;
        self.ensure_initialized().await?;
        let active_version_id = self.active_version_id()?;

        let mut transaction = self.backend.begin_transaction().await?;
        let checkpoint = {
            let mut conn = SqlConn::Transaction(transaction.as_mut());
            let mut generate_uuid = generate_uuid_v7;
            create_checkpoint_in_conn(
                &mut conn,
                &active_version_id,
                &now_timestamp(),
                &mut generate_uuid,
            )
            .await
        };
        match checkpoint {
            Ok(checkpoint) => {
                transaction.commit().await?;
                Ok(checkpoint)
            }
            Err(error) => {
                let _ = transaction.rollback().await;
                Err(error)
            }
        }
    }

    /// Idempotent: reinstalling a plugin with identical manifest and bytes is
    /// a no-op.
    pub async fn install_plugin(
        &self,
        input: PluginInstallInput,
    ) -> Result<InstallPluginResult, LixError> {
        self.ensure_open()?;
        self.ensure_initialized().await?;

        let result = install_plugin(self.backend.as_ref(), input, &now_timestamp()).await?;
        if result.updated {
            self.invalidate_plugin_caches(&result.key)?;
            *self.write_lock(&self.schema_catalog_cache)? = None;
        }
        Ok(result)
    }

    pub async fn export_snapshot(&self, sink: &mut dyn SnapshotSink) -> Result<(), LixError> {
        self.ensure_open()?;
        self.ensure_initialized().await?;
        self.backend.export_snapshot(sink).await
    }

    pub async fn restore_from_snapshot(
        &self,
        source: &mut dyn SnapshotSource,
    ) -> Result<(), LixError> {
        self.ensure_open()?;
        self.ensure_initialized().await?;
        self.backend.restore_from_snapshot(source).await?;

        *self.active_version_id_mut()? = load_active_version_id(self.backend.as_ref()).await?;
        *self.write_lock(&self.schema_catalog_cache)? = None;
        *self.write_lock(&self.installed_plugins_cache)? = None;
        self.lock_components()?.clear();
        Ok(())
    }

    pub fn state_commit_stream(&self, filter: StateCommitStreamFilter) -> StateCommitStream {
        self.state_commit_stream_bus.subscribe(filter)
    }

    /// Idempotent; pending stream `next()` calls resolve with `None`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state_commit_stream_bus.close_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stable fingerprint of the plan this SQL+params would execute (debug /
    /// caching aid).
    pub async fn plan_fingerprint(&self, sql: &str, params: &[Value]) -> Result<String, LixError> {
        self.ensure_open()?;
        self.ensure_initialized().await?;
        Ok(self.plan(sql, params).await?.fingerprint)
    }

    // --- internals --------------------------------------------------------

    pub(crate) fn ensure_open(&self) -> Result<(), LixError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LixError::closed("this Lix instance has been closed"));
        }
        Ok(())
    }

    pub(crate) async fn ensure_initialized(&self) -> Result<(), LixError> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }

        init_backend(self.backend.as_ref()).await?;
        let mut generate_uuid = generate_uuid_v7;
        let fresh =
            seed_backend(self.backend.as_ref(), &now_timestamp(), &mut generate_uuid).await?;
        *self.active_version_id_mut()? = load_active_version_id(self.backend.as_ref()).await?;
        self.initialized.store(true, Ordering::SeqCst);

        if fresh && !self.boot_key_values.is_empty() {
            self.apply_boot_key_values().await?;
        }
        Ok(())
    }

    async fn apply_boot_key_values(&self) -> Result<(), LixError> {
        let active_version_id = self.active_version_id()?;
        let rows = self
            .boot_key_values
            .iter()
            .map(|key_value| EntityInsertRow {
                schema_key: "lix_key_value".to_string(),
                schema_version: "1".to_string(),
                entity_id: key_value.key.clone(),
                file_id: "lix".to_string(),
                version_id: key_value
                    .version_id
                    .clone()
                    .unwrap_or_else(|| active_version_id.clone()),
                plugin_key: "lix".to_string(),
                snapshot_content: json!({
                    "key": key_value.key,
                    "value": key_value.value,
                }),
                metadata: None,
            })
            .collect();

        let plan = ExecutionPlan {
            statements: vec![PlannedStatement::Write(WritePlan::EntityInsert { rows })],
            requirements: Vec::new(),
            effects: Vec::new(),
            fingerprint: String::new(),
        };
        self.execute_plan(&plan, &ExecuteOptions::default()).await?;
        Ok(())
    }

    pub(crate) async fn plan(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<ExecutionPlan, LixError> {
        let ctx = self.planner_context().await?;
        let plugins = self.planner_plugins().await?;
        plan_script(sql, params, &ctx, &plugins)
    }

    pub(crate) async fn planner_context(&self) -> Result<PlannerContext, LixError> {
        Ok(PlannerContext {
            active_version_id: self.active_version_id()?,
            catalog: self.schema_catalog().await?,
            dialect: self.backend.dialect(),
            access_to_internal: self.access_to_internal,
        })
    }

    async fn planner_plugins(&self) -> Result<PlannerPlugins, LixError> {
        let plugins = self.installed_plugins().await?;
        Ok(PlannerPlugins {
            matchers: plugins
                .iter()
                .map(|plugin| (plugin.key.clone(), plugin.path_glob.clone()))
                .collect(),
        })
    }

    async fn execute_plan(
        &self,
        plan: &ExecutionPlan,
        options: &ExecuteOptions,
    ) -> Result<QueryResult, LixError> {
        let plugins = self.installed_plugins().await?;

        if plan.requires_file_data() {
            let mut components = self.lock_components()?;
            let mut host = PluginHost {
                runtime: self.wasm_runtime.as_ref(),
                plugins: &plugins,
                components: &mut components,
            };
            let mut conn = SqlConn::Backend(self.backend.as_ref());
            refresh_missing_file_data(&mut conn, &mut host).await?;
        }

        if !plan.has_writes() {
            let mut components = self.lock_components()?;
            let mut host = PluginHost {
                runtime: self.wasm_runtime.as_ref(),
                plugins: &plugins,
                components: &mut components,
            };
            let mut conn = SqlConn::Backend(self.backend.as_ref());
            let mut generate_uuid = generate_uuid_v7;
            let outcome = run_plan(
                &mut conn,
                &mut host,
                plan,
                options.writer_key.as_deref(),
                &now_timestamp(),
                &mut generate_uuid,
            )
            .await?;
            return Ok(outcome.result);
        }

        let mut transaction = self.backend.begin_transaction().await?;
        let outcome = {
            let mut components = self.lock_components()?;
            let mut host = PluginHost {
                runtime: self.wasm_runtime.as_ref(),
                plugins: &plugins,
                components: &mut components,
            };
            let mut conn = SqlConn::Transaction(transaction.as_mut());
            let mut generate_uuid = generate_uuid_v7;
            run_plan(
                &mut conn,
                &mut host,
                plan,
                options.writer_key.as_deref(),
                &now_timestamp(),
                &mut generate_uuid,
            )
            .await
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(error) => {
                let _ = transaction.rollback().await;
                return Err(error);
            }
        };
        transaction.commit().await?;

        self.apply_post_commit(outcome).await
    }

    /// Commit is durable at this point: switch/cache effects apply, file data
    /// caches refresh (retried with backoff), then observers are notified.
    /// Effect failures surface without rolling anything back.
    async fn apply_post_commit(&self, outcome: ScriptOutcome) -> Result<QueryResult, LixError> {
        let ScriptOutcome {
            result,
            stream_changes,
            file_refresh_targets,
            next_active_version_id,
            schemas_registered,
        } = outcome;

        if let Some(version_id) = next_active_version_id {
            *self.active_version_id_mut()? = version_id;
        }
        if schemas_registered {
            *self.write_lock(&self.schema_catalog_cache)? = None;
        }

        let refresh_error = self
            .run_file_refresh_effects(&file_refresh_targets)
            .await
            .err();
        self.state_commit_stream_bus.emit(stream_changes);

        match refresh_error {
            Some(error) => Err(error),
            None => Ok(result),
        }
    }

    pub(crate) async fn run_file_refresh_effects(
        &self,
        targets: &BTreeSet<(String, String)>,
    ) -> Result<(), LixError> {
        if targets.is_empty() {
            return Ok(());
        }
        let plugins = self.installed_plugins().await?;

        for (file_id, version_id) in targets {
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                match self
                    .refresh_file_data(&plugins, file_id, version_id)
                    .await
                {
                    Ok(()) => break,
                    Err(_) if attempt < POST_COMMIT_EFFECT_ATTEMPTS => {
                        effect_backoff(attempt).await;
                    }
                    Err(error) => {
                        return Err(LixError::post_commit_effect(format!(
                            "file data refresh for '{file_id}' in version '{version_id}' failed \
                             after {attempt} attempt(s): {}",
                            error.message
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    async fn refresh_file_data(
        &self,
        plugins: &[InstalledPlugin],
        file_id: &str,
        version_id: &str,
    ) -> Result<(), LixError> {
        let mut components = self.lock_components()?;
        let mut host = PluginHost {
            runtime: self.wasm_runtime.as_ref(),
            plugins,
            components: &mut components,
        };
        let mut conn = SqlConn::Backend(self.backend.as_ref());
        let materialized = materialize_file_data(&mut conn, &mut host, file_id, version_id).await?;
        if materialized.is_none() {
            conn.execute(
                "DELETE FROM lix_internal_file_data_cache WHERE file_id = $1 AND version_id = $2",
                &[
                    Value::Text(file_id.to_string()),
                    Value::Text(version_id.to_string()),
                ],
            )
            .await?;
        }
        Ok(())
    }

    pub(crate) async fn installed_plugins(&self) -> Result<Arc<Vec<InstalledPlugin>>, LixError> {
        if let Some(plugins) = self.read_lock(&self.installed_plugins_cache)?.clone() {
            return Ok(plugins);
        }
        let plugins = Arc::new(load_installed_plugins(self.backend.as_ref()).await?);
        *self.write_lock(&self.installed_plugins_cache)? = Some(Arc::clone(&plugins));
        Ok(plugins)
    }

    async fn schema_catalog(&self) -> Result<Arc<SchemaCatalog>, LixError> {
        if let Some(catalog) = self.read_lock(&self.schema_catalog_cache)?.clone() {
            return Ok(catalog);
        }

        let mut catalog = SchemaCatalog::with_builtin_schemas();
        let stored = self
            .backend
            .execute("SELECT definition FROM lix_internal_stored_schema", &[])
            .await?;
        for row in stored.rows {
            let Some(Value::Text(raw)) = row.first() else {
                continue;
            };
            let definition: serde_json::Value = serde_json::from_str(raw).map_err(|error| {
                LixError::invariant(format!("stored schema row is not valid JSON: {error}"))
            })?;
            let metadata = SchemaMetadata::from_definition(&definition)?;
            catalog.insert(metadata, definition);
        }

        let catalog = Arc::new(catalog);
        *self.write_lock(&self.schema_catalog_cache)? = Some(Arc::clone(&catalog));
        Ok(catalog)
    }

    fn invalidate_plugin_caches(&self, key: &str) -> Result<(), LixError> {
        *self.write_lock(&self.installed_plugins_cache)? = None;
        self.lock_components()?.remove(key);
        Ok(())
    }

    pub(crate) fn active_version_id(&self) -> Result<String, LixError> {
        Ok(self.read_lock_value(&self.active_version_id)?.clone())
    }

    fn active_version_id_mut(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, String>, LixError> {
        self.active_version_id
            .write()
            .map_err(|_| LixError::invariant("active version lock poisoned"))
    }

    fn read_lock_value<'a, T>(
        &self,
        lock: &'a RwLock<T>,
    ) -> Result<std::sync::RwLockReadGuard<'a, T>, LixError> {
        lock.read()
            .map_err(|_| LixError::invariant("engine lock poisoned"))
    }

    fn read_lock<'a, T>(
        &self,
        lock: &'a RwLock<Option<T>>,
    ) -> Result<std::sync::RwLockReadGuard<'a, Option<T>>, LixError> {
        lock.read()
            .map_err(|_| LixError::invariant("engine cache lock poisoned"))
    }

    fn write_lock<'a, T>(
        &self,
        lock: &'a RwLock<Option<T>>,
    ) -> Result<std::sync::RwLockWriteGuard<'a, Option<T>>, LixError> {
        lock.write()
            .map_err(|_| LixError::invariant("engine cache lock poisoned"))
    }

    fn lock_components(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, CachedPluginComponent>>, LixError> {
        self.plugin_component_cache
            .lock()
            .map_err(|_| LixError::invariant("plugin component cache lock poisoned"))
    }

    pub(crate) fn stream_bus(&self) -> &Arc<StateCommitStreamBus> {
        &self.state_commit_stream_bus
    }
}

#[cfg(not(target_arch = "wasm32"))]
async fn effect_backoff(attempt: u32) {
    let millis = 10u64 << attempt.min(6);
    futures_timer::Delay::new(std::time::Duration::from_millis(millis)).await;
}

#[cfg(target_arch = "wasm32")]
async fn effect_backoff(_attempt: u32) {}

/// An explicit user transaction. Post-commit effects queue for its duration
/// and flush exactly once on `commit()`; `rollback()` discards them.
#[must_use = "EngineTransaction must be committed or rolled back"]
pub struct EngineTransaction<'a> {
    engine: &'a Engine,
    transaction: Option<Box<dyn crate::LixTransaction + 'a>>,
    options: ExecuteOptions,
    active_version_id_override: Option<String>,
    pending_stream_changes: Vec<StateCommitStreamChange>,
    pending_file_refresh_targets: BTreeSet<(String, String)>,
    pending_schema_invalidation: bool,
}

impl EngineTransaction<'_> {
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult, LixError> {
        self.engine.ensure_open()?;

        let mut ctx = self.engine.planner_context().await?;
        if let Some(version_id) = &self.active_version_id_override {
            ctx.active_version_id = version_id.clone();
        }
        let plugin_matchers = {
            let plugins = self.engine.installed_plugins().await?;
            PlannerPlugins {
                matchers: plugins
                    .iter()
                    .map(|plugin| (plugin.key.clone(), plugin.path_glob.clone()))
                    .collect(),
            }
        };
        let plan = plan_script(sql, params, &ctx, &plugin_matchers)?;

        let plugins = self.engine.installed_plugins().await?;
        let transaction = self
            .transaction
            .as_mut()
            .ok_or_else(|| LixError::closed("transaction is no longer active"))?;

        let outcome = {
            let mut components = self.engine.lock_components()?;
            let mut host = PluginHost {
                runtime: self.engine.wasm_runtime.as_ref(),
                plugins: &plugins,
                components: &mut components,
            };
            let mut conn = SqlConn::Transaction(transaction.as_mut());
            if plan.requires_file_data() {
                refresh_missing_file_data(&mut conn, &mut host).await?;
            }
            let mut generate_uuid = generate_uuid_v7;
            run_plan(
                &mut conn,
                &mut host,
                &plan,
                self.options.writer_key.as_deref(),
                &now_timestamp(),
                &mut generate_uuid,
            )
            .await?
        };

        if let Some(version_id) = outcome.next_active_version_id {
            self.active_version_id_override = Some(version_id);
        }
        self.pending_schema_invalidation |= outcome.schemas_registered;
        self.pending_stream_changes.extend(outcome.stream_changes);
        self.pending_file_refresh_targets
            .extend(outcome.file_refresh_targets);
        Ok(outcome.result)
    }

    pub async fn commit(mut self) -> Result<(), LixError> {
        let transaction = self
            .transaction
            .take()
            .ok_or_else(|| LixError::closed("transaction is no longer active"))?;
        transaction.commit().await?;

        if let Some(version_id) = self.active_version_id_override.take() {
            *self.engine.active_version_id_mut()? = version_id;
        }
        if self.pending_schema_invalidation {
            *self.engine.write_lock(&self.engine.schema_catalog_cache)? = None;
        }

        let refresh_error = self
            .engine
            .run_file_refresh_effects(&std::mem::take(&mut self.pending_file_refresh_targets))
            .await
            .err();
        self.engine
            .stream_bus()
            .emit(std::mem::take(&mut self.pending_stream_changes));

        match refresh_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub async fn rollback(mut self) -> Result<(), LixError> {
        let transaction = self
            .transaction
            .take()
            .ok_or_else(|| LixError::closed("transaction is no longer active"))?;
        transaction.rollback().await
    }
}

impl Drop for EngineTransaction<'_> {
    fn drop(&mut self) {
        if self.transaction.is_some() && !std::thread::panicking() {
            panic!("EngineTransaction dropped without commit() or rollback()");
        }
    }
}
