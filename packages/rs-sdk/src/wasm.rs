use async_trait::async_trait;
use lix_engine::{LixError, WasmComponentInstance, WasmLimits, WasmRuntime};
use std::sync::Arc;
use wasmtime::component::{Component, Linker};
use wasmtime::{Config, Engine, Store, StoreLimits, StoreLimitsBuilder};

/// `wasmtime` component-model host. No WASI, no ambient authority: the only
/// thing a plugin can do is transform the bytes it is handed.
pub struct WasmtimeRuntime {
    engine: Engine,
}

impl WasmtimeRuntime {
    pub fn new() -> Result<Self, LixError> {
        let mut config = Config::new();
        config.wasm_component_model(true);
        let engine =
            Engine::new(&config).map_err(|err| LixError::plugin(err.to_string()))?;
        Ok(Self { engine })
    }
}

#[async_trait(?Send)]
impl WasmRuntime for WasmtimeRuntime {
    async fn init_component(
        &self,
        bytes: Vec<u8>,
        limits: WasmLimits,
    ) -> Result<Arc<dyn WasmComponentInstance>, LixError> {
        let component = Component::new(&self.engine, &bytes)
            .map_err(|err| LixError::plugin(format!("invalid wasm component: {err}")))?;
        Ok(Arc::new(WasmtimeComponentInstance {
            engine: self.engine.clone(),
            component,
            limits,
        }))
    }
}

struct WasmtimeComponentInstance {
    engine: Engine,
    component: Component,
    limits: WasmLimits,
}

struct CallState {
    limits: StoreLimits,
}

#[async_trait(?Send)]
impl WasmComponentInstance for WasmtimeComponentInstance {
    async fn call(&self, export: &str, input: &[u8]) -> Result<Vec<u8>, LixError> {
        // Fresh store per call: the sandbox resets plugin state between
        // invocations.
        let max_memory = usize::try_from(self.limits.max_memory_bytes).unwrap_or(usize::MAX);
        let mut store = Store::new(
            &self.engine,
            CallState {
                limits: StoreLimitsBuilder::new().memory_size(max_memory).build(),
            },
        );
        store.limiter(|state| &mut state.limits);

        let linker: Linker<CallState> = Linker::new(&self.engine);
        let instance = linker
            .instantiate(&mut store, &self.component)
            .map_err(|err| LixError::plugin(format!("failed to instantiate plugin: {err}")))?;

        let func = instance
            .get_func(&mut store, export)
            .ok_or_else(|| LixError::plugin(format!("plugin has no export '{export}'")))?;
        let typed = func
            .typed::<(Vec<u8>,), (Vec<u8>,)>(&store)
            .map_err(|err| {
                LixError::plugin(format!(
                    "plugin export '{export}' has an unexpected signature: {err}"
                ))
            })?;
        let (output,) = typed
            .call(&mut store, (input.to_vec(),))
            .map_err(|err| LixError::plugin(format!("plugin call '{export}' failed: {err}")))?;
        typed
            .post_return(&mut store)
            .map_err(|err| LixError::plugin(format!("plugin post-return failed: {err}")))?;
        Ok(output)
    }
}
