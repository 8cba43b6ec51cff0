use std::sync::Arc;

use async_trait::async_trait;

use crate::LixError;

/// Default memory ceiling for one plugin instance.
pub const DEFAULT_PLUGIN_MEMORY_LIMIT: u64 = 64 * 1024 * 1024;

/// Resource bounds the host enforces on a plugin component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WasmLimits {
    pub max_memory_bytes: u64,
    pub max_fuel: Option<u64>,
    pub timeout_ms: Option<u64>,
}

impl WasmLimits {
    pub fn with_max_memory(max_memory_bytes: u64) -> Self {
        Self {
            max_memory_bytes,
            max_fuel: None,
            timeout_ms: None,
        }
    }
}

impl Default for WasmLimits {
    fn default() -> Self {
        Self::with_max_memory(DEFAULT_PLUGIN_MEMORY_LIMIT)
    }
}

/// Host for wasm-component plugins. Implementations grant no ambient
/// authority: no network, no filesystem, no clocks or randomness beyond what
/// the engine passes in, and no state carried between calls.
#[async_trait(?Send)]
pub trait WasmRuntime: Send + Sync {
    async fn init_component(
        &self,
        bytes: Vec<u8>,
        limits: WasmLimits,
    ) -> Result<Arc<dyn WasmComponentInstance>, LixError>;
}

/// A loaded component. `call` passes the payload by value and returns the
/// export's raw output bytes.
#[async_trait(?Send)]
pub trait WasmComponentInstance: Send + Sync {
    async fn call(&self, export: &str, input: &[u8]) -> Result<Vec<u8>, LixError>;

    async fn close(&self) -> Result<(), LixError> {
        Ok(())
    }
}

/// Placeholder runtime for instances that never touch files: any plugin work
/// fails with a `Plugin` error.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWasmRuntime;

#[async_trait(?Send)]
impl WasmRuntime for NoopWasmRuntime {
    async fn init_component(
        &self,
        _bytes: Vec<u8>,
        _limits: WasmLimits,
    ) -> Result<Arc<dyn WasmComponentInstance>, LixError> {
        Err(LixError::plugin(
            "wasm runtime is required to execute plugins; provide a non-noop runtime",
        ))
    }
}
