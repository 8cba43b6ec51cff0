use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::engine::Engine;
use crate::{LixBackend, WasmRuntime};

/// A `lix_key_value` row seeded on first boot of a fresh database.
#[derive(Debug, Clone)]
pub struct BootKeyValue {
    pub key: String,
    pub value: JsonValue,
    pub version_id: Option<String>,
}

pub struct BootArgs {
    pub backend: Box<dyn LixBackend + Send + Sync>,
    pub wasm_runtime: Arc<dyn WasmRuntime>,
    pub key_values: Vec<BootKeyValue>,
    pub access_to_internal: bool,
}

impl BootArgs {
    pub fn new(
        backend: Box<dyn LixBackend + Send + Sync>,
        wasm_runtime: Arc<dyn WasmRuntime>,
    ) -> Self {
        Self {
            backend,
            wasm_runtime,
            key_values: Vec::new(),
            access_to_internal: false,
        }
    }
}

pub fn boot(args: BootArgs) -> Engine {
    Engine::from_boot_args(args)
}
