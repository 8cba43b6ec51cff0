use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginRuntime {
    WasmComponentV1,
}

impl PluginRuntime {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WasmComponentV1 => "wasm-component-v1",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "wasm-component-v1" => Some(Self::WasmComponentV1),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub key: String,
    pub runtime: PluginRuntime,
    pub api_version: String,
    #[serde(rename = "match")]
    pub file_match: PluginMatch,
    #[serde(default)]
    pub entry: Option<String>,
    /// Archive-relative paths of stored-schema documents the plugin brings
    /// along (`schema/*.json`).
    #[serde(default)]
    pub schemas: Vec<String>,
}

impl PluginManifest {
    pub fn entry_or_default(&self) -> &str {
        self.entry.as_deref().unwrap_or("plugin.wasm")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMatch {
    pub path_glob: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPluginManifest {
    pub manifest: PluginManifest,
    pub normalized_json: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPlugin {
    pub key: String,
    pub runtime: PluginRuntime,
    pub api_version: String,
    pub path_glob: String,
    pub entry: String,
    pub manifest_json: String,
    pub wasm: Vec<u8>,
    pub wasm_hash: String,
}
