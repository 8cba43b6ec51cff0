use std::io::{Cursor, Read};

use crate::plugin::manifest::parse_plugin_manifest_json;
use crate::plugin::types::ValidatedPluginManifest;
use crate::schema_catalog::SchemaMetadata;
use crate::{LixBackend, LixError, Value};

/// Installation input: raw parts, or an archive containing `manifest.json`,
/// the wasm entry and any `schema/*.json` documents the manifest references.
pub enum PluginInstallInput {
    Parts {
        manifest_json: String,
        wasm_bytes: Vec<u8>,
    },
    Archive {
        archive_bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPluginResult {
    pub key: String,
    /// `false` when the identical plugin was already installed (no-op).
    pub updated: bool,
}

pub(crate) async fn install_plugin(
    backend: &dyn LixBackend,
    input: PluginInstallInput,
    timestamp: &str,
) -> Result<InstallPluginResult, LixError> {
    let unpacked = unpack_install_input(input)?;
    let validated = unpacked.manifest;
    let manifest = &validated.manifest;
    let wasm_hash = blake3::hash(&unpacked.wasm_bytes).to_hex().to_string();

    let existing = backend
        .execute(
            "SELECT manifest_json, wasm_hash FROM lix_internal_plugin WHERE key = $1",
            &[Value::Text(manifest.key.clone())],
        )
        .await?;
    if let Some(row) = existing.rows.first() {
        let same_manifest =
            row.first().and_then(Value::as_text) == Some(validated.normalized_json.as_str());
        let same_wasm = row.get(1).and_then(Value::as_text) == Some(wasm_hash.as_str());
        if same_manifest && same_wasm {
            return Ok(InstallPluginResult {
                key: manifest.key.clone(),
                updated: false,
            });
        }
    }

    for schema in &unpacked.schemas {
        register_plugin_schema(backend, schema, timestamp).await?;
    }

    backend
        .execute(
            "INSERT INTO lix_internal_plugin \
             (key, runtime, api_version, match_path_glob, entry, manifest_json, wasm, wasm_hash, \
              created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
             ON CONFLICT (key) DO UPDATE SET \
               runtime = excluded.runtime, \
               api_version = excluded.api_version, \
               match_path_glob = excluded.match_path_glob, \
               entry = excluded.entry, \
               manifest_json = excluded.manifest_json, \
               wasm = excluded.wasm, \
               wasm_hash = excluded.wasm_hash, \
               updated_at = excluded.updated_at",
            &[
                Value::Text(manifest.key.clone()),
                Value::Text(manifest.runtime.as_str().to_string()),
                Value::Text(manifest.api_version.clone()),
                Value::Text(manifest.file_match.path_glob.clone()),
                Value::Text(manifest.entry_or_default().to_string()),
                Value::Text(validated.normalized_json.clone()),
                Value::Blob(unpacked.wasm_bytes),
                Value::Text(wasm_hash),
                Value::Text(timestamp.to_string()),
            ],
        )
        .await?;

    Ok(InstallPluginResult {
        key: manifest.key.clone(),
        updated: true,
    })
}

struct UnpackedInstallInput {
    manifest: ValidatedPluginManifest,
    wasm_bytes: Vec<u8>,
    schemas: Vec<serde_json::Value>,
}

fn unpack_install_input(input: PluginInstallInput) -> Result<UnpackedInstallInput, LixError> {
    match input {
        PluginInstallInput::Parts {
            manifest_json,
            wasm_bytes,
        } => {
            let manifest = parse_plugin_manifest_json(&manifest_json)?;
            if !manifest.manifest.schemas.is_empty() {
                return Err(LixError::plugin(
                    "manifest references schema documents; install the plugin as an archive",
                ));
            }
            Ok(UnpackedInstallInput {
                manifest,
                wasm_bytes,
                schemas: Vec::new(),
            })
        }
        PluginInstallInput::Archive { archive_bytes } => unpack_archive(&archive_bytes),
    }
}

fn unpack_archive(archive_bytes: &[u8]) -> Result<UnpackedInstallInput, LixError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive_bytes))
        .map_err(|error| LixError::plugin(format!("plugin archive is not a valid zip: {error}")))?;

    let manifest_json = read_archive_text(&mut archive, "manifest.json")?;
    let manifest = parse_plugin_manifest_json(&manifest_json)?;

    let entry = manifest.manifest.entry_or_default().to_string();
    let wasm_bytes = read_archive_bytes(&mut archive, &entry)?;

    let mut schemas = Vec::new();
    for schema_path in &manifest.manifest.schemas {
        let raw = read_archive_text(&mut archive, schema_path)?;
        let parsed = serde_json::from_str(&raw).map_err(|error| {
            LixError::plugin(format!(
                "plugin schema document '{schema_path}' is not valid JSON: {error}"
            ))
        })?;
        schemas.push(parsed);
    }

    Ok(UnpackedInstallInput {
        manifest,
        wasm_bytes,
        schemas,
    })
}

fn read_archive_text(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<String, LixError> {
    let bytes = read_archive_bytes(archive, name)?;
    String::from_utf8(bytes)
        .map_err(|_| LixError::plugin(format!("plugin archive entry '{name}' is not UTF-8")))
}

fn read_archive_bytes(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, LixError> {
    let mut file = archive.by_name(name).map_err(|error| {
        LixError::plugin(format!("plugin archive is missing '{name}': {error}"))
    })?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|error| LixError::plugin(format!("failed to read archive entry '{name}': {error}")))?;
    Ok(bytes)
}

async fn register_plugin_schema(
    backend: &dyn LixBackend,
    definition: &serde_json::Value,
    timestamp: &str,
) -> Result<(), LixError> {
    let metadata = SchemaMetadata::from_definition(definition)?;
    backend
        .execute(
            "INSERT INTO lix_internal_stored_schema (schema_key, schema_version, definition, created_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (schema_key, schema_version) DO UPDATE SET definition = excluded.definition",
            &[
                Value::Text(metadata.schema_key),
                Value::Text(metadata.schema_version),
                Value::Text(definition.to_string()),
                Value::Text(timestamp.to_string()),
            ],
        )
        .await?;
    Ok(())
}
