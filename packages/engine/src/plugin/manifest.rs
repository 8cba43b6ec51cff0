use std::sync::OnceLock;

use globset::Glob;
use jsonschema::JSONSchema;
use serde_json::Value as JsonValue;

use crate::plugin::types::{PluginManifest, ValidatedPluginManifest};
use crate::LixError;

static PLUGIN_MANIFEST_SCHEMA: OnceLock<JsonValue> = OnceLock::new();
static PLUGIN_MANIFEST_VALIDATOR: OnceLock<Result<JSONSchema, LixError>> = OnceLock::new();

pub(crate) fn parse_plugin_manifest_json(raw: &str) -> Result<ValidatedPluginManifest, LixError> {
    let manifest_json: JsonValue = serde_json::from_str(raw)
        .map_err(|error| LixError::plugin(format!("plugin manifest must be valid JSON: {error}")))?;

    validate_plugin_manifest_json(&manifest_json)?;

    let manifest: PluginManifest = serde_json::from_value(manifest_json.clone()).map_err(|error| {
        LixError::plugin(format!(
            "plugin manifest does not match expected shape: {error}"
        ))
    })?;
    validate_path_glob(&manifest.file_match.path_glob)?;

    let normalized_json = serde_json::to_string(&manifest_json).map_err(|error| {
        LixError::plugin(format!("failed to normalize plugin manifest JSON: {error}"))
    })?;

    Ok(ValidatedPluginManifest {
        manifest,
        normalized_json,
    })
}

fn validate_path_glob(glob: &str) -> Result<(), LixError> {
    Glob::new(glob).map_err(|error| {
        LixError::plugin(format!(
            "invalid plugin manifest: match.path_glob is invalid: {error}"
        ))
    })?;
    Ok(())
}

fn validate_plugin_manifest_json(manifest: &JsonValue) -> Result<(), LixError> {
    let validator = plugin_manifest_validator()?;
    if let Err(errors) = validator.validate(manifest) {
        let details = format_validation_errors(errors);
        return Err(LixError::plugin(format!(
            "invalid plugin manifest: {details}"
        )));
    }
    Ok(())
}

fn plugin_manifest_validator() -> Result<&'static JSONSchema, LixError> {
    let result = PLUGIN_MANIFEST_VALIDATOR.get_or_init(|| {
        JSONSchema::options()
            .with_meta_schemas()
            .compile(plugin_manifest_schema())
            .map_err(|error| {
                LixError::plugin(format!("failed to compile plugin manifest schema: {error}"))
            })
    });

    match result {
        Ok(schema) => Ok(schema),
        Err(error) => Err(error.clone()),
    }
}

fn plugin_manifest_schema() -> &'static JsonValue {
    PLUGIN_MANIFEST_SCHEMA.get_or_init(|| {
        let raw = include_str!("manifest.schema.json");
        serde_json::from_str(raw).expect("manifest.schema.json must be valid JSON")
    })
}

fn format_validation_errors<'a>(
    errors: impl Iterator<Item = jsonschema::ValidationError<'a>>,
) -> String {
    let mut parts = Vec::new();
    for error in errors {
        let path = error.instance_path.to_string();
        let message = error.to_string();
        if path.is_empty() {
            parts.push(message);
        } else {
            parts.push(format!("{path} {message}"));
        }
    }
    if parts.is_empty() {
        "unknown validation error".to_string()
    } else {
        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::parse_plugin_manifest_json;
    use crate::LixErrorCode;

    #[test]
    fn parses_valid_manifest() {
        let validated = parse_plugin_manifest_json(
            r#"{
                "key": "plugin_json",
                "runtime": "wasm-component-v1",
                "api_version": "0.1.0",
                "match": { "path_glob": "*.json" }
            }"#,
        )
        .expect("manifest should parse");

        assert_eq!(validated.manifest.key, "plugin_json");
        assert_eq!(validated.manifest.entry_or_default(), "plugin.wasm");
        assert!(validated.manifest.schemas.is_empty());
    }

    #[test]
    fn rejects_manifest_without_key() {
        let err = parse_plugin_manifest_json(
            r#"{
                "runtime": "wasm-component-v1",
                "api_version": "0.1.0",
                "match": { "path_glob": "*.json" }
            }"#,
        )
        .expect_err("manifest should be invalid");

        assert_eq!(err.code, LixErrorCode::Plugin);
        assert!(err.message.contains("key"));
    }

    #[test]
    fn rejects_unknown_runtime() {
        let err = parse_plugin_manifest_json(
            r#"{
                "key": "plugin_json",
                "runtime": "native",
                "api_version": "0.1.0",
                "match": { "path_glob": "*.json" }
            }"#,
        )
        .expect_err("manifest should be invalid");
        assert!(err.message.contains("invalid plugin manifest"));
    }

    #[test]
    fn rejects_invalid_path_glob() {
        let err = parse_plugin_manifest_json(
            r#"{
                "key": "plugin_markdown",
                "runtime": "wasm-component-v1",
                "api_version": "0.1.0",
                "match": { "path_glob": "*.{md,mdx" }
            }"#,
        )
        .expect_err("invalid glob should fail");

        assert!(err.message.contains("path_glob"));
    }
}
