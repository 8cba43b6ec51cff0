use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::builtin_schema::{builtin_schema_definition, builtin_schema_keys};
use crate::schema_definition::{parse_json_pointer, validate_lix_schema_definition};
use crate::LixError;

/// Metadata derived from a stored schema document, used by the planner to
/// classify entity views and synthesize snapshots from column assignments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SchemaMetadata {
    pub(crate) schema_key: String,
    pub(crate) schema_version: String,
    pub(crate) primary_key: Vec<String>,
    pub(crate) properties: Vec<String>,
}

impl SchemaMetadata {
    pub(crate) fn from_definition(definition: &JsonValue) -> Result<Self, LixError> {
        validate_lix_schema_definition(definition)?;

        let schema_key = definition
            .get("x-lix-key")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| LixError::planner("stored schema must define string x-lix-key"))?
            .to_string();
        let schema_version = definition
            .get("x-lix-version")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| LixError::planner("stored schema must define string x-lix-version"))?
            .to_string();

        let properties = definition
            .get("properties")
            .and_then(JsonValue::as_object)
            .map(|object| object.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();

        let mut primary_key = Vec::new();
        if let Some(pointers) = definition
            .get("x-lix-primary-key")
            .and_then(JsonValue::as_array)
        {
            for pointer in pointers {
                let Some(pointer) = pointer.as_str() else {
                    continue;
                };
                let segments = parse_json_pointer(pointer)?;
                let Some(first) = segments.into_iter().next() else {
                    continue;
                };
                primary_key.push(first);
            }
        }

        Ok(Self {
            schema_key,
            schema_version,
            primary_key,
            properties,
        })
    }

    /// Derives the entity id from a snapshot: primary-key values joined with
    /// `~`, falling back to an `id` property when no primary key is declared.
    pub(crate) fn entity_id_from_snapshot(&self, snapshot: &JsonValue) -> Result<String, LixError> {
        let key_properties: Vec<&str> = if self.primary_key.is_empty() {
            vec!["id"]
        } else {
            self.primary_key.iter().map(String::as_str).collect()
        };

        let mut parts = Vec::with_capacity(key_properties.len());
        for property in key_properties {
            let value = snapshot.get(property).ok_or_else(|| {
                LixError::planner(format!(
                    "snapshot for schema '{}' is missing primary key property '{property}'",
                    self.schema_key
                ))
            })?;
            let part = match value {
                JsonValue::String(text) => text.clone(),
                JsonValue::Number(number) => number.to_string(),
                JsonValue::Bool(flag) => flag.to_string(),
                other => {
                    return Err(LixError::planner(format!(
                        "primary key property '{property}' of schema '{}' must be scalar, got {other}",
                        self.schema_key
                    )))
                }
            };
            parts.push(part);
        }
        Ok(parts.join("~"))
    }
}

/// Immutable snapshot of all registered schemas (builtin + stored), handed to
/// the planner so planning stays free of I/O.
#[derive(Debug, Clone, Default)]
pub(crate) struct SchemaCatalog {
    by_key: BTreeMap<String, SchemaMetadata>,
    definitions: BTreeMap<String, JsonValue>,
}

impl SchemaCatalog {
    pub(crate) fn with_builtin_schemas() -> Self {
        let mut catalog = Self::default();
        for key in builtin_schema_keys() {
            let definition =
                builtin_schema_definition(key).expect("builtin schema keys enumerate definitions");
            let metadata = SchemaMetadata::from_definition(definition)
                .expect("builtin schemas must satisfy the meta schema");
            catalog.insert(metadata, definition.clone());
        }
        catalog
    }

    pub(crate) fn insert(&mut self, metadata: SchemaMetadata, definition: JsonValue) {
        self.definitions
            .insert(metadata.schema_key.clone(), definition);
        self.by_key.insert(metadata.schema_key.clone(), metadata);
    }

    pub(crate) fn get(&self, schema_key: &str) -> Option<&SchemaMetadata> {
        self.by_key.get(schema_key)
    }

    pub(crate) fn definition(&self, schema_key: &str) -> Option<&JsonValue> {
        self.definitions.get(schema_key)
    }
}
