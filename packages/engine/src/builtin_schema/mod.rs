use serde_json::Value as JsonValue;
use std::sync::OnceLock;

const LIX_KEY_VALUE_JSON: &str = include_str!("lix_key_value.json");
const LIX_FILE_DESCRIPTOR_JSON: &str = include_str!("lix_file_descriptor.json");
const LIX_DIRECTORY_DESCRIPTOR_JSON: &str = include_str!("lix_directory_descriptor.json");
const LIX_ACCOUNT_JSON: &str = include_str!("lix_account.json");
const LIX_LABEL_JSON: &str = include_str!("lix_label.json");
const LIX_ENTITY_LABEL_JSON: &str = include_str!("lix_entity_label.json");
const LIX_STORED_SCHEMA_JSON: &str = include_str!("lix_stored_schema.json");

const BUILTIN_SCHEMAS: &[(&str, &str)] = &[
    ("lix_key_value", LIX_KEY_VALUE_JSON),
    ("lix_file_descriptor", LIX_FILE_DESCRIPTOR_JSON),
    ("lix_directory_descriptor", LIX_DIRECTORY_DESCRIPTOR_JSON),
    ("lix_account", LIX_ACCOUNT_JSON),
    ("lix_label", LIX_LABEL_JSON),
    ("lix_entity_label", LIX_ENTITY_LABEL_JSON),
    ("lix_stored_schema", LIX_STORED_SCHEMA_JSON),
];

static PARSED: OnceLock<Vec<(&'static str, JsonValue)>> = OnceLock::new();

fn parsed_schemas() -> &'static [(&'static str, JsonValue)] {
    PARSED.get_or_init(|| {
        BUILTIN_SCHEMAS
            .iter()
            .map(|(key, raw)| {
                let parsed = serde_json::from_str(raw).unwrap_or_else(|error| {
                    panic!("builtin schema '{key}' must contain valid JSON: {error}")
                });
                (*key, parsed)
            })
            .collect()
    })
}

pub(crate) fn builtin_schema_keys() -> Vec<&'static str> {
    BUILTIN_SCHEMAS.iter().map(|(key, _)| *key).collect()
}

pub(crate) fn builtin_schema_definition(schema_key: &str) -> Option<&'static JsonValue> {
    parsed_schemas()
        .iter()
        .find(|(key, _)| *key == schema_key)
        .map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use super::{builtin_schema_definition, builtin_schema_keys};
    use crate::schema_definition::validate_lix_schema_definition;

    #[test]
    fn every_builtin_schema_satisfies_the_meta_schema() {
        for key in builtin_schema_keys() {
            let schema = builtin_schema_definition(key).expect("schema should exist");
            validate_lix_schema_definition(schema)
                .unwrap_or_else(|error| panic!("builtin schema '{key}' invalid: {error}"));
            assert_eq!(
                schema.get("x-lix-key").and_then(|value| value.as_str()),
                Some(key)
            );
        }
    }
}
