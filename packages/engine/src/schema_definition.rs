use jsonschema::JSONSchema;
use serde_json::Value as JsonValue;
use std::sync::OnceLock;

use crate::LixError;

static LIX_SCHEMA_DEFINITION: OnceLock<JsonValue> = OnceLock::new();
static LIX_SCHEMA_VALIDATOR: OnceLock<Result<JSONSchema, LixError>> = OnceLock::new();

/// The meta-schema every stored schema document must satisfy.
pub fn lix_schema_definition() -> &'static JsonValue {
    LIX_SCHEMA_DEFINITION.get_or_init(|| {
        let raw = include_str!("schema_definition.json");
        serde_json::from_str(raw).expect("schema_definition.json must be valid JSON")
    })
}

pub fn lix_schema_definition_json() -> &'static str {
    include_str!("schema_definition.json")
}

pub fn validate_lix_schema_definition(schema: &JsonValue) -> Result<(), LixError> {
    let validator = lix_schema_validator()?;
    if let Err(errors) = validator.validate(schema) {
        let details = format_validation_errors(errors);
        return Err(LixError::planner(format!(
            "invalid Lix schema definition: {details}"
        )));
    }

    assert_primary_key_pointers(schema)?;

    Ok(())
}

/// Validates `data` against a stored schema document, after validating the
/// document itself.
pub fn validate_lix_schema(schema: &JsonValue, data: &JsonValue) -> Result<(), LixError> {
    validate_lix_schema_definition(schema)?;

    let validator = compile_schema(schema)?;
    if let Err(errors) = validator.validate(data) {
        let details = format_validation_errors(errors);
        return Err(LixError::planner(format!(
            "snapshot validation failed: {details}"
        )));
    }

    Ok(())
}

fn lix_schema_validator() -> Result<&'static JSONSchema, LixError> {
    let result = LIX_SCHEMA_VALIDATOR.get_or_init(|| compile_schema(lix_schema_definition()));
    match result {
        Ok(schema) => Ok(schema),
        Err(err) => Err(err.clone()),
    }
}

fn compile_schema(schema: &JsonValue) -> Result<JSONSchema, LixError> {
    let mut options = JSONSchema::options();
    options.with_meta_schemas();
    options.with_format("json-pointer", is_json_pointer);

    options
        .compile(schema)
        .map_err(|err| LixError::planner(format!("failed to compile Lix schema: {err}")))
}

fn is_json_pointer(value: &str) -> bool {
    parse_json_pointer(value).is_ok()
}

pub(crate) fn parse_json_pointer(pointer: &str) -> Result<Vec<String>, LixError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    if !pointer.starts_with('/') {
        return Err(LixError::planner(format!(
            "invalid JSON pointer '{pointer}'"
        )));
    }

    let mut segments = Vec::new();
    for raw in pointer[1..].split('/') {
        segments.push(unescape_pointer_segment(pointer, raw)?);
    }
    Ok(segments)
}

fn unescape_pointer_segment(pointer: &str, segment: &str) -> Result<String, LixError> {
    let mut out = String::new();
    let mut chars = segment.chars();
    while let Some(ch) = chars.next() {
        if ch == '~' {
            match chars.next() {
                Some('0') => out.push('~'),
                Some('1') => out.push('/'),
                _ => {
                    return Err(LixError::planner(format!(
                        "invalid JSON pointer '{pointer}'"
                    )))
                }
            }
        } else {
            out.push(ch);
        }
    }
    Ok(out)
}

fn assert_primary_key_pointers(schema: &JsonValue) -> Result<(), LixError> {
    let Some(primary_key) = schema
        .get("x-lix-primary-key")
        .and_then(|value| value.as_array())
    else {
        return Ok(());
    };

    for pointer in primary_key {
        let Some(pointer) = pointer.as_str() else {
            continue;
        };
        let segments = parse_json_pointer(pointer)?;
        if segments.is_empty() || !schema_has_property(schema, &segments) {
            return Err(LixError::planner(format!(
                "invalid Lix schema definition: x-lix-primary-key references missing property \"{pointer}\""
            )));
        }
    }

    Ok(())
}

fn schema_has_property(schema: &JsonValue, segments: &[String]) -> bool {
    let mut node = schema;
    for segment in segments {
        let Some(properties) = node.get("properties").and_then(JsonValue::as_object) else {
            return false;
        };
        let Some(next) = properties.get(segment) else {
            return false;
        };
        node = next;
    }
    true
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
    use serde_json::json;

    use super::{validate_lix_schema, validate_lix_schema_definition};

    #[test]
    fn accepts_a_minimal_schema_definition() {
        let schema = json!({
            "x-lix-key": "demo_entity",
            "x-lix-version": "1",
            "x-lix-primary-key": ["/id"],
            "type": "object",
            "properties": { "id": { "type": "string" } }
        });
        validate_lix_schema_definition(&schema).expect("schema should validate");
    }

    #[test]
    fn rejects_primary_key_on_missing_property() {
        let schema = json!({
            "x-lix-key": "demo_entity",
            "x-lix-version": "1",
            "x-lix-primary-key": ["/missing"],
            "type": "object",
            "properties": { "id": { "type": "string" } }
        });
        let err = validate_lix_schema_definition(&schema).expect_err("should reject");
        assert!(err.message.contains("x-lix-primary-key"));
    }

    #[test]
    fn rejects_schema_key_with_uppercase_characters() {
        let schema = json!({
            "x-lix-key": "DemoEntity",
            "x-lix-version": "1",
            "type": "object",
            "properties": {}
        });
        assert!(validate_lix_schema_definition(&schema).is_err());
    }

    #[test]
    fn validates_snapshot_content_against_schema() {
        let schema = json!({
            "x-lix-key": "demo_entity",
            "x-lix-version": "1",
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"]
        });
        validate_lix_schema(&schema, &json!({ "id": "a" })).expect("data should validate");
        assert!(validate_lix_schema(&schema, &json!({ "id": 7 })).is_err());
    }
}
