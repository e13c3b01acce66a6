//! A registry from schema name to a lightweight validator/decoder, per §9's
//! design note: "replace free-form type names with a registry from string tag
//! → decoder closure; tags are still emitted on the wire, but reconstruction
//! is a table lookup, not dynamic import."
//!
//! Reconstructing a *concrete* Rust type from a tag is a compile-time
//! concern handled by `serde_json::from_value::<T>` at the call site (Rust
//! has no dynamic-import analogue); what this registry actually owns is the
//! wire-level contract — the JSON Schema shape each tag names, used to
//! validate payload/state/result values structurally before they cross the
//! process boundary.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaValidationError {
    #[error("unknown schema: {0}")]
    UnknownSchema(String),
    #[error("value does not match schema {schema}: {reason}")]
    Mismatch { schema: String, reason: String },
}

/// Registered schemas, keyed by the tag recorded alongside typed values
/// (`TypedValue::schema_name`). A schema entry is itself a JSON value in the
/// conventional subset of JSON Schema this crate understands: `{"type":
/// "object", "required": [...], "properties": {...}}` for objects, or a bare
/// `{"type": "string"|"number"|"boolean"|"array"}` for scalars.
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, Value>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, schema: Value) {
        self.schemas.write().unwrap().insert(name.into(), schema);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.schemas.read().unwrap().get(name).cloned()
    }

    /// Structurally validates `value` against the schema tagged `name`.
    /// Only checks object-shape and declared-type invariants — this is a
    /// boundary guard against malformed payloads, not a full JSON Schema
    /// implementation.
    pub fn validate(&self, name: &str, value: &Value) -> Result<(), SchemaValidationError> {
        let schema = self
            .get(name)
            .ok_or_else(|| SchemaValidationError::UnknownSchema(name.to_string()))?;
        validate_value(name, &schema, value)
    }
}

fn validate_value(name: &str, schema: &Value, value: &Value) -> Result<(), SchemaValidationError> {
    let Some(declared_type) = schema.get("type").and_then(Value::as_str) else {
        return Ok(());
    };
    let type_matches = match declared_type {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    };
    if !type_matches {
        return Err(SchemaValidationError::Mismatch {
            schema: name.to_string(),
            reason: format!("expected type {declared_type}, got {value}"),
        });
    }
    if declared_type == "object" {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            let obj = value.as_object().expect("checked above");
            for field in required {
                let Some(field_name) = field.as_str() else {
                    continue;
                };
                if !obj.contains_key(field_name) {
                    return Err(SchemaValidationError::Mismatch {
                        schema: name.to_string(),
                        reason: format!("missing required field {field_name}"),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_missing_required_field() {
        let registry = SchemaRegistry::new();
        registry.register(
            "Person",
            json!({"type": "object", "required": ["name"], "properties": {"name": {"type": "string"}}}),
        );
        let result = registry.validate("Person", &json!({"age": 5}));
        assert!(result.is_err());
    }

    #[test]
    fn accepts_conforming_value() {
        let registry = SchemaRegistry::new();
        registry.register("Person", json!({"type": "object", "required": ["name"]}));
        let result = registry.validate("Person", &json!({"name": "Ada"}));
        assert!(result.is_ok());
    }

    #[test]
    fn unknown_schema_is_rejected() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.validate("Nope", &json!({})),
            Err(SchemaValidationError::UnknownSchema(_))
        ));
    }
}
