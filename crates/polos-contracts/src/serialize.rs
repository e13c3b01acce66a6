//! Canonical JSON-safe conversion and typed schema-name tagging (C10).
//!
//! Grounded in the original SDK's `polos/utils/serializer.py` (`serialize`,
//! `deserialize`, `safe_serialize`) and the "Typed schemas" design note in §9:
//! the source tags values with a fully-qualified class path so a parent
//! execution can reconstruct them; here the tag is a registry key a decoder
//! table looks up (see `polos_runtime::registry::SchemaRegistry`), not a
//! dynamic import.

use serde::Serialize;
use thiserror::Error;

/// Default cap on a serialized initial-state/payload blob, per the data
/// model's "payload/state size limits" and testable property 11.
pub const MAX_STATE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("value serializes to {actual} bytes, exceeding the {limit} byte limit")]
pub struct SizeLimitError {
    pub actual: usize,
    pub limit: usize,
}

/// A JSON value tagged with the registered name of the Rust type it came
/// from, so the receiving side can look up a decoder instead of guessing.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TypedValue {
    pub schema_name: Option<String>,
    pub value: serde_json::Value,
}

impl TypedValue {
    pub fn untyped(value: serde_json::Value) -> Self {
        Self {
            schema_name: None,
            value,
        }
    }

    pub fn typed(schema_name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            schema_name: Some(schema_name.into()),
            value,
        }
    }
}

/// Serializes `value` to JSON and checks it against `limit`, matching the
/// "size guard" invariant (property 11): the check happens before any network
/// call is made by the caller.
pub fn serialize_with_limit<T: Serialize>(
    value: &T,
    limit: usize,
) -> Result<serde_json::Value, SizeLimitError> {
    let json = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
    let actual = serde_json::to_vec(&json).map(|v| v.len()).unwrap_or(0);
    if actual > limit {
        return Err(SizeLimitError { actual, limit });
    }
    Ok(json)
}

/// Best-effort JSON-safe serialization used for telemetry/argument logging
/// only (never for the real invocation, per §4.2's `run` contract). Falls
/// back to a string representation tag rather than failing, mirroring
/// `safe_serialize` in the original SDK.
pub fn safe_serialize<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| serde_json::json!({"__unserializable__": e.to_string()}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_limit_passes() {
        let v = serde_json::json!({"a": 1});
        assert!(serialize_with_limit(&v, MAX_STATE_BYTES).is_ok());
    }

    #[test]
    fn over_limit_rejected_before_use() {
        let big = "x".repeat(MAX_STATE_BYTES + 1);
        let err = serialize_with_limit(&big, MAX_STATE_BYTES).unwrap_err();
        assert!(err.actual > MAX_STATE_BYTES);
    }

    #[test]
    fn safe_serialize_never_panics_on_plain_values() {
        let v = safe_serialize(&42);
        assert_eq!(v, serde_json::json!(42));
    }
}
