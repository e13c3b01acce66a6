//! W3C trace context propagation and the deterministic root trace ID rule.
//!
//! Grounded in `durable::persistence::store::TraceContext` (`{trace_id, span_id,
//! trace_flags}`) and §4.2's telemetry invariants / testable property 8:
//! "The root span of an execution with `root_execution_id = X` has trace ID
//! `int(X without dashes, 16)`".

use thiserror::Error;

/// A parsed (or synthesized) W3C `traceparent` header value:
/// `{version:2}-{trace_id:32}-{span_id:16}-{flags:2}`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TraceParent {
    pub trace_id: String,
    pub span_id: String,
    pub flags: u8,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceParentError {
    #[error("malformed traceparent header: {0}")]
    Malformed(String),
}

impl TraceParent {
    pub fn parse(header: &str) -> Result<Self, TraceParentError> {
        let parts: Vec<&str> = header.trim().split('-').collect();
        if parts.len() != 4 || parts[0] != "00" || parts[1].len() != 32 || parts[2].len() != 16 {
            return Err(TraceParentError::Malformed(header.to_string()));
        }
        let flags = u8::from_str_radix(parts[3], 16)
            .map_err(|_| TraceParentError::Malformed(header.to_string()))?;
        Ok(Self {
            trace_id: parts[1].to_string(),
            span_id: parts[2].to_string(),
            flags,
        })
    }

    pub fn to_header(&self) -> String {
        format!("00-{}-{}-{:02x}", self.trace_id, self.span_id, self.flags)
    }
}

/// Derives the deterministic 128-bit trace ID for a root execution: the
/// hex interpretation of `root_execution_id` with dashes stripped, left-padded
/// with a stable hash-derived prefix when the ID isn't already 32 hex chars
/// (e.g. when execution IDs are UUIDs, stripping dashes already yields
/// exactly 32 hex characters — the common case).
pub fn deterministic_trace_id(root_execution_id: &str) -> String {
    let stripped: String = root_execution_id.chars().filter(|c| *c != '-').collect();
    if stripped.len() == 32 && stripped.chars().all(|c| c.is_ascii_hexdigit()) {
        return stripped.to_lowercase();
    }
    // Non-UUID execution IDs: derive a stable 128-bit value via FNV-1a so the
    // property still holds ("deterministic", not "identity") without pulling
    // in a hashing crate dependency the rest of the workspace doesn't need.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in stripped.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{hash:032x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_execution_id_yields_its_own_hex_digits_as_trace_id() {
        let id = "4c6f0e2a-1b3c-4d5e-8f90-1234567890ab";
        let trace_id = deterministic_trace_id(id);
        assert_eq!(trace_id, "4c6f0e2a1b3c4d5e8f901234567890ab");
    }

    #[test]
    fn same_root_execution_id_always_yields_same_trace_id() {
        let id = "exec-not-a-uuid";
        assert_eq!(deterministic_trace_id(id), deterministic_trace_id(id));
    }

    #[test]
    fn traceparent_round_trips() {
        let header = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        let parsed = TraceParent::parse(header).unwrap();
        assert_eq!(parsed.to_header(), header);
    }

    #[test]
    fn malformed_traceparent_rejected() {
        assert!(TraceParent::parse("not-a-traceparent").is_err());
    }
}
