//! Correlation identifiers.
//!
//! - request id: unique per capture attempt
//! - trace id: derived from the session, shared by every capture in it
//! - span id: `<operation>.<sequence>.<digest>`

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write;
use uuid::Uuid;

const TRACE_ID_HEX_LEN: usize = 32;
const SPAN_DIGEST_HEX_LEN: usize = 8;

/// Fresh request id, e.g. `req_3f2b...`.
pub fn request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

/// Deterministic trace id for a session.
pub fn trace_id(session_id: &str) -> String {
    digest_hex(session_id.as_bytes(), TRACE_ID_HEX_LEN)
}

/// Span id scoped to an operation and its sequence number within the trace.
pub fn span_id(operation: &str, sequence: u32) -> String {
    let digest = digest_hex(
        format!("{operation}:{sequence}").as_bytes(),
        SPAN_DIGEST_HEX_LEN,
    );
    format!("{operation}.{sequence}.{digest}")
}

/// First `len` lowercase hex characters of the SHA-256 of `input`.
pub fn digest_hex(input: &[u8], len: usize) -> String {
    let digest = Sha256::digest(input);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(out, "{:02x}", byte);
    }
    out.truncate(len);
    out
}

/// Correlation block attached to outbound payloads as `_trace`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceContext {
    pub request_id: String,
    pub trace_id: String,
    pub span_id: String,
    /// RFC 3339, milliseconds
    pub timestamp: String,
}

impl TraceContext {
    pub fn new(
        request_id: impl Into<String>,
        session_id: &str,
        operation: &str,
        sequence: u32,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            trace_id: trace_id(session_id),
            span_id: span_id(operation, sequence),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Context for a new capture attempt within `session_id`.
    pub fn for_session(session_id: &str, operation: &str) -> Self {
        Self::new(request_id(), session_id, operation, 1)
    }
}
