// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! requiem-canon
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod hash;
mod parser;
mod ser;
mod value;

pub use hash::{blake3_domain, Digest, Domain};
pub use value::CanonicalValue;

use requiem_core::{ExecutionRequest, ExecutionResult};
use requiem_error::{ErrorCode, RequiemError};

/// Parse `bytes` as strict canonical-form JSON and deserialize it into an
/// [`ExecutionRequest`].
///
/// Goes through [`CanonicalValue`] rather than deserializing directly with
/// `serde_json`, so that duplicate keys and floating-point numbers are
/// rejected before a single [`ExecutionRequest`] field is populated.
///
/// # Errors
///
/// Returns [`ErrorCode::JsonParseError`] or [`ErrorCode::JsonDuplicateKey`]
/// if `bytes` is not strict canonical JSON, or [`ErrorCode::JsonParseError`]
/// if the parsed value doesn't match the shape of [`ExecutionRequest`].
pub fn parse_request_json(bytes: &[u8]) -> Result<ExecutionRequest, RequiemError> {
    let parsed = parser::parse_strict(bytes)?;
    serde_json::from_value(parsed.to_json()).map_err(|e| {
        RequiemError::new(
            ErrorCode::JsonParseError,
            format!("request does not match expected shape: {e}"),
        )
    })
}

/// Produce the canonical-form bytes of `request`, excluding `request_id`
/// and `tenant_id`.
///
/// `request_id` is a caller-side correlation handle, not part of what was
/// asked. `tenant_id` is excluded so the same command hashes identically
/// no matter which tenant submitted it; multi-tenant determinism depends
/// on this.
///
/// # Errors
///
/// Returns [`ErrorCode::JsonParseError`] if `request` fails to serialize
/// to JSON (this should not happen for a well-formed [`ExecutionRequest`]).
pub fn canonicalize_request(request: &ExecutionRequest) -> Result<Vec<u8>, RequiemError> {
    let json = serde_json::to_value(request).map_err(|e| {
        RequiemError::new(
            ErrorCode::JsonParseError,
            format!("failed to serialize request: {e}"),
        )
    })?;
    let mut value = CanonicalValue::from_json(&json)?;
    value.remove("request_id");
    value.remove("tenant_id");
    Ok(ser::to_canonical_bytes(&value))
}

/// Produce the canonical-form bytes of `result`, excluding `metrics` and
/// forcing `result_digest` to an empty string first.
///
/// `metrics` is wall-clock timing, not a property of what ran.
/// `result_digest` is computed *over* this canonical form, so it must be
/// nulled out before serialization — otherwise the digest would depend on
/// itself. This mirrors the pattern of nulling a self-referential hash
/// field before hashing a record that carries one.
///
/// # Errors
///
/// Returns [`ErrorCode::JsonParseError`] if `result` fails to serialize
/// to JSON.
pub fn canonicalize_result(result: &ExecutionResult) -> Result<Vec<u8>, RequiemError> {
    let mut result = result.clone();
    result.result_digest.clear();
    let json = serde_json::to_value(&result).map_err(|e| {
        RequiemError::new(
            ErrorCode::JsonParseError,
            format!("failed to serialize result: {e}"),
        )
    })?;
    let mut value = CanonicalValue::from_json(&json)?;
    value.remove("metrics");
    Ok(ser::to_canonical_bytes(&value))
}

/// Compute the hex-encoded `request_digest` for `request`.
///
/// # Errors
///
/// Propagates any error from [`canonicalize_request`].
pub fn request_digest(request: &ExecutionRequest) -> Result<String, RequiemError> {
    let bytes = canonicalize_request(request)?;
    Ok(blake3_domain(Domain::Req, &bytes).to_hex())
}

/// Compute the hex-encoded `result_digest` for `result`.
///
/// # Errors
///
/// Propagates any error from [`canonicalize_result`].
pub fn result_digest(result: &ExecutionResult) -> Result<String, RequiemError> {
    let bytes = canonicalize_result(result)?;
    Ok(blake3_domain(Domain::Res, &bytes).to_hex())
}

/// Serialize any `Serialize` value to canonical-form bytes, with no field
/// exclusions.
///
/// Used for types that are canonical by construction and carry no
/// self-referential or excluded fields: `CasObjectInfo` sidecars and
/// `ProvenanceRecord` audit lines. `ExecutionRequest`/`ExecutionResult`
/// have excluded fields and should go through [`canonicalize_request`]/
/// [`canonicalize_result`] instead.
///
/// # Errors
///
/// Returns [`ErrorCode::JsonParseError`] if `value` fails to serialize.
pub fn to_canonical_json_bytes<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, RequiemError> {
    let json = serde_json::to_value(value).map_err(|e| {
        RequiemError::new(
            ErrorCode::JsonParseError,
            format!("failed to serialize value: {e}"),
        )
    })?;
    let canonical = CanonicalValue::from_json(&json)?;
    Ok(ser::to_canonical_bytes(&canonical))
}
