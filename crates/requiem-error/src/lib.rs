// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! requiem-error
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Canonicalization / JSON parsing errors.
    Canon,
    /// Content-addressable store errors.
    Cas,
    /// Sandboxed executor errors.
    Sandbox,
    /// Replay verification errors.
    Replay,
    /// Audit log errors.
    Audit,
    /// Engine-fatal errors (startup, versioning, hashing unavailable).
    Engine,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Canon => "canon",
            Self::Cas => "cas",
            Self::Sandbox => "sandbox",
            Self::Replay => "replay",
            Self::Audit => "audit",
            Self::Engine => "engine",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serializes to the exact `snake_case` string named in the
/// engine's external contract (`result.error_code`) and is guaranteed not
/// to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Request bytes are not valid JSON, or violate the canonical schema.
    JsonParseError,
    /// Request JSON contains a duplicate object key.
    JsonDuplicateKey,
    /// A resolved path escapes the workspace root.
    PathEscape,
    /// A declared input path does not exist or is unreadable.
    MissingInput,
    /// The child process could not be spawned.
    SpawnFailed,
    /// The child process exceeded `timeout_ms` and was terminated.
    Timeout,
    /// A CAS object's stored bytes failed integrity verification on read.
    CasIntegrityFailed,
    /// Replay re-execution or re-hash diverged from the expected result.
    ReplayFailed,
    /// A replayed digest differs from the expected digest (drift).
    DriftDetected,
    /// The BLAKE3 hash primitive is unavailable; fatal at startup.
    HashUnavailable,
    /// A requested sandbox enforcement is not available on this platform.
    SandboxUnavailable,
    /// A resource or rate quota was exceeded.
    QuotaExceeded,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::JsonParseError | Self::JsonDuplicateKey => ErrorCategory::Canon,
            Self::CasIntegrityFailed => ErrorCategory::Cas,
            Self::PathEscape | Self::MissingInput | Self::SpawnFailed | Self::Timeout
            | Self::SandboxUnavailable => ErrorCategory::Sandbox,
            Self::ReplayFailed | Self::DriftDetected => ErrorCategory::Replay,
            Self::QuotaExceeded => ErrorCategory::Audit,
            Self::HashUnavailable => ErrorCategory::Engine,
        }
    }

    /// Stable `&'static str` representation, identical to the wire form
    /// that appears in `ExecutionResult::error_code`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JsonParseError => "json_parse_error",
            Self::JsonDuplicateKey => "json_duplicate_key",
            Self::PathEscape => "path_escape",
            Self::MissingInput => "missing_input",
            Self::SpawnFailed => "spawn_failed",
            Self::Timeout => "timeout",
            Self::CasIntegrityFailed => "cas_integrity_failed",
            Self::ReplayFailed => "replay_failed",
            Self::DriftDetected => "drift_detected",
            Self::HashUnavailable => "hash_unavailable",
            Self::SandboxUnavailable => "sandbox_unavailable",
            Self::QuotaExceeded => "quota_exceeded",
        }
    }

    /// `true` for errors that are fatal to the whole engine context
    /// (startup / versioning failures), as opposed to per-request errors.
    #[must_use]
    pub fn is_engine_fatal(&self) -> bool {
        matches!(self, Self::HashUnavailable)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RequiemError
// ---------------------------------------------------------------------------

/// Unified engine error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context used
/// for diagnostics. Never exposed across the C-ABI boundary directly —
/// callers there only ever see `error_code` strings embedded in a
/// canonical JSON result.
///
/// # Examples
///
/// ```
/// use requiem_error::{RequiemError, ErrorCode};
///
/// let err = RequiemError::new(ErrorCode::Timeout, "child exceeded 100ms")
///     .with_context("timeout_ms", 100);
/// assert_eq!(err.code, ErrorCode::Timeout);
/// ```
pub struct RequiemError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl RequiemError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialization
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for RequiemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("RequiemError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for RequiemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RequiemError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Convenience alias used throughout the engine's crates.
pub type Result<T> = std::result::Result<T, RequiemError>;

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::JsonParseError,
        ErrorCode::JsonDuplicateKey,
        ErrorCode::PathEscape,
        ErrorCode::MissingInput,
        ErrorCode::SpawnFailed,
        ErrorCode::Timeout,
        ErrorCode::CasIntegrityFailed,
        ErrorCode::ReplayFailed,
        ErrorCode::DriftDetected,
        ErrorCode::HashUnavailable,
        ErrorCode::SandboxUnavailable,
        ErrorCode::QuotaExceeded,
    ];

    #[test]
    fn basic_construction() {
        let err = RequiemError::new(ErrorCode::Timeout, "boom");
        assert_eq!(err.code, ErrorCode::Timeout);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_context() {
        let err = RequiemError::new(ErrorCode::MissingInput, "no such file");
        assert_eq!(err.to_string(), "[missing_input] no such file");
    }

    #[test]
    fn display_with_context() {
        let err = RequiemError::new(ErrorCode::Timeout, "timed out").with_context("timeout_ms", 100);
        let s = err.to_string();
        assert!(s.starts_with("[timeout] timed out"));
        assert!(s.contains("timeout_ms"));
    }

    #[test]
    fn wire_strings_match_contract() {
        assert_eq!(ErrorCode::JsonParseError.as_str(), "json_parse_error");
        assert_eq!(ErrorCode::JsonDuplicateKey.as_str(), "json_duplicate_key");
        assert_eq!(ErrorCode::PathEscape.as_str(), "path_escape");
        assert_eq!(ErrorCode::MissingInput.as_str(), "missing_input");
        assert_eq!(ErrorCode::SpawnFailed.as_str(), "spawn_failed");
        assert_eq!(ErrorCode::Timeout.as_str(), "timeout");
        assert_eq!(ErrorCode::CasIntegrityFailed.as_str(), "cas_integrity_failed");
        assert_eq!(ErrorCode::ReplayFailed.as_str(), "replay_failed");
        assert_eq!(ErrorCode::DriftDetected.as_str(), "drift_detected");
        assert_eq!(ErrorCode::HashUnavailable.as_str(), "hash_unavailable");
        assert_eq!(ErrorCode::SandboxUnavailable.as_str(), "sandbox_unavailable");
        assert_eq!(ErrorCode::QuotaExceeded.as_str(), "quota_exceeded");
    }

    #[test]
    fn categories_are_stable() {
        assert_eq!(ErrorCode::Timeout.category(), ErrorCategory::Sandbox);
        assert_eq!(ErrorCode::CasIntegrityFailed.category(), ErrorCategory::Cas);
        assert_eq!(ErrorCode::HashUnavailable.category(), ErrorCategory::Engine);
    }

    #[test]
    fn only_hash_unavailable_is_engine_fatal() {
        for code in ALL_CODES {
            let fatal = code.is_engine_fatal();
            assert_eq!(fatal, *code == ErrorCode::HashUnavailable, "{code:?}");
        }
    }

    #[test]
    fn context_serializes_deterministically() {
        let err = RequiemError::new(ErrorCode::Timeout, "t")
            .with_context("b", 2)
            .with_context("a", 1);
        let s = err.to_string();
        let a_pos = s.find("\"a\"").unwrap();
        let b_pos = s.find("\"b\"").unwrap();
        assert!(a_pos < b_pos, "BTreeMap should sort keys: {s}");
    }
}
