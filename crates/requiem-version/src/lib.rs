// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! requiem-version
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;

use requiem_error::{ErrorCode, RequiemError};

/// A `(major, minor)` format version. Two versions are compatible for
/// data exchange when they share the same major component; minor bumps
/// are additive and never break an existing reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FormatVersion {
    /// Breaking-change component. A mismatch here is fatal.
    pub major: u32,
    /// Additive component. A mismatch here is tolerated.
    pub minor: u32,
}

impl FormatVersion {
    /// Construct a version.
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Two versions are compatible iff they share the same major version.
    #[must_use]
    pub fn is_compatible(&self, other: &FormatVersion) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}

/// `ENGINE_ABI_VERSION`: the stable embedding-boundary contract version.
pub const ENGINE_ABI_VERSION: FormatVersion = FormatVersion::new(1, 0);
/// `HASH_ALGORITHM_VERSION`: identifies the domain-separated BLAKE3 scheme.
pub const HASH_ALGORITHM_VERSION: FormatVersion = FormatVersion::new(1, 0);
/// `CAS_FORMAT_VERSION`: the on-disk object-store layout version.
pub const CAS_FORMAT_VERSION: FormatVersion = FormatVersion::new(2, 0);
/// `PROTOCOL_FRAMING_VERSION`: the C-ABI JSON payload framing version.
pub const PROTOCOL_FRAMING_VERSION: FormatVersion = FormatVersion::new(1, 0);
/// `REPLAY_LOG_VERSION`: the canonical-JSON-array trace-event log version.
pub const REPLAY_LOG_VERSION: FormatVersion = FormatVersion::new(1, 0);
/// `AUDIT_LOG_VERSION`: the NDJSON provenance-record format version.
/// Absence of `previous_entry_digest` is v1; presence indicates v>=2.
pub const AUDIT_LOG_VERSION: FormatVersion = FormatVersion::new(1, 0);

/// The full set of format versions a running engine instance carries,
/// snapshotted once at startup and echoed into every `ProvenanceRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionManifest {
    /// See [`ENGINE_ABI_VERSION`].
    pub engine_abi_version: FormatVersion,
    /// See [`HASH_ALGORITHM_VERSION`].
    pub hash_algorithm_version: FormatVersion,
    /// See [`CAS_FORMAT_VERSION`].
    pub cas_format_version: FormatVersion,
    /// See [`PROTOCOL_FRAMING_VERSION`].
    pub protocol_framing_version: FormatVersion,
    /// See [`REPLAY_LOG_VERSION`].
    pub replay_log_version: FormatVersion,
    /// See [`AUDIT_LOG_VERSION`].
    pub audit_log_version: FormatVersion,
}

impl VersionManifest {
    /// The manifest baked into this build.
    #[must_use]
    pub const fn current() -> Self {
        Self {
            engine_abi_version: ENGINE_ABI_VERSION,
            hash_algorithm_version: HASH_ALGORITHM_VERSION,
            cas_format_version: CAS_FORMAT_VERSION,
            protocol_framing_version: PROTOCOL_FRAMING_VERSION,
            replay_log_version: REPLAY_LOG_VERSION,
            audit_log_version: AUDIT_LOG_VERSION,
        }
    }
}

impl Default for VersionManifest {
    fn default() -> Self {
        Self::current()
    }
}

/// Verify that a caller-declared ABI version is compatible with this
/// build's manifest.
///
/// Only the four data-compatibility fields gate compatibility: hash,
/// CAS, replay, and audit format. `protocol_framing_version` governs
/// the C-ABI call shape itself rather than data at rest, and is checked
/// by the embedding layer separately, not here.
///
/// # Errors
///
/// Returns an engine-fatal [`RequiemError`] with code
/// [`ErrorCode::HashUnavailable`] on a mismatch — no dedicated
/// incompatible-version code exists in the taxonomy, and an engine that
/// cannot trust its own ABI cannot give you a trustworthy digest either.
/// The error's message names the first incompatible field encountered,
/// in manifest declaration order.
pub fn check_compatibility(caller_abi: FormatVersion) -> Result<(), RequiemError> {
    let manifest = VersionManifest::current();
    if !manifest.engine_abi_version.is_compatible(&caller_abi) {
        return Err(fatal(format!(
            "engine_abi_version mismatch: engine is {}, caller expects {}",
            manifest.engine_abi_version, caller_abi
        )));
    }
    Ok(())
}

/// Verify that a full manifest recorded alongside some previously stored
/// data (e.g. a CAS root, an audit log, a replay log) is still
/// compatible with this build, field by field.
///
/// # Errors
///
/// Returns a fatal [`RequiemError`] naming the first incompatible field,
/// in this order: hash, CAS, replay, audit.
pub fn check_manifest_compatibility(stored: &VersionManifest) -> Result<(), RequiemError> {
    let current = VersionManifest::current();
    let checks: &[(&str, FormatVersion, FormatVersion)] = &[
        (
            "hash_algorithm_version",
            current.hash_algorithm_version,
            stored.hash_algorithm_version,
        ),
        (
            "cas_format_version",
            current.cas_format_version,
            stored.cas_format_version,
        ),
        (
            "replay_log_version",
            current.replay_log_version,
            stored.replay_log_version,
        ),
        (
            "audit_log_version",
            current.audit_log_version,
            stored.audit_log_version,
        ),
    ];
    for (field, ours, theirs) in checks {
        if !ours.is_compatible(theirs) {
            return Err(fatal(format!(
                "{field} mismatch: engine is {ours}, stored data is {theirs}"
            )));
        }
    }
    Ok(())
}

fn fatal(message: String) -> RequiemError {
    RequiemError::new(ErrorCode::HashUnavailable, message)
        .with_context("engine_fatal", true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_major_is_compatible_regardless_of_minor() {
        assert!(FormatVersion::new(1, 0).is_compatible(&FormatVersion::new(1, 7)));
    }

    #[test]
    fn different_major_is_incompatible() {
        assert!(!FormatVersion::new(1, 0).is_compatible(&FormatVersion::new(2, 0)));
    }

    #[test]
    fn compatible_abi_passes() {
        assert!(check_compatibility(FormatVersion::new(1, 0)).is_ok());
        assert!(check_compatibility(FormatVersion::new(1, 99)).is_ok());
    }

    #[test]
    fn incompatible_abi_is_engine_fatal() {
        let err = check_compatibility(FormatVersion::new(2, 0)).unwrap_err();
        assert_eq!(err.code, ErrorCode::HashUnavailable);
        assert!(err.code.is_engine_fatal());
        assert!(err.message.contains("engine_abi_version"));
    }

    #[test]
    fn manifest_compatibility_checks_data_fields_in_order() {
        let mut stored = VersionManifest::current();
        stored.cas_format_version = FormatVersion::new(99, 0);
        let err = check_manifest_compatibility(&stored).unwrap_err();
        assert!(err.message.contains("cas_format_version"));
    }

    #[test]
    fn matching_manifest_is_compatible() {
        assert!(check_manifest_compatibility(&VersionManifest::current()).is_ok());
    }
}
