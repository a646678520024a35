// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! requiem-replay
#![deny(unsafe_code)]
#![warn(missing_docs)]

use requiem_canon::result_digest;
use requiem_cas::CasStore;
use requiem_core::{ExecutionRequest, ExecutionResult};
use requiem_error::{ErrorCode, RequiemError};

/// The verdict of one replay verification attempt, pure with respect to
/// engine state: producing it never mutates the CAS, emits a metrics
/// event, or advances the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// `true` iff the verification found no divergence.
    pub matched: bool,
    /// The `result_digest` the caller expected.
    pub expected_result_digest: String,
    /// The `result_digest` this verification actually observed.
    pub actual_result_digest: String,
    /// Human-readable detail, non-empty only when `matched` is `false`.
    pub detail: String,
}

impl ReplayOutcome {
    fn matching(digest: String) -> Self {
        Self {
            matched: true,
            expected_result_digest: digest.clone(),
            actual_result_digest: digest,
            detail: String::new(),
        }
    }

    fn diverged(expected: String, actual: String, detail: impl Into<String>) -> Self {
        Self {
            matched: false,
            expected_result_digest: expected,
            actual_result_digest: actual,
            detail: detail.into(),
        }
    }
}

/// Re-execute `request` via `reexecute` and compare the fresh
/// `result_digest` against `expected_result`'s.
///
/// `reexecute` is expected to be the engine orchestrator's `execute`
/// entry point (or an equivalent), injected here rather than called
/// directly so this crate never depends on the orchestrator crate.
///
/// # Errors
///
/// Propagates any error `reexecute` returns. A digest mismatch is *not*
/// an error — it is reported as `Ok(ReplayOutcome { matched: false, .. })`
/// so the caller can increment `replay_divergences` and surface
/// [`ErrorCode::ReplayFailed`] itself.
pub fn validate_replay(
    expected_result: &ExecutionResult,
    reexecute: impl FnOnce() -> Result<ExecutionResult, RequiemError>,
) -> Result<ReplayOutcome, RequiemError> {
    let fresh = reexecute()?;
    if fresh.result_digest == expected_result.result_digest {
        Ok(ReplayOutcome::matching(fresh.result_digest))
    } else {
        Ok(ReplayOutcome::diverged(
            expected_result.result_digest.clone(),
            fresh.result_digest,
            "re-execution produced a different result_digest",
        ))
    }
}

/// Re-hash `expected_result` from the content-addressable store without
/// re-executing `request`.
///
/// Verifies that every entry in `expected_result.output_digests` is
/// still present and intact in `cas` (protecting against output
/// artifacts that were deleted or corrupted after the fact), then
/// recomputes `result_digest` over `expected_result`'s own canonical
/// form and compares it to the digest `expected_result` claims
/// (protecting against a forged or hand-edited result record).
///
/// `request` is accepted for symmetry with [`validate_replay`] and to
/// let future verification strategies cross-check request-derived
/// fields; this strategy does not itself inspect it.
///
/// # Errors
///
/// Returns [`ErrorCode::CasIntegrityFailed`] if an output digest cannot
/// be fetched from `cas`, or [`ErrorCode::JsonParseError`] if
/// `expected_result` fails to canonicalize.
pub fn validate_replay_with_cas(
    _request: &ExecutionRequest,
    expected_result: &ExecutionResult,
    cas: &dyn CasStore,
) -> Result<ReplayOutcome, RequiemError> {
    for (path, digest) in &expected_result.output_digests {
        match cas.get(digest) {
            Ok(Some(_)) => {}
            Ok(None) => {
                return Ok(ReplayOutcome::diverged(
                    expected_result.result_digest.clone(),
                    String::new(),
                    format!("output {path:?} digest {digest} missing or failed integrity check in CAS"),
                ));
            }
            Err(e) => return Err(e),
        }
    }

    let recomputed = result_digest(expected_result)?;
    if recomputed == expected_result.result_digest {
        Ok(ReplayOutcome::matching(recomputed))
    } else {
        Err(RequiemError::new(
            ErrorCode::ReplayFailed,
            "stored result_digest does not match its own canonical form",
        )
        .with_context("expected", expected_result.result_digest.clone())
        .with_context("recomputed", recomputed))
    }
}
