// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! requiem-engine
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;

pub use config::{parse_config, EngineConfig};

use std::fs;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use requiem_audit::AuditLog;
use requiem_canon::{blake3_domain, request_digest, result_digest, Domain};
use requiem_cas::{CasStore, Encoding, LocalCasStore};
use requiem_core::{
    ExecutionMetrics, ExecutionRequest, ExecutionResult, PolicyApplied, ProvenanceRecord,
    ENGINE_ABI_VERSION,
};
use requiem_error::{ErrorCode, RequiemError};
use requiem_observability::{EngineStats, ExecutionEvent};
use requiem_replay::{validate_replay, validate_replay_with_cas, ReplayOutcome};
use requiem_sandbox::{confine, ProcessSpec};
use requiem_version::FormatVersion;
use tracing::{error, info};

const DEFAULT_RING_CAPACITY: usize = 1000;
const AUDIT_LOG_ENV_VAR: &str = "REQUIEM_AUDIT_LOG";

/// Everything one engine instance needs to execute and replay requests.
///
/// Built once by [`init`] and shared (typically behind an `Arc`, or
/// owned directly by the `requiem-ffi` boxed-pointer context) across
/// every subsequent `execute`/`replay` call.
pub struct EngineContext {
    cas: Arc<dyn CasStore>,
    audit: Option<AuditLog>,
    /// Observability counters, histogram, and recent-event ring.
    pub stats: EngineStats,
    worker_id: String,
    node_id: String,
    /// The configuration this context was built from.
    pub config: EngineConfig,
}

impl EngineContext {
    /// The content-addressable store backing this context.
    #[must_use]
    pub fn cas(&self) -> &dyn CasStore {
        self.cas.as_ref()
    }

    /// Whether an audit log is attached.
    #[must_use]
    pub fn has_audit_log(&self) -> bool {
        self.audit.is_some()
    }
}

/// Initialize a fresh [`EngineContext`].
///
/// Checks `caller_abi_{major,minor}` against this build's version
/// manifest, parses and guards `config_json`, opens the
/// content-addressable store at `config.cas_root`, and opens an audit
/// log if `config.event_log_path` (or the `REQUIEM_AUDIT_LOG`
/// environment variable, checked in that order) names one.
///
/// # Errors
///
/// Returns an engine-fatal [`RequiemError`] on ABI incompatibility, an
/// invalid `config_json`, or failure to open the CAS root or audit log.
pub fn init(
    config_json: &str,
    caller_abi_major: u32,
    caller_abi_minor: u32,
) -> Result<EngineContext, RequiemError> {
    requiem_version::check_compatibility(FormatVersion::new(caller_abi_major, caller_abi_minor))?;
    let config = config::parse_config(config_json)?;

    let cas: Arc<dyn CasStore> = Arc::new(LocalCasStore::open(&config.cas_root)?);
    let audit = match config
        .event_log_path
        .clone()
        .or_else(|| std::env::var(AUDIT_LOG_ENV_VAR).ok())
    {
        Some(path) => Some(AuditLog::open(path)?),
        None => None,
    };

    Ok(EngineContext {
        cas,
        audit,
        stats: EngineStats::new(DEFAULT_RING_CAPACITY),
        worker_id: worker_id(),
        node_id: node_id(),
        config,
    })
}

fn worker_id() -> String {
    format!("pid{}-{:?}", std::process::id(), std::thread::current().id())
}

fn node_id() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "node-unknown".to_string())
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Whether an execution pipeline run is allowed to mutate the CAS.
///
/// Replay re-execution hashes output bytes the same way a normal
/// execution does but must never write them into the store — the
/// bytes the store already holds (or doesn't) are exactly what replay
/// is trying to verify.
#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputHandling {
    StoreInCas,
    HashOnly,
}

/// Execute `request`, performing, in order: request digesting, a
/// sandboxed run, CAS storage of declared outputs, stdout/stderr
/// digesting, result assembly and digesting, a provenance append, and
/// an observability update.
///
/// Pre-spawn sandbox errors (`path_escape`, `missing_input`) are
/// captured into a failed [`ExecutionResult`] rather than propagated,
/// since the engine must still produce a canonical, digested result
/// for them.
///
/// # Errors
///
/// Returns a [`RequiemError`] only if `request` itself fails to
/// canonicalize, or a CAS write fails unexpectedly (not on a fail-closed
/// integrity rejection, which instead raises `cas_integrity_failed` in
/// the result).
pub fn execute(ctx: &EngineContext, request: &ExecutionRequest) -> Result<ExecutionResult, RequiemError> {
    let start = Instant::now();
    let started_at_unix_ms = now_unix_ms();

    let result = run_pipeline(ctx, request, OutputHandling::StoreInCas)?;
    let mut result = result;
    result.metrics = ExecutionMetrics {
        duration_ns: u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX),
        started_at_unix_ms,
    };
    result.result_digest = result_digest(&result)?;

    ctx.stats.record_execution(ExecutionEvent {
        execution_id: result.request_digest.clone(),
        ok: result.ok,
        error_code: result.error_code.clone(),
        duration_ns: result.metrics.duration_ns,
        timestamp_unix_ms: started_at_unix_ms,
    });

    if let Some(audit) = &ctx.audit {
        let mut record = provenance_record(ctx, request, &result, false);
        if !audit.append(&mut record) {
            ctx.stats.record_audit_write_failure();
            error!(execution_id = %result.request_digest, "failed to append provenance record");
        }
    }

    info!(
        execution_id = %result.request_digest,
        ok = result.ok,
        duration_ns = result.metrics.duration_ns,
        "execution complete"
    );

    Ok(result)
}

/// Core execution pipeline shared by `execute` and replay
/// re-execution. Never touches `ctx.stats` or `ctx.audit`; callers
/// layer those on according to whether this is a normal execution or a
/// pure replay.
fn run_pipeline(
    ctx: &EngineContext,
    request: &ExecutionRequest,
    output_handling: OutputHandling,
) -> Result<ExecutionResult, RequiemError> {
    let req_digest = request_digest(request)?;

    let spec = ProcessSpec {
        command: request.command.clone(),
        argv: request.argv.clone(),
        env: request.env.clone(),
        cwd: request.cwd.clone(),
        workspace_root: request.workspace_root.clone(),
        inputs: request.inputs.clone(),
        outputs: request.outputs.clone(),
        timeout_ms: request.timeout_ms,
        max_output_bytes: request.max_output_bytes,
        allow_outside_workspace: request.policy.allow_outside_workspace,
        policy: request.policy.clone(),
    };

    let process_result = match requiem_sandbox::run(&spec) {
        Ok(r) => r,
        Err(e) => return Ok(failed_result(request, &req_digest, &e)),
    };

    let mut output_digests = std::collections::BTreeMap::new();
    for path in &request.outputs {
        let resolved = match confine(&request.workspace_root, path, request.policy.allow_outside_workspace) {
            Ok(p) => p,
            Err(_) => continue,
        };
        let bytes = match fs::read(&resolved) {
            Ok(b) => b,
            Err(_) => continue,
        };
        let digest = match output_handling {
            OutputHandling::StoreInCas => {
                let deduplicated = ctx.cas.contains(&blake3_domain(Domain::Cas, &bytes).to_hex());
                let digest = ctx.cas.put(&bytes, Encoding::Zstd)?;
                ctx.stats.record_cas_put(deduplicated);
                digest
            }
            OutputHandling::HashOnly => blake3_domain(Domain::Cas, &bytes).to_hex(),
        };
        output_digests.insert(path.clone(), digest);
    }

    let stdout_text = String::from_utf8_lossy(&process_result.stdout).into_owned();
    let stderr_text = String::from_utf8_lossy(&process_result.stderr).into_owned();
    let stdout_digest = blake3_domain(Domain::Res, stdout_text.as_bytes()).to_hex();
    let stderr_digest = blake3_domain(Domain::Res, stderr_text.as_bytes()).to_hex();

    let ok = process_result.error_code.is_empty();

    Ok(ExecutionResult {
        ok,
        exit_code: process_result.exit_code,
        error_code: process_result.error_code.clone(),
        termination_reason: process_result.termination_reason.clone(),
        stdout_text,
        stderr_text,
        stdout_truncated: process_result.stdout_truncated,
        stderr_truncated: process_result.stderr_truncated,
        request_digest: req_digest,
        stdout_digest,
        stderr_digest,
        result_digest: String::new(),
        trace_digest: None,
        trace_events: Vec::new(),
        output_digests,
        policy_applied: PolicyApplied {
            deterministic: request.policy.deterministic,
            mode: request.policy.mode.clone(),
            time_mode: request.policy.time_mode.clone(),
            scheduler_mode: request.policy.scheduler_mode.clone(),
            resolved_env_keys: process_result.resolved_env_keys,
            enforce_sandbox: request.policy.enforce_sandbox,
        },
        sandbox_applied: process_result.sandbox_applied,
        metrics: ExecutionMetrics {
            duration_ns: 0,
            started_at_unix_ms: 0,
        },
    })
}

fn failed_result(request: &ExecutionRequest, req_digest: &str, e: &RequiemError) -> ExecutionResult {
    ExecutionResult {
        ok: false,
        exit_code: -1,
        error_code: e.code.as_str().to_string(),
        termination_reason: e.message.clone(),
        stdout_text: String::new(),
        stderr_text: String::new(),
        stdout_truncated: false,
        stderr_truncated: false,
        request_digest: req_digest.to_string(),
        stdout_digest: blake3_domain(Domain::Res, b"").to_hex(),
        stderr_digest: blake3_domain(Domain::Res, b"").to_hex(),
        result_digest: String::new(),
        trace_digest: None,
        trace_events: Vec::new(),
        output_digests: std::collections::BTreeMap::new(),
        policy_applied: PolicyApplied {
            deterministic: request.policy.deterministic,
            mode: request.policy.mode.clone(),
            time_mode: request.policy.time_mode.clone(),
            scheduler_mode: request.policy.scheduler_mode.clone(),
            resolved_env_keys: Vec::new(),
            enforce_sandbox: request.policy.enforce_sandbox,
        },
        sandbox_applied: requiem_core::SandboxApplied::all_unsupported(),
        metrics: ExecutionMetrics {
            duration_ns: 0,
            started_at_unix_ms: 0,
        },
    }
}

fn provenance_record(
    ctx: &EngineContext,
    request: &ExecutionRequest,
    result: &ExecutionResult,
    replay_verified: bool,
) -> ProvenanceRecord {
    ProvenanceRecord {
        sequence: 0,
        execution_id: result.request_digest.clone(),
        tenant_id: request.tenant_id.clone(),
        request_digest: result.request_digest.clone(),
        result_digest: result.result_digest.clone(),
        engine_semver: env!("CARGO_PKG_VERSION").to_string(),
        engine_abi_version: ENGINE_ABI_VERSION,
        hash_algorithm_version: requiem_version::HASH_ALGORITHM_VERSION.major,
        cas_format_version: requiem_version::CAS_FORMAT_VERSION.major,
        replay_verified,
        ok: result.ok,
        error_code: result.error_code.clone(),
        duration_ns: result.metrics.duration_ns,
        timestamp_unix_ms: now_unix_ms(),
        worker_id: ctx.worker_id.clone(),
        node_id: ctx.node_id.clone(),
    }
}

/// Verify a previously produced [`ExecutionResult`] by re-executing its
/// request and comparing digests.
///
/// Re-execution never writes to the CAS (output bytes are hashed, not
/// stored) and never bumps the normal execution counters or ring
/// buffer; only [`EngineStats::record_replay`] and, if an audit log is
/// attached, a single new `replay_verified` [`ProvenanceRecord`] are
/// recorded. Both are no-ops with respect to *existing* records: the
/// audit log only ever appends.
///
/// # Errors
///
/// Propagates any error from re-executing `request`.
pub fn replay_reexecute(
    ctx: &EngineContext,
    request: &ExecutionRequest,
    expected: &ExecutionResult,
) -> Result<ReplayOutcome, RequiemError> {
    let outcome = validate_replay(expected, || {
        let mut fresh = run_pipeline(ctx, request, OutputHandling::HashOnly)?;
        fresh.result_digest = result_digest(&fresh)?;
        Ok(fresh)
    })?;
    record_replay_outcome(ctx, request, expected, &outcome);
    Ok(outcome)
}

/// Verify a previously produced [`ExecutionResult`] by re-hashing its
/// declared outputs from the CAS and recomputing its own digest,
/// without re-executing anything.
///
/// # Errors
///
/// Propagates any unexpected CAS I/O error.
pub fn replay_with_cas(
    ctx: &EngineContext,
    request: &ExecutionRequest,
    expected: &ExecutionResult,
) -> Result<ReplayOutcome, RequiemError> {
    let outcome = validate_replay_with_cas(request, expected, ctx.cas.as_ref())?;
    record_replay_outcome(ctx, request, expected, &outcome);
    Ok(outcome)
}

fn record_replay_outcome(
    ctx: &EngineContext,
    request: &ExecutionRequest,
    expected: &ExecutionResult,
    outcome: &ReplayOutcome,
) {
    ctx.stats.record_replay(!outcome.matched);
    if let Some(audit) = &ctx.audit {
        let mut record = provenance_record(ctx, request, expected, true);
        if !audit.append(&mut record) {
            ctx.stats.record_audit_write_failure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn request(workspace: &std::path::Path, command: &str, argv: Vec<&str>) -> ExecutionRequest {
        ExecutionRequest {
            request_id: "r1".into(),
            command: command.into(),
            argv: argv.into_iter().map(String::from).collect(),
            env: BTreeMap::new(),
            cwd: workspace.to_string_lossy().into_owned(),
            workspace_root: workspace.to_string_lossy().into_owned(),
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
            nonce: 1,
            timeout_ms: 5_000,
            max_output_bytes: 1 << 20,
            policy: requiem_core::ExecPolicy {
                enforce_sandbox: false,
                ..requiem_core::ExecPolicy::default()
            },
            tenant_id: "t1".into(),
            llm_options: serde_json::json!({}),
        }
    }

    fn context(dir: &std::path::Path) -> EngineContext {
        init(
            &format!(r#"{{"cas_root":"{}"}}"#, dir.join("cas").display()),
            ENGINE_ABI_VERSION,
            0,
        )
        .unwrap()
    }

    #[test]
    fn incompatible_abi_is_rejected_at_init() {
        let err = init("{}", ENGINE_ABI_VERSION + 1, 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::HashUnavailable);
    }

    #[test]
    fn echo_execution_is_deterministic_across_repeats() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let req = request(dir.path(), "/bin/echo", vec!["hello"]);

        let r1 = execute(&ctx, &req).unwrap();
        let r2 = execute(&ctx, &req).unwrap();
        assert!(r1.ok);
        assert_eq!(r1.stdout_text, "hello\n");
        assert_eq!(r1.result_digest, r2.result_digest);
    }

    #[test]
    fn path_escape_becomes_failed_result_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let mut req = request(dir.path(), "/bin/echo", vec!["hi"]);
        req.inputs.insert("x".to_string(), "../../etc/passwd".to_string());

        let result = execute(&ctx, &req).unwrap();
        assert!(!result.ok);
        assert_eq!(result.error_code, "path_escape");
    }

    #[test]
    fn timeout_is_reported_in_result() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let mut req = request(dir.path(), "/bin/sleep", vec!["10"]);
        req.timeout_ms = 100;

        let result = execute(&ctx, &req).unwrap();
        assert!(!result.ok);
        assert_eq!(result.error_code, "timeout");
    }

    #[test]
    fn replay_reexecute_matches_on_stable_command() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let req = request(dir.path(), "/bin/echo", vec!["stable"]);
        let expected = execute(&ctx, &req).unwrap();

        let outcome = replay_reexecute(&ctx, &req, &expected).unwrap();
        assert!(outcome.matched);
        assert_eq!(ctx.stats.snapshot().replay_verifications, 1);
        assert_eq!(ctx.stats.snapshot().replay_divergences, 0);
    }

    #[test]
    fn replay_reexecute_detects_divergence() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let req = request(dir.path(), "/bin/echo", vec!["original"]);
        let mut expected = execute(&ctx, &req).unwrap();
        expected.stdout_text = "tampered".to_string();
        expected.result_digest = result_digest(&expected).unwrap();

        let outcome = replay_reexecute(&ctx, &req, &expected).unwrap();
        assert!(!outcome.matched);
        assert_eq!(ctx.stats.snapshot().replay_divergences, 1);
    }

    #[test]
    fn replay_does_not_write_new_cas_objects() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        std::fs::write(dir.path().join("out.txt"), b"artifact").unwrap();
        let mut req = request(dir.path(), "/bin/echo", vec!["hi"]);
        req.outputs.push("out.txt".to_string());
        let expected = execute(&ctx, &req).unwrap();
        let size_after_execute = ctx.cas.size();

        replay_reexecute(&ctx, &req, &expected).unwrap();
        assert_eq!(ctx.cas.size(), size_after_execute, "replay must not grow the CAS");
    }

    #[test]
    fn cas_dedup_is_reflected_in_stats() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        std::fs::write(dir.path().join("out.txt"), b"same bytes").unwrap();
        let mut req = request(dir.path(), "/bin/echo", vec!["hi"]);
        req.outputs.push("out.txt".to_string());

        execute(&ctx, &req).unwrap();
        execute(&ctx, &req).unwrap();
        assert_eq!(ctx.stats.snapshot().cas_hits, 1);
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(16))]

        #[test]
        fn echo_execution_is_deterministic_for_any_argv(
            arg in "[a-zA-Z0-9 _.-]{0,24}",
        ) {
            let dir = tempfile::tempdir().unwrap();
            let ctx = context(dir.path());
            let req = request(dir.path(), "/bin/echo", vec![&arg]);

            let r1 = execute(&ctx, &req).unwrap();
            let r2 = execute(&ctx, &req).unwrap();
            proptest::prop_assert_eq!(r1.ok, true);
            proptest::prop_assert_eq!(r1.result_digest, r2.result_digest);
            proptest::prop_assert_eq!(r1.request_digest, r2.request_digest);
        }
    }
}
