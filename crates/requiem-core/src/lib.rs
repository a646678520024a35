// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! requiem-core
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current engine ABI version embedded in every [`ProvenanceRecord`] and
/// checked at [`init`](#)-time against the caller's expected ABI.
///
/// # Examples
///
/// ```
/// assert_eq!(requiem_core::ENGINE_ABI_VERSION, 1);
/// ```
pub const ENGINE_ABI_VERSION: u32 = 1;

/// A single unit of work submitted to the engine.
///
/// Value-owned, caller-constructed, immutable from the moment it is handed
/// to `execute()`. Two fields are deliberately excluded from the canonical
/// form used to compute [`ExecutionResult::request_digest`]: `tenant_id`
/// (multi-tenant determinism is load-bearing — the same command must hash
/// identically regardless of which tenant submitted it) and `request_id`
/// (a caller-side correlation handle, not part of what was asked).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionRequest {
    /// Caller-side correlation identifier. Excluded from `request_digest`.
    pub request_id: String,
    /// The executable to invoke (first argv-like token, resolved by the
    /// sandbox the same way a shell would resolve a bare command name).
    pub command: String,
    /// Ordered command-line arguments passed to `command`.
    pub argv: Vec<String>,
    /// Environment variables visible to the child, before scrubbing.
    /// Keys are unique by construction (`BTreeMap`).
    pub env: BTreeMap<String, String>,
    /// Working directory for the child process.
    pub cwd: String,
    /// Root directory all `inputs`/`outputs` paths are resolved against.
    pub workspace_root: String,
    /// Logical name → filesystem path mapping for declared inputs.
    pub inputs: BTreeMap<String, String>,
    /// Ordered list of artifact paths the command is expected to produce.
    pub outputs: Vec<String>,
    /// Caller-supplied nonce. Part of the canonical form; lets otherwise
    /// identical requests produce distinct digests on purpose.
    pub nonce: u64,
    /// Wall-clock budget for the whole execution, in milliseconds.
    pub timeout_ms: u64,
    /// Maximum bytes captured per output stream before truncation.
    pub max_output_bytes: u64,
    /// Security/determinism policy applied to this execution.
    pub policy: ExecPolicy,
    /// Opaque tenant identifier. **Not** part of `request_digest`.
    pub tenant_id: String,
    /// Vendor/LLM-runner options. Inert at the core: the engine carries
    /// this value through to the canonical form and the digest, but never
    /// interprets it.
    #[serde(default)]
    pub llm_options: serde_json::Value,
}

/// Security and determinism policy attached to an [`ExecutionRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecPolicy {
    /// When `true`, the engine enforces the full determinism posture
    /// (env scrubbing, fixed-zero time mode where requested, etc).
    pub deterministic: bool,
    /// When `true`, `inputs`/`outputs` paths may resolve outside
    /// `workspace_root` without producing `path_escape`.
    pub allow_outside_workspace: bool,
    /// When `true`, the child inherits the engine process's environment
    /// before allowlist/denylist/required_env are applied.
    pub inherit_env: bool,
    /// `"strict"` or `"observe"`.
    pub mode: String,
    /// `"fixed_zero"` or `"passthrough"`.
    pub time_mode: String,
    /// `"repro"` or `"turbo"`.
    pub scheduler_mode: String,
    /// If non-empty, only these environment variable names may pass
    /// through from `env` (intersected with it).
    pub env_allowlist: Vec<String>,
    /// Environment variable names stripped after the allowlist is applied.
    pub env_denylist: Vec<String>,
    /// Variables injected last, overwriting any conflicting entry. These
    /// are what make hash-randomized languages reproducible.
    pub required_env: BTreeMap<String, String>,
    /// Whether the sandbox's resource/filesystem enforcement is engaged.
    pub enforce_sandbox: bool,
    /// Hard memory ceiling for the child, in bytes.
    pub max_memory_bytes: u64,
    /// Hard open-file-descriptor ceiling for the child.
    pub max_file_descriptors: u64,
}

impl ExecPolicy {
    /// The default environment denylist: variables that vary across
    /// machines/runs and must never leak into a deterministic child.
    #[must_use]
    pub fn default_env_denylist() -> Vec<String> {
        ["RANDOM", "TZ", "HOSTNAME", "PWD", "OLDPWD", "SHLVL"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// The default required-env injection: `PYTHONHASHSEED=0`, which
    /// neutralizes Python's per-process hash randomization.
    #[must_use]
    pub fn default_required_env() -> BTreeMap<String, String> {
        BTreeMap::from([("PYTHONHASHSEED".to_string(), "0".to_string())])
    }
}

impl Default for ExecPolicy {
    fn default() -> Self {
        Self {
            deterministic: true,
            allow_outside_workspace: false,
            inherit_env: false,
            mode: "strict".to_string(),
            time_mode: "fixed_zero".to_string(),
            scheduler_mode: "repro".to_string(),
            env_allowlist: Vec::new(),
            env_denylist: Self::default_env_denylist(),
            required_env: Self::default_required_env(),
            enforce_sandbox: true,
            max_memory_bytes: 512 * 1024 * 1024,
            max_file_descriptors: 256,
        }
    }
}

/// A single trace event captured during execution (e.g. a sandbox
/// lifecycle transition). Opaque payload; ordering is significant and is
/// preserved verbatim into the canonical form.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TraceEvent {
    /// Zero-based position in the trace.
    pub index: u64,
    /// Short machine-readable event kind (e.g. `"spawn"`, `"signal"`).
    pub kind: String,
    /// Arbitrary structured payload for the event.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// The outcome of executing an [`ExecutionRequest`].
///
/// Produced by the engine, consumed/stored by callers. Two fields are
/// excluded from the canonical form used to compute `result_digest`:
/// timing (lives only in [`ExecutionMetrics`] and provenance) and any
/// audit-log correlation id, since neither is a property of *what ran*.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionResult {
    /// `true` if the command ran to completion under policy with no
    /// integrity or sandbox failures.
    pub ok: bool,
    /// Process exit code, or `-1` if the process never produced one
    /// (spawn failure, signal termination, timeout).
    pub exit_code: i32,
    /// Stable error code; empty string when `ok` is `true`.
    #[serde(default)]
    pub error_code: String,
    /// Human-readable reason the process stopped (timeout escalation,
    /// signal name, empty on clean exit).
    #[serde(default)]
    pub termination_reason: String,
    /// Captured standard output, possibly truncated.
    pub stdout_text: String,
    /// Captured standard error, possibly truncated.
    pub stderr_text: String,
    /// `true` if `stdout_text` was cut short at `max_output_bytes`.
    pub stdout_truncated: bool,
    /// `true` if `stderr_text` was cut short at `max_output_bytes`.
    pub stderr_truncated: bool,
    /// `blake3("req:" || canonical_request)`, hex-encoded.
    pub request_digest: String,
    /// `blake3("res:" || stdout_text)`, hex-encoded.
    pub stdout_digest: String,
    /// `blake3("res:" || stderr_text)`, hex-encoded.
    pub stderr_digest: String,
    /// `blake3("res:" || canonical_result)`, hex-encoded. Computed last,
    /// over every other field of this struct.
    #[serde(default)]
    pub result_digest: String,
    /// Digest over `trace_events`, if any were emitted.
    pub trace_digest: Option<String>,
    /// Ordered trace of sandbox/engine lifecycle events.
    #[serde(default)]
    pub trace_events: Vec<TraceEvent>,
    /// Output-path → digest, entries sorted by path for canonical form.
    #[serde(default)]
    pub output_digests: BTreeMap<String, String>,
    /// Echo of the policy decisions actually applied.
    pub policy_applied: PolicyApplied,
    /// Echo of the sandbox enforcement actually applied.
    pub sandbox_applied: SandboxApplied,
    /// Timing and resource metrics. Outside the digest.
    pub metrics: ExecutionMetrics,
}

/// Echo of the policy decisions the engine actually applied, after
/// defaults, denylist removal, and required-env injection.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PolicyApplied {
    /// Mirrors [`ExecPolicy::deterministic`].
    pub deterministic: bool,
    /// Mirrors [`ExecPolicy::mode`].
    pub mode: String,
    /// Mirrors [`ExecPolicy::time_mode`].
    pub time_mode: String,
    /// Mirrors [`ExecPolicy::scheduler_mode`].
    pub scheduler_mode: String,
    /// The resolved set of environment variable names actually passed
    /// through to the child (post allowlist/denylist/required_env).
    pub resolved_env_keys: Vec<String>,
    /// Mirrors [`ExecPolicy::enforce_sandbox`].
    pub enforce_sandbox: bool,
}

/// Truthful report of which sandbox enforcements were actually applied.
///
/// Distinguishes *enforced* (applied and verified), *partial* (applied
/// but weaker than advertised or unverifiable), and *unsupported* (not
/// available on this platform).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementLevel {
    /// Applied and verified.
    Enforced,
    /// Applied but not verifiable, or weaker than advertised.
    Partial,
    /// Not available on this platform.
    Unsupported,
}

/// Echo of the resource/filesystem enforcement actually applied to the
/// child process.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SandboxApplied {
    /// Enforcement level for `max_memory_bytes`.
    pub memory_limit: EnforcementLevel,
    /// Enforcement level for `max_file_descriptors`.
    pub fd_limit: EnforcementLevel,
    /// Enforcement level for the derived CPU-time cap.
    pub cpu_time_limit: EnforcementLevel,
    /// Enforcement level for the filesystem write sandbox.
    pub filesystem_sandbox: EnforcementLevel,
}

impl SandboxApplied {
    /// All enforcements reported as [`EnforcementLevel::Unsupported`].
    #[must_use]
    pub fn all_unsupported() -> Self {
        Self {
            memory_limit: EnforcementLevel::Unsupported,
            fd_limit: EnforcementLevel::Unsupported,
            cpu_time_limit: EnforcementLevel::Unsupported,
            filesystem_sandbox: EnforcementLevel::Unsupported,
        }
    }
}

/// Timing and resource metrics for a single execution. Never part of any
/// digest; timestamps in particular are wall-clock and therefore excluded
/// from the canonical form by construction (they simply aren't read when
/// building it).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionMetrics {
    /// Wall-clock duration of the whole `execute()` call, in nanoseconds.
    pub duration_ns: u64,
    /// Unix epoch milliseconds when execution started.
    pub started_at_unix_ms: u64,
}

/// Metadata describing a single object stored in the content-addressable
/// store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CasObjectInfo {
    /// `blake3("cas:" || original_bytes)`, hex-encoded. The CAS key.
    pub digest: String,
    /// How the bytes are stored on disk.
    pub encoding: String,
    /// Size of the original (uncompressed) bytes.
    pub original_size: u64,
    /// Size of the bytes as stored (post-compression, if any).
    pub stored_size: u64,
    /// BLAKE3 of the bytes *as stored*, verified on every read before
    /// decompression.
    pub stored_blob_hash: String,
}

/// A single append-only provenance record, one per execution.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProvenanceRecord {
    /// Monotonically increasing, never reused, even across log rotation.
    pub sequence: u64,
    /// Equal to `request_digest`.
    pub execution_id: String,
    /// Opaque tenant identifier, carried for operator visibility only.
    pub tenant_id: String,
    /// The executed request's digest.
    pub request_digest: String,
    /// The produced result's digest.
    pub result_digest: String,
    /// Engine semantic version (e.g. `"0.1.0"`).
    pub engine_semver: String,
    /// Engine ABI version, see [`ENGINE_ABI_VERSION`].
    pub engine_abi_version: u32,
    /// Hash algorithm format version.
    pub hash_algorithm_version: u32,
    /// CAS on-disk format version.
    pub cas_format_version: u32,
    /// Whether this record's result has been replay-verified.
    pub replay_verified: bool,
    /// Mirrors `ExecutionResult::ok`.
    pub ok: bool,
    /// Mirrors `ExecutionResult::error_code`.
    pub error_code: String,
    /// Wall-clock duration, in nanoseconds.
    pub duration_ns: u64,
    /// Unix epoch milliseconds when the record was appended.
    pub timestamp_unix_ms: u64,
    /// Identifier of the worker (thread/process) that ran the execution.
    pub worker_id: String,
    /// Identifier of the node the engine context is running on.
    pub node_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_spec_defaults() {
        let p = ExecPolicy::default();
        assert_eq!(
            p.env_denylist,
            vec!["RANDOM", "TZ", "HOSTNAME", "PWD", "OLDPWD", "SHLVL"]
        );
        assert_eq!(
            p.required_env.get("PYTHONHASHSEED").map(String::as_str),
            Some("0")
        );
        assert_eq!(p.mode, "strict");
        assert_eq!(p.time_mode, "fixed_zero");
        assert_eq!(p.scheduler_mode, "repro");
    }

    #[test]
    fn request_round_trips_through_json() {
        let req = ExecutionRequest {
            request_id: "r1".into(),
            command: "/bin/echo".into(),
            argv: vec!["hello".into()],
            env: BTreeMap::new(),
            cwd: ".".into(),
            workspace_root: "./work".into(),
            inputs: BTreeMap::new(),
            outputs: vec![],
            nonce: 0,
            timeout_ms: 1000,
            max_output_bytes: 1024,
            policy: ExecPolicy::default(),
            tenant_id: "t1".into(),
            llm_options: serde_json::json!({}),
        };
        let s = serde_json::to_string(&req).unwrap();
        let back: ExecutionRequest = serde_json::from_str(&s).unwrap();
        assert_eq!(back.command, req.command);
        assert_eq!(back.argv, req.argv);
    }

    #[test]
    fn sandbox_applied_all_unsupported_reports_every_field() {
        let s = SandboxApplied::all_unsupported();
        assert_eq!(s.memory_limit, EnforcementLevel::Unsupported);
        assert_eq!(s.fd_limit, EnforcementLevel::Unsupported);
        assert_eq!(s.cpu_time_limit, EnforcementLevel::Unsupported);
        assert_eq!(s.filesystem_sandbox, EnforcementLevel::Unsupported);
    }

    proptest::proptest! {
        #[test]
        fn execution_request_round_trips_through_json_for_any_command_and_nonce(
            command in "[a-zA-Z0-9/_.-]{1,32}",
            argv in proptest::collection::vec("[a-zA-Z0-9_.-]{0,16}", 0..4),
            nonce in 0u64..u64::MAX,
        ) {
            let req = ExecutionRequest {
                request_id: "r1".into(),
                command,
                argv,
                env: BTreeMap::new(),
                cwd: ".".into(),
                workspace_root: "./work".into(),
                inputs: BTreeMap::new(),
                outputs: vec![],
                nonce,
                timeout_ms: 1000,
                max_output_bytes: 1024,
                policy: ExecPolicy::default(),
                tenant_id: "t1".into(),
                llm_options: serde_json::json!({}),
            };
            let s = serde_json::to_string(&req).unwrap();
            let back: ExecutionRequest = serde_json::from_str(&s).unwrap();
            proptest::prop_assert_eq!(back.command, req.command);
            proptest::prop_assert_eq!(back.argv, req.argv);
            proptest::prop_assert_eq!(back.nonce, req.nonce);
        }
    }
}
