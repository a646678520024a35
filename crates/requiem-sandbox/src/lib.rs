// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! requiem-sandbox
//!
//! The one crate in the workspace that uses `unsafe`: `pre_exec`,
//! `setrlimit`, `setsid`, and process-group `kill` all require it, and
//! it is confined to `limits` and `process` with `# Safety` notes at
//! each call site.
#![warn(missing_docs)]

mod env;
mod limits;
mod process;
mod workspace;

pub use process::run;
pub use workspace::confine;

use std::collections::BTreeMap;

use requiem_core::{ExecPolicy, SandboxApplied};

/// Everything needed to spawn and confine a single child process.
///
/// Distinct from [`requiem_core::ExecutionRequest`]: this is the
/// sandbox's own input shape, built by the orchestrator from a request
/// plus its resolved policy.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Executable to invoke.
    pub command: String,
    /// Ordered command-line arguments.
    pub argv: Vec<String>,
    /// Caller-provided environment, before scrubbing.
    pub env: BTreeMap<String, String>,
    /// Working directory for the child.
    pub cwd: String,
    /// Root all `inputs`/`outputs` paths are confined to.
    pub workspace_root: String,
    /// Logical name → filesystem path for declared inputs.
    pub inputs: BTreeMap<String, String>,
    /// Expected output artifact paths.
    pub outputs: Vec<String>,
    /// Wall-clock budget, in milliseconds.
    pub timeout_ms: u64,
    /// Maximum bytes captured per output stream.
    pub max_output_bytes: u64,
    /// When `true`, `inputs`/`outputs` may resolve outside `workspace_root`.
    pub allow_outside_workspace: bool,
    /// Policy governing env scrubbing and resource enforcement.
    pub policy: ExecPolicy,
}

/// Raw outcome of spawning and waiting on a child process.
///
/// Distinct from [`requiem_core::ExecutionResult`]: this carries bytes
/// rather than digests, and no canonical-form concerns — the
/// orchestrator hashes and assembles the public result from this.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    /// Process exit code, or `-1` if none was produced.
    pub exit_code: i32,
    /// Captured standard output, possibly truncated.
    pub stdout: Vec<u8>,
    /// Captured standard error, possibly truncated.
    pub stderr: Vec<u8>,
    /// `true` if `stdout` was cut short at `max_output_bytes`.
    pub stdout_truncated: bool,
    /// `true` if `stderr` was cut short at `max_output_bytes`.
    pub stderr_truncated: bool,
    /// `true` if the process was terminated for exceeding `timeout_ms`.
    pub timed_out: bool,
    /// Stable error code, empty string on a clean run.
    pub error_code: String,
    /// Human-readable detail for `error_code`, empty on a clean run.
    pub error_message: String,
    /// Human-readable reason the process stopped, empty on clean exit.
    pub termination_reason: String,
    /// Which sandbox enforcements were actually applied.
    pub sandbox_applied: SandboxApplied,
    /// Resolved environment variable names actually passed to the child.
    pub resolved_env_keys: Vec<String>,
}
