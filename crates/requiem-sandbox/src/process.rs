//! Child-process spawning, bounded output capture, and timeout
//! enforcement with escalating signal termination.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use requiem_core::SandboxApplied;
use requiem_error::{ErrorCode, RequiemError};

use crate::{env, limits, workspace};
use crate::{ProcessResult, ProcessSpec};

const GRACE_PERIOD: Duration = Duration::from_millis(250);
const READ_CHUNK: usize = 64 * 1024;

/// Run `spec` to completion or timeout.
///
/// # Errors
///
/// Returns [`ErrorCode::PathEscape`] or [`ErrorCode::MissingInput`] if
/// path confinement fails before the child is ever spawned. All other
/// failure modes (spawn failure, timeout, unsupported sandboxing) are
/// reported inside [`ProcessResult`] rather than as an `Err`, since the
/// engine must still assemble an `ExecutionResult` for them.
pub fn run(spec: &ProcessSpec) -> Result<ProcessResult, RequiemError> {
    for path in spec.inputs.values().chain(spec.outputs.iter()) {
        let resolved = workspace::confine(&spec.workspace_root, path, spec.allow_outside_workspace)?;
        if spec.inputs.values().any(|p| p == path) && !resolved.exists() {
            return Err(RequiemError::new(
                ErrorCode::MissingInput,
                format!("declared input {path:?} does not exist at {}", resolved.display()),
            ));
        }
    }

    let resolved_env = env::resolve(&spec.env, &spec.policy);
    let resolved_env_keys: Vec<String> = resolved_env.keys().cloned().collect();

    let mut cmd = Command::new(&spec.command);
    cmd.args(&spec.argv)
        .current_dir(&spec.cwd)
        .env_clear()
        .envs(&resolved_env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Always put the child in its own session/process group so `terminate`
    // can reach it (and any descendants) via `kill(-(pid), ...)`, independent
    // of whether resource limits are enforced.
    limits::apply_session(&mut cmd);

    let sandbox_applied = if spec.policy.enforce_sandbox {
        limits::apply(
            &mut cmd,
            spec.policy.max_memory_bytes,
            spec.policy.max_file_descriptors,
            spec.timeout_ms,
        )
    } else {
        SandboxApplied::all_unsupported()
    };

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return Ok(ProcessResult {
                exit_code: -1,
                stdout: Vec::new(),
                stderr: Vec::new(),
                stdout_truncated: false,
                stderr_truncated: false,
                timed_out: false,
                error_code: "spawn_failed".to_string(),
                error_message: e.to_string(),
                termination_reason: String::new(),
                sandbox_applied: SandboxApplied::all_unsupported(),
                resolved_env_keys,
            });
        }
    };

    let pid = child.id();
    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");
    let max_bytes = spec.max_output_bytes as usize;

    let stdout_handle = thread::spawn(move || capture_bounded(stdout, max_bytes));
    let stderr_handle = thread::spawn(move || capture_bounded(stderr, max_bytes));

    let (wait_tx, wait_rx) = mpsc::channel();
    let waiter = thread::spawn(move || {
        let status = child.wait();
        let _ = wait_tx.send(());
        (child, status)
    });

    let timed_out = wait_rx.recv_timeout(Duration::from_millis(spec.timeout_ms)).is_err();
    let mut termination_reason = String::new();

    if timed_out {
        terminate(pid, Duration::from_millis(spec.timeout_ms));
        termination_reason = "timeout: SIGTERM then SIGKILL escalation".to_string();
    }

    let (_child, status) = waiter.join().expect("waiter thread panicked");
    let (stdout_bytes, stdout_truncated) = stdout_handle.join().expect("stdout reader panicked");
    let (stderr_bytes, stderr_truncated) = stderr_handle.join().expect("stderr reader panicked");

    let exit_code = status
        .as_ref()
        .ok()
        .and_then(std::process::ExitStatus::code)
        .unwrap_or(-1);

    Ok(ProcessResult {
        exit_code,
        stdout: stdout_bytes,
        stderr: stderr_bytes,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        error_code: if timed_out { "timeout".to_string() } else { String::new() },
        error_message: String::new(),
        termination_reason,
        sandbox_applied,
        resolved_env_keys,
    })
}

fn capture_bounded(mut reader: impl Read, max_bytes: usize) -> (Vec<u8>, bool) {
    let mut out = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                if out.len() < max_bytes {
                    let remaining = max_bytes - out.len();
                    let take = remaining.min(n);
                    out.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }
    (out, truncated)
}

#[cfg(unix)]
fn terminate(pid: u32, _already_waited: Duration) {
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGTERM);
    }
    thread::sleep(GRACE_PERIOD);
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32, _already_waited: Duration) {
    thread::sleep(GRACE_PERIOD);
}

#[cfg(test)]
mod tests {
    use super::*;
    use requiem_core::ExecPolicy;
    use std::collections::BTreeMap;

    fn spec(command: &str, argv: Vec<&str>, timeout_ms: u64) -> ProcessSpec {
        ProcessSpec {
            command: command.to_string(),
            argv: argv.into_iter().map(String::from).collect(),
            env: BTreeMap::new(),
            cwd: ".".to_string(),
            workspace_root: ".".to_string(),
            inputs: BTreeMap::new(),
            outputs: vec![],
            timeout_ms,
            max_output_bytes: 1 << 20,
            allow_outside_workspace: true,
            policy: ExecPolicy {
                enforce_sandbox: false,
                ..ExecPolicy::default()
            },
        }
    }

    #[test]
    fn echo_runs_and_captures_stdout() {
        let result = run(&spec("/bin/echo", vec!["hello"], 5000)).unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, b"hello\n");
        assert!(result.error_code.is_empty());
    }

    #[test]
    fn missing_command_reports_spawn_failed() {
        let result = run(&spec("/no/such/binary", vec![], 5000)).unwrap();
        assert_eq!(result.error_code, "spawn_failed");
    }

    #[test]
    fn timeout_terminates_long_running_child() {
        let start = std::time::Instant::now();
        let result = run(&spec("/bin/sleep", vec!["10"], 100)).unwrap();
        assert!(result.timed_out);
        assert_eq!(result.error_code, "timeout");
        assert!(!result.termination_reason.is_empty());
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn output_beyond_max_bytes_is_truncated() {
        let mut s = spec("/bin/sh", vec!["-c", "yes x | head -c 100000"], 5000);
        s.max_output_bytes = 10;
        let result = run(&s).unwrap();
        assert!(result.stdout_truncated);
        assert_eq!(result.stdout.len(), 10);
    }
}
