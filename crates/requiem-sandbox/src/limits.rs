//! Resource-limit enforcement for spawned children.
//!
//! Unix applies `setrlimit` for memory, open files, and a derived
//! CPU-time cap inside the child's `pre_exec` hook. Every other target
//! reports [`EnforcementLevel::Unsupported`] rather than silently
//! pretending to enforce a limit it cannot.

use requiem_core::{EnforcementLevel, SandboxApplied};

/// Derive a CPU-time ceiling, in whole seconds, from a wall-clock
/// timeout with a 2x safety factor so a CPU-bound-but-not-hung child
/// isn't killed earlier than the wall-clock timeout would kill it.
#[must_use]
pub fn cpu_time_limit_seconds(timeout_ms: u64) -> u64 {
    ((timeout_ms / 1000) * 2).max(1)
}

/// Make the about-to-be-spawned child the leader of its own session (and
/// thus its own process group, with pgid equal to its pid).
///
/// Unconditional: [`terminate`](crate::process) signals `-(pid)` to reach
/// the whole process group regardless of whether resource limits are
/// enforced, so the session must exist no matter what `enforce_sandbox`
/// says.
#[cfg(unix)]
pub fn apply_session(cmd: &mut std::process::Command) {
    use std::os::unix::process::CommandExt;

    // SAFETY: the closure only calls async-signal-safe `setsid` and
    // performs no allocation or locking, as required between fork and exec.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub fn apply_session(_cmd: &mut std::process::Command) {}

#[cfg(unix)]
pub fn apply(
    cmd: &mut std::process::Command,
    max_memory_bytes: u64,
    max_file_descriptors: u64,
    timeout_ms: u64,
) -> SandboxApplied {
    use std::os::unix::process::CommandExt;

    let cpu_seconds = cpu_time_limit_seconds(timeout_ms);

    // SAFETY: the closure only calls async-signal-safe `setrlimit` and
    // performs no allocation or locking, as required between fork and exec.
    unsafe {
        cmd.pre_exec(move || {
            set_rlimit(libc::RLIMIT_AS, max_memory_bytes);
            set_rlimit(libc::RLIMIT_NOFILE, max_file_descriptors);
            set_rlimit(libc::RLIMIT_CPU, cpu_seconds);
            Ok(())
        });
    }

    SandboxApplied {
        memory_limit: EnforcementLevel::Enforced,
        fd_limit: EnforcementLevel::Enforced,
        cpu_time_limit: EnforcementLevel::Enforced,
        filesystem_sandbox: EnforcementLevel::Unsupported,
    }
}

#[cfg(unix)]
fn set_rlimit(resource: libc::c_int, value: u64) {
    let limit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    // Best-effort: pre_exec runs after fork, before exec; a failed setrlimit
    // here cannot be surfaced except through the exit path, so it is ignored.
    unsafe {
        let _ = libc::setrlimit(resource, &limit);
    }
}

#[cfg(not(unix))]
pub fn apply(
    _cmd: &mut std::process::Command,
    _max_memory_bytes: u64,
    _max_file_descriptors: u64,
    _timeout_ms: u64,
) -> SandboxApplied {
    SandboxApplied::all_unsupported()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_limit_has_a_floor_of_one_second() {
        assert_eq!(cpu_time_limit_seconds(0), 1);
        assert_eq!(cpu_time_limit_seconds(100), 1);
    }

    #[test]
    fn cpu_limit_scales_with_timeout() {
        assert_eq!(cpu_time_limit_seconds(5000), 10);
    }
}
