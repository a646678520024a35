// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! requiem-ffi
#![warn(missing_docs)]

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use requiem_core::ExecutionResult;
use requiem_engine::EngineContext;

/// Opaque engine context exposed over the C ABI.
///
/// Created by [`requiem_init`], destroyed by [`requiem_shutdown`].
/// `requiem_execute`/`requiem_replay`/`requiem_stats` are safe to call
/// concurrently on the same context once `requiem_init` has returned;
/// `requiem_init` and `requiem_shutdown` themselves are not.
pub struct RequiemCtx {
    inner: EngineContext,
}

fn json_ptr(value: &impl serde::Serialize) -> *mut c_char {
    let bytes = requiem_canon::to_canonical_json_bytes(value).unwrap_or_else(|_| b"{}".to_vec());
    string_to_ptr(&bytes)
}

fn error_ptr(message: &str) -> *mut c_char {
    let payload = serde_json::json!({ "error": message });
    let bytes = serde_json::to_vec(&payload).unwrap_or_else(|_| b"{\"error\":\"unknown\"}".to_vec());
    string_to_ptr(&bytes)
}

fn string_to_ptr(bytes: &[u8]) -> *mut c_char {
    match CString::new(bytes.to_vec()) {
        Ok(c) => c.into_raw(),
        Err(_) => CString::new("{\"error\":\"result contained an embedded NUL byte\"}")
            .expect("literal has no NUL")
            .into_raw(),
    }
}

/// # Safety
///
/// `ptr` must be a non-null, NUL-terminated string produced by a call
/// this library made (it is not validated for UTF-8 beforehand).
unsafe fn c_str_to_rust(ptr: *const c_char) -> Option<&'static str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Create a fresh engine context from a `config_json` payload, checking
/// `abi_major.abi_minor` for compatibility with this build.
///
/// Returns a null pointer if `config_json` is null/not-UTF-8/invalid,
/// or if the ABI version is incompatible — there is no context yet to
/// carry a populated error string in either case.
///
/// # Safety
///
/// `config_json`, if non-null, must point to a NUL-terminated UTF-8
/// string valid for the duration of this call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn requiem_init(
    config_json: *const c_char,
    abi_major: u32,
    abi_minor: u32,
) -> *mut RequiemCtx {
    let Some(config_str) = (unsafe { c_str_to_rust(config_json) }) else {
        return ptr::null_mut();
    };
    match requiem_engine::init(config_str, abi_major, abi_minor) {
        Ok(ctx) => Box::into_raw(Box::new(RequiemCtx { inner: ctx })),
        Err(_) => ptr::null_mut(),
    }
}

/// Execute a canonical-JSON `ExecutionRequest` and return a
/// canonical-JSON `ExecutionResult`, or `{"error": "..."}` on failure.
///
/// # Safety
///
/// `ctx` must be a live pointer from [`requiem_init`]. `request_json`,
/// if non-null, must point to a NUL-terminated UTF-8 string valid for
/// the duration of this call. The returned pointer must be released
/// with [`requiem_free_string`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn requiem_execute(
    ctx: *mut RequiemCtx,
    request_json: *const c_char,
) -> *mut c_char {
    let Some(ctx) = (unsafe { ctx.as_ref() }) else {
        return error_ptr("engine context is null");
    };
    let Some(request_str) = (unsafe { c_str_to_rust(request_json) }) else {
        return error_ptr("request_json is null or not valid UTF-8");
    };
    let request = match requiem_canon::parse_request_json(request_str.as_bytes()) {
        Ok(r) => r,
        Err(e) => return error_ptr(&e.to_string()),
    };
    match requiem_engine::execute(&ctx.inner, &request) {
        Ok(result) => json_ptr(&result),
        Err(e) => error_ptr(&e.to_string()),
    }
}

/// Verify a previously produced `ExecutionResult` by re-executing its
/// request, returning `{"ok": bool, "error": string}`.
///
/// # Safety
///
/// Same pointer obligations as [`requiem_execute`], plus
/// `expected_result_json` must point to a NUL-terminated UTF-8 string.
/// The returned pointer must be released with [`requiem_free_string`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn requiem_replay(
    ctx: *mut RequiemCtx,
    request_json: *const c_char,
    expected_result_json: *const c_char,
) -> *mut c_char {
    let Some(ctx) = (unsafe { ctx.as_ref() }) else {
        return error_ptr("engine context is null");
    };
    let Some(request_str) = (unsafe { c_str_to_rust(request_json) }) else {
        return error_ptr("request_json is null or not valid UTF-8");
    };
    let Some(expected_str) = (unsafe { c_str_to_rust(expected_result_json) }) else {
        return error_ptr("expected_result_json is null or not valid UTF-8");
    };
    let request = match requiem_canon::parse_request_json(request_str.as_bytes()) {
        Ok(r) => r,
        Err(e) => return error_ptr(&e.to_string()),
    };
    let expected: ExecutionResult = match serde_json::from_str(expected_str) {
        Ok(r) => r,
        Err(e) => return error_ptr(&format!("expected_result_json does not match expected shape: {e}")),
    };
    match requiem_engine::replay_reexecute(&ctx.inner, &request, &expected) {
        Ok(outcome) => json_ptr(&serde_json::json!({ "ok": outcome.matched, "error": outcome.detail })),
        Err(e) => error_ptr(&e.to_string()),
    }
}

/// Return a canonical-JSON snapshot of this context's observability
/// counters.
///
/// # Safety
///
/// `ctx` must be a live pointer from [`requiem_init`]. The returned
/// pointer must be released with [`requiem_free_string`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn requiem_stats(ctx: *mut RequiemCtx) -> *mut c_char {
    let Some(ctx) = (unsafe { ctx.as_ref() }) else {
        return error_ptr("engine context is null");
    };
    json_ptr(&ctx.inner.stats.snapshot())
}

/// Release a string previously returned by this library.
///
/// # Safety
///
/// `s`, if non-null, must be a pointer this library returned and must
/// not have already been freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn requiem_free_string(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    unsafe {
        drop(CString::from_raw(s));
    }
}

/// Destroy an engine context created by [`requiem_init`].
///
/// # Safety
///
/// `ctx`, if non-null, must be a pointer previously returned by
/// [`requiem_init`] that has not already been freed, and must not be
/// in concurrent use by any other call on this or another thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn requiem_shutdown(ctx: *mut RequiemCtx) {
    if ctx.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(ctx));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_ctx(dir: &std::path::Path) -> *mut RequiemCtx {
        let config = CString::new(format!(r#"{{"cas_root":"{}"}}"#, dir.join("cas").display())).unwrap();
        unsafe { requiem_init(config.as_ptr(), requiem_core::ENGINE_ABI_VERSION, 0) }
    }

    fn sample_request_json(workspace: &std::path::Path) -> CString {
        let json = serde_json::json!({
            "request_id": "r1",
            "command": "/bin/echo",
            "argv": ["hi"],
            "env": {},
            "cwd": workspace.to_string_lossy(),
            "workspace_root": workspace.to_string_lossy(),
            "inputs": {},
            "outputs": [],
            "nonce": 1,
            "timeout_ms": 5000,
            "max_output_bytes": 1048576,
            "policy": {
                "deterministic": true,
                "allow_outside_workspace": false,
                "inherit_env": false,
                "mode": "strict",
                "time_mode": "fixed_zero",
                "scheduler_mode": "repro",
                "env_allowlist": [],
                "env_denylist": [],
                "required_env": {},
                "enforce_sandbox": false,
                "max_memory_bytes": 536870912,
                "max_file_descriptors": 256
            },
            "tenant_id": "t1",
            "llm_options": {}
        });
        CString::new(serde_json::to_vec(&json).unwrap()).unwrap()
    }

    #[test]
    fn init_returns_null_on_abi_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let config = CString::new(format!(r#"{{"cas_root":"{}"}}"#, dir.path().display())).unwrap();
        let ctx = unsafe { requiem_init(config.as_ptr(), requiem_core::ENGINE_ABI_VERSION + 1, 0) };
        assert!(ctx.is_null());
    }

    #[test]
    fn init_returns_null_on_null_config() {
        let ctx = unsafe { requiem_init(ptr::null(), requiem_core::ENGINE_ABI_VERSION, 0) };
        assert!(ctx.is_null());
    }

    #[test]
    fn execute_round_trips_through_the_c_abi() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = init_ctx(dir.path());
        assert!(!ctx.is_null());
        let request = sample_request_json(dir.path());

        let result_ptr = unsafe { requiem_execute(ctx, request.as_ptr()) };
        assert!(!result_ptr.is_null());
        let result_str = unsafe { CStr::from_ptr(result_ptr) }.to_str().unwrap().to_string();
        assert!(result_str.contains("\"ok\":true"));
        assert!(result_str.contains("hi"));

        unsafe {
            requiem_free_string(result_ptr);
            requiem_shutdown(ctx);
        }
    }

    #[test]
    fn execute_with_null_context_reports_error_json() {
        let dir = tempfile::tempdir().unwrap();
        let request = sample_request_json(dir.path());
        let result_ptr = unsafe { requiem_execute(ptr::null_mut(), request.as_ptr()) };
        assert!(!result_ptr.is_null());
        let result_str = unsafe { CStr::from_ptr(result_ptr) }.to_str().unwrap().to_string();
        assert!(result_str.contains("error"));
        unsafe { requiem_free_string(result_ptr) };
    }

    #[test]
    fn replay_round_trips_through_the_c_abi() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = init_ctx(dir.path());
        let request = sample_request_json(dir.path());

        let result_ptr = unsafe { requiem_execute(ctx, request.as_ptr()) };
        let result_str = unsafe { CStr::from_ptr(result_ptr) }.to_str().unwrap();
        let expected = CString::new(result_str).unwrap();

        let replay_ptr = unsafe { requiem_replay(ctx, request.as_ptr(), expected.as_ptr()) };
        let replay_str = unsafe { CStr::from_ptr(replay_ptr) }.to_str().unwrap().to_string();
        assert!(replay_str.contains("\"ok\":true"));

        unsafe {
            requiem_free_string(result_ptr);
            requiem_free_string(replay_ptr);
            requiem_shutdown(ctx);
        }
    }

    #[test]
    fn stats_reports_executions_total() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = init_ctx(dir.path());
        let request = sample_request_json(dir.path());
        let result_ptr = unsafe { requiem_execute(ctx, request.as_ptr()) };

        let stats_ptr = unsafe { requiem_stats(ctx) };
        let stats_str = unsafe { CStr::from_ptr(stats_ptr) }.to_str().unwrap().to_string();
        assert!(stats_str.contains("\"executions_total\":1"));

        unsafe {
            requiem_free_string(result_ptr);
            requiem_free_string(stats_ptr);
            requiem_shutdown(ctx);
        }
    }

    #[test]
    fn shutdown_and_free_string_tolerate_null() {
        unsafe {
            requiem_shutdown(ptr::null_mut());
            requiem_free_string(ptr::null_mut());
        }
    }
}
