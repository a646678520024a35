//! Deterministic environment scrubbing.
//!
//! Order matters and is fixed: start from an empty set, intersect with
//! the allowlist, strip the denylist, then inject `required_env` last so
//! it always wins. Reordering these steps would change which variables a
//! child sees for the same policy, which would change `result_digest`.

use std::collections::BTreeMap;

use requiem_core::ExecPolicy;

/// Extra variables stripped when `time_mode == "fixed_zero"`, beyond
/// whatever the policy's own `env_denylist` already removes. These are
/// locale/timezone variables that would otherwise perturb child-side
/// formatting (date strings, decimal separators) without being in the
/// default denylist.
const FIXED_ZERO_EXTRA_DENYLIST: &[&str] = &["LANG", "LC_ALL", "LC_TIME", "LC_NUMERIC"];

/// Compute the environment a child should see, given the caller-provided
/// `env` and `policy`, plus the parent process's own environment when
/// `inherit_env` is set.
///
/// Returns the resolved map together with its sorted key list (the key
/// list is what `PolicyApplied::resolved_env_keys` echoes back).
#[must_use]
pub fn resolve(env: &BTreeMap<String, String>, policy: &ExecPolicy) -> BTreeMap<String, String> {
    let mut resolved: BTreeMap<String, String> = if policy.inherit_env {
        std::env::vars().collect()
    } else {
        BTreeMap::new()
    };

    for (k, v) in env {
        if policy.env_allowlist.is_empty() || policy.env_allowlist.iter().any(|a| a == k) {
            resolved.insert(k.clone(), v.clone());
        }
    }

    for key in &policy.env_denylist {
        resolved.remove(key);
    }
    if policy.time_mode == "fixed_zero" {
        for key in FIXED_ZERO_EXTRA_DENYLIST {
            resolved.remove(*key);
        }
    }

    for (k, v) in &policy.required_env {
        resolved.insert(k.clone(), v.clone());
    }

    resolved
}
