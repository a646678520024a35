// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! requiem-observability
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod histogram;
mod ring;

pub use histogram::LatencyHistogram;
pub use ring::{ExecutionEvent, EventRing};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// An `AtomicU64` padded to a full cache line so concurrent producers
/// updating adjacent counters never false-share a cache line.
#[repr(align(64))]
#[derive(Default)]
struct PaddedCounter(AtomicU64);

impl PaddedCounter {
    fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Point-in-time snapshot of [`EngineStats`], suitable for the `stats`
/// C-ABI operation's JSON payload.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Total executions attempted.
    pub executions_total: u64,
    /// Executions that completed with `ok == true`.
    pub executions_successful: u64,
    /// Executions that completed with `ok == false`.
    pub executions_failed: u64,
    /// Completed `validate_replay` calls.
    pub replay_verifications: u64,
    /// `validate_replay` calls that found a digest mismatch.
    pub replay_divergences: u64,
    /// CAS `put` calls.
    pub cas_puts: u64,
    /// CAS `get` calls.
    pub cas_gets: u64,
    /// CAS `put` calls that deduplicated against an existing digest.
    pub cas_hits: u64,
    /// CAS integrity failures observed on read (fail-closed rejections).
    pub cas_integrity_failures: u64,
    /// Observed lock-contention events (e.g. CAS index lock contended).
    pub lock_contention_events: u64,
    /// Audit log append failures (non-fatal to execution).
    pub audit_write_failures: u64,
    /// p50 execution latency, in microseconds.
    pub latency_p50_us: u64,
    /// p99 execution latency, in microseconds.
    pub latency_p99_us: u64,
}

/// The engine's global observability state: atomic counters, a latency
/// histogram, and a bounded ring buffer of recent execution events.
///
/// Every mutating method here is wait-free or best-effort and is safe to
/// call from any number of concurrent executor threads; none of them may
/// be held across a blocking I/O call.
#[derive(Default)]
pub struct EngineStats {
    executions_total: PaddedCounter,
    executions_successful: PaddedCounter,
    executions_failed: PaddedCounter,
    replay_verifications: PaddedCounter,
    replay_divergences: PaddedCounter,
    cas_puts: PaddedCounter,
    cas_gets: PaddedCounter,
    cas_hits: PaddedCounter,
    cas_integrity_failures: PaddedCounter,
    lock_contention_events: PaddedCounter,
    audit_write_failures: PaddedCounter,
    histogram: LatencyHistogram,
    ring: EventRing,
}

impl EngineStats {
    /// Create a fresh, zeroed stats block with the given ring-buffer
    /// capacity.
    #[must_use]
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            ring: EventRing::new(ring_capacity),
            ..Self::default()
        }
    }

    /// Record the outcome of one execution: bumps the total/success/fail
    /// counters, records `duration_ns` into the latency histogram, and
    /// pushes an [`ExecutionEvent`] into the ring buffer.
    pub fn record_execution(&self, event: ExecutionEvent) {
        self.executions_total.inc();
        if event.ok {
            self.executions_successful.inc();
        } else {
            self.executions_failed.inc();
        }
        self.histogram.record_nanos(event.duration_ns);
        self.ring.push(event);
    }

    /// Record the outcome of a `validate_replay` call.
    pub fn record_replay(&self, diverged: bool) {
        self.replay_verifications.inc();
        if diverged {
            self.replay_divergences.inc();
        }
    }

    /// Record a CAS `put`. `deduplicated` is `true` when the digest
    /// already existed and no bytes were re-written.
    pub fn record_cas_put(&self, deduplicated: bool) {
        self.cas_puts.inc();
        if deduplicated {
            self.cas_hits.inc();
        }
    }

    /// Record a CAS `get`.
    pub fn record_cas_get(&self) {
        self.cas_gets.inc();
    }

    /// Record a CAS fail-closed integrity rejection.
    pub fn record_cas_integrity_failure(&self) {
        self.cas_integrity_failures.inc();
    }

    /// Record an observed lock-contention event.
    pub fn record_lock_contention(&self) {
        self.lock_contention_events.inc();
    }

    /// Record a non-fatal audit log append failure.
    pub fn record_audit_write_failure(&self) {
        self.audit_write_failures.inc();
    }

    /// Recent execution events, oldest first, up to ring capacity.
    #[must_use]
    pub fn recent_events(&self) -> Vec<ExecutionEvent> {
        self.ring.snapshot()
    }

    /// Take a point-in-time snapshot of every counter and the p50/p99
    /// latency percentiles.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            executions_total: self.executions_total.get(),
            executions_successful: self.executions_successful.get(),
            executions_failed: self.executions_failed.get(),
            replay_verifications: self.replay_verifications.get(),
            replay_divergences: self.replay_divergences.get(),
            cas_puts: self.cas_puts.get(),
            cas_gets: self.cas_gets.get(),
            cas_hits: self.cas_hits.get(),
            cas_integrity_failures: self.cas_integrity_failures.get(),
            lock_contention_events: self.lock_contention_events.get(),
            audit_write_failures: self.audit_write_failures.get(),
            latency_p50_us: self.histogram.percentile(50.0),
            latency_p99_us: self.histogram.percentile(99.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ok: bool, duration_ns: u64) -> ExecutionEvent {
        ExecutionEvent {
            execution_id: "e".to_string(),
            ok,
            error_code: String::new(),
            duration_ns,
            timestamp_unix_ms: 0,
        }
    }

    #[test]
    fn counters_track_success_and_failure() {
        let stats = EngineStats::new(16);
        stats.record_execution(event(true, 1_000));
        stats.record_execution(event(false, 2_000));
        let snap = stats.snapshot();
        assert_eq!(snap.executions_total, 2);
        assert_eq!(snap.executions_successful, 1);
        assert_eq!(snap.executions_failed, 1);
    }

    #[test]
    fn cas_hit_is_distinguished_from_plain_put() {
        let stats = EngineStats::new(16);
        stats.record_cas_put(false);
        stats.record_cas_put(true);
        let snap = stats.snapshot();
        assert_eq!(snap.cas_puts, 2);
        assert_eq!(snap.cas_hits, 1);
    }

    #[test]
    fn replay_divergence_is_counted() {
        let stats = EngineStats::new(16);
        stats.record_replay(false);
        stats.record_replay(true);
        let snap = stats.snapshot();
        assert_eq!(snap.replay_verifications, 2);
        assert_eq!(snap.replay_divergences, 1);
    }

    #[test]
    fn recent_events_preserves_insertion_order() {
        let stats = EngineStats::new(16);
        stats.record_execution(event(true, 1));
        stats.record_execution(event(false, 2));
        let events = stats.recent_events();
        assert_eq!(events.len(), 2);
        assert!(events[0].ok);
        assert!(!events[1].ok);
    }
}
