//! Bounded ring buffer of recent execution events.
//!
//! A `Mutex<VecDeque<_>>` held only for the duration of a single push or
//! a full-buffer clone; never across I/O or the caller's own work.
//! Capacity-bounded circular overwrite: once full, the oldest event is
//! dropped to make room for the newest, giving O(1) insertion.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// One execution's worth of summary data, retained for recent-activity
/// inspection (e.g. an operator dashboard or a debugging session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Equal to the execution's `request_digest`.
    pub execution_id: String,
    /// Mirrors `ExecutionResult::ok`.
    pub ok: bool,
    /// Mirrors `ExecutionResult::error_code`.
    pub error_code: String,
    /// Wall-clock duration, in nanoseconds.
    pub duration_ns: u64,
    /// Unix epoch milliseconds when the execution completed.
    pub timestamp_unix_ms: u64,
}

/// Bounded circular buffer of the most recent [`ExecutionEvent`]s.
pub struct EventRing {
    capacity: usize,
    events: Mutex<VecDeque<ExecutionEvent>>,
}

impl Default for EventRing {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl EventRing {
    /// Create a ring buffer holding at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// Push a new event, evicting the oldest if at capacity.
    pub fn push(&self, event: ExecutionEvent) {
        let mut events = self.events.lock().unwrap();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Snapshot the buffer's current contents, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> ExecutionEvent {
        ExecutionEvent {
            execution_id: id.to_string(),
            ok: true,
            error_code: String::new(),
            duration_ns: 0,
            timestamp_unix_ms: 0,
        }
    }

    #[test]
    fn push_beyond_capacity_evicts_oldest() {
        let ring = EventRing::new(2);
        ring.push(event("a"));
        ring.push(event("b"));
        ring.push(event("c"));
        let snap = ring.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].execution_id, "b");
        assert_eq!(snap[1].execution_id, "c");
    }

    #[test]
    fn snapshot_preserves_insertion_order() {
        let ring = EventRing::new(10);
        for id in ["a", "b", "c"] {
            ring.push(event(id));
        }
        let ids: Vec<_> = ring.snapshot().iter().map(|e| e.execution_id.clone()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
