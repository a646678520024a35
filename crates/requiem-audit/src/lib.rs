// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! requiem-audit
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use requiem_canon::to_canonical_json_bytes;
use requiem_core::ProvenanceRecord;
use requiem_error::{ErrorCode, RequiemError};

struct AuditLogInner {
    file: File,
    next_sequence: u64,
}

/// Append-only NDJSON provenance log.
///
/// One [`ProvenanceRecord`] per line, each serialized as single-line
/// canonical JSON. `sequence` assignment and the write itself happen
/// under one mutex, held only across the write-and-flush — never across
/// any caller-side work.
pub struct AuditLog {
    path: PathBuf,
    inner: Mutex<AuditLogInner>,
}

impl AuditLog {
    /// Open (creating if absent) the NDJSON log at `path`.
    ///
    /// The next sequence number continues from the highest of: the
    /// highest `sequence` found in the existing file at `path`, and the
    /// highest ever recorded in `path`'s `.seq` sidecar. The sidecar is
    /// what makes sequence numbers survive an operator rotating the log
    /// file itself (renaming it aside and starting a fresh file at the
    /// same path) — reading only the current file's contents would let
    /// a rotation silently restart numbering from zero.
    ///
    /// # Errors
    ///
    /// Returns a [`RequiemError`] if the file cannot be opened or an
    /// existing line fails to parse as a [`ProvenanceRecord`].
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RequiemError> {
        let path = path.into();
        let from_file = Self::highest_sequence(&path)?;
        let from_sidecar = Self::read_sidecar(&path);
        let next_sequence = match (from_file, from_sidecar) {
            (None, None) => 0,
            (a, b) => a.into_iter().chain(b).max().unwrap() + 1,
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error(&e, "open audit log"))?;
        let log = Self {
            path,
            inner: Mutex::new(AuditLogInner { file, next_sequence }),
        };
        if next_sequence > 0 {
            log.write_sidecar(next_sequence - 1);
        }
        Ok(log)
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".seq");
        PathBuf::from(name)
    }

    fn read_sidecar(path: &Path) -> Option<u64> {
        std::fs::read_to_string(Self::sidecar_path(path))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    fn write_sidecar(&self, highest_sequence: u64) {
        let _ = std::fs::write(Self::sidecar_path(&self.path), highest_sequence.to_string());
    }

    fn highest_sequence(path: &Path) -> Result<Option<u64>, RequiemError> {
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(path).map_err(|e| io_error(&e, "read existing audit log"))?;
        let mut max = None;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| io_error(&e, "read audit log line"))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ProvenanceRecord = serde_json::from_str(&line).map_err(|e| {
                RequiemError::new(
                    ErrorCode::JsonParseError,
                    format!("corrupt audit log line: {e}"),
                )
            })?;
            max = Some(max.map_or(record.sequence, |m: u64| m.max(record.sequence)));
        }
        Ok(max)
    }

    /// Append `record` to the log, assigning its `sequence` field.
    ///
    /// Never fails the caller: write failures return `false` and must be
    /// surfaced by the caller as a counter increment, not propagated as
    /// an error that would make the engine treat an otherwise-successful
    /// execution as failed.
    pub fn append(&self, record: &mut ProvenanceRecord) -> bool {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(_) => return false,
        };
        record.sequence = inner.next_sequence;

        let Ok(mut bytes) = to_canonical_json_bytes(record) else {
            return false;
        };
        bytes.push(b'\n');

        if inner.file.write_all(&bytes).is_err() || inner.file.flush().is_err() {
            tracing::warn!(path = %self.path.display(), "audit log append failed");
            return false;
        }
        let assigned = inner.next_sequence;
        inner.next_sequence += 1;
        drop(inner);
        self.write_sidecar(assigned);
        true
    }

    /// The sequence number that will be assigned to the next appended
    /// record.
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.inner.lock().map(|g| g.next_sequence).unwrap_or(0)
    }

    /// Path to the underlying log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn io_error(e: &dyn std::fmt::Display, context: &str) -> RequiemError {
    RequiemError::new(ErrorCode::JsonParseError, format!("{context}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sequence: u64) -> ProvenanceRecord {
        ProvenanceRecord {
            sequence,
            execution_id: "req-digest".to_string(),
            tenant_id: "t1".to_string(),
            request_digest: "req-digest".to_string(),
            result_digest: "res-digest".to_string(),
            engine_semver: "0.1.0".to_string(),
            engine_abi_version: 1,
            hash_algorithm_version: 1,
            cas_format_version: 2,
            replay_verified: false,
            ok: true,
            error_code: String::new(),
            duration_ns: 1_000,
            timestamp_unix_ms: 0,
            worker_id: "w1".to_string(),
            node_id: "n1".to_string(),
        }
    }

    #[test]
    fn sequences_are_strictly_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.ndjson")).unwrap();
        for i in 0..5 {
            let mut r = record(999);
            assert!(log.append(&mut r));
            assert_eq!(r.sequence, i);
        }
    }

    #[test]
    fn each_line_parses_independently() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.ndjson");
        let log = AuditLog::open(&path).unwrap();
        for _ in 0..3 {
            log.append(&mut record(0));
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in lines {
            let parsed: ProvenanceRecord = serde_json::from_str(line).unwrap();
            assert!(parsed.ok);
        }
    }

    #[test]
    fn reopening_continues_sequence_without_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.ndjson");
        {
            let log = AuditLog::open(&path).unwrap();
            for _ in 0..3 {
                log.append(&mut record(0));
            }
        }
        let reopened = AuditLog::open(&path).unwrap();
        assert_eq!(reopened.next_sequence(), 3);
        let mut r = record(0);
        reopened.append(&mut r);
        assert_eq!(r.sequence, 3);
    }

    #[test]
    fn sequence_never_reused_across_simulated_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("audit.ndjson");
        let rotated = dir.path().join("audit.ndjson.1");
        {
            let log = AuditLog::open(&original).unwrap();
            for _ in 0..4 {
                log.append(&mut record(0));
            }
        }
        std::fs::rename(&original, &rotated).unwrap();
        let log = AuditLog::open(&original).unwrap();
        let mut r = record(0);
        log.append(&mut r);
        assert_eq!(r.sequence, 4, "the .seq sidecar must survive the rename so numbering never resets");
    }
}
