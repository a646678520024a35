// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! requiem-cas
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod local;

pub use local::LocalCasStore;

use requiem_core::CasObjectInfo;
use requiem_error::RequiemError;

/// On-disk encoding of a stored object. Never affects its digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Stored exactly as given.
    Identity,
    /// Stored zstd-compressed.
    Zstd,
}

impl Encoding {
    /// The string recorded in `CasObjectInfo::encoding`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Zstd => "zstd",
        }
    }
}

/// Polymorphic content-addressable object store.
///
/// Implementations must uphold: `put` is idempotent by content and never
/// re-writes an existing digest; `get` fails closed (any integrity
/// mismatch returns `Ok(None)`, never corrupt bytes); `scan` returns
/// objects sorted by digest regardless of underlying iteration order.
pub trait CasStore: Send + Sync {
    /// Store `bytes`, returning its digest. Idempotent: if an object with
    /// the same digest already exists, returns it without rewriting.
    ///
    /// # Errors
    ///
    /// Returns a [`RequiemError`] on I/O failure. The store is left
    /// unchanged.
    fn put(&self, bytes: &[u8], encoding: Encoding) -> Result<String, RequiemError>;

    /// Fetch the object with the given digest.
    ///
    /// Returns `Ok(None)` both when the object is absent and when any
    /// integrity check fails on read (fail-closed) — callers cannot
    /// distinguish the two without inspecting counters.
    ///
    /// # Errors
    ///
    /// Returns a [`RequiemError`] only on unexpected I/O failure (e.g.
    /// permission denied), not on a missing or corrupt object.
    fn get(&self, digest: &str) -> Result<Option<Vec<u8>>, RequiemError>;

    /// Whether an object with this digest is present in the index.
    fn contains(&self, digest: &str) -> bool;

    /// Metadata for a stored object, if present.
    fn info(&self, digest: &str) -> Option<CasObjectInfo>;

    /// Delete an object and its sidecar. Returns `true` on deletion or if
    /// it was already absent; `false` only on I/O failure.
    fn remove(&self, digest: &str) -> bool;

    /// Enumerate stored objects, sorted by digest ascending.
    ///
    /// `start_after` is an opaque resume token (the digest of the last
    /// object from a previous page); pass `None` to start from the
    /// beginning.
    fn scan(&self, limit: usize, start_after: Option<&str>) -> Vec<CasObjectInfo>;

    /// Number of objects currently in the index.
    fn size(&self) -> usize;

    /// Stable identifier for this backend implementation, e.g. `"local_fs"`.
    fn backend_id(&self) -> &'static str;
}
