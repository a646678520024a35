//! Local-filesystem [`CasStore`] backend.
//!
//! Objects live under `<root>/objects/<AB>/<CD>/<digest>` with a `.meta`
//! sidecar holding their [`CasObjectInfo`] as canonical JSON. Writes go
//! through a temp-file-then-rename sequence in the same shard directory
//! so the rename is atomic on the same filesystem.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use requiem_canon::{blake3_domain, to_canonical_json_bytes, Domain};
use requiem_core::CasObjectInfo;
use requiem_error::{ErrorCode, RequiemError};

use crate::{CasStore, Encoding};

/// Filesystem-backed content-addressable store, format version 2.
pub struct LocalCasStore {
    root: PathBuf,
    index: Mutex<BTreeMap<String, CasObjectInfo>>,
    integrity_failures: AtomicU64,
}

impl LocalCasStore {
    /// Open (or create) a store rooted at `root`, rebuilding the
    /// in-memory index from `.meta` sidecars already on disk.
    ///
    /// # Errors
    ///
    /// Returns a [`RequiemError`] if `root` cannot be created or its
    /// existing contents cannot be read.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, RequiemError> {
        let root = root.into();
        let objects_dir = root.join("objects");
        fs::create_dir_all(&objects_dir).map_err(|e| io_error(&e, "create CAS root"))?;

        let mut index = BTreeMap::new();
        for info in scan_meta_sidecars(&objects_dir)? {
            index.insert(info.digest.clone(), info);
        }

        Ok(Self {
            root,
            index: Mutex::new(index),
            integrity_failures: AtomicU64::new(0),
        })
    }

    /// Number of fail-closed integrity rejections observed on read, since
    /// this store was opened.
    #[must_use]
    pub fn integrity_failures(&self) -> u64 {
        self.integrity_failures.load(Ordering::Relaxed)
    }

    fn shard_dir(&self, digest: &str) -> PathBuf {
        self.root
            .join("objects")
            .join(&digest[0..2])
            .join(&digest[2..4])
    }

    fn object_path(&self, digest: &str) -> PathBuf {
        self.shard_dir(digest).join(digest)
    }

    fn meta_path(&self, digest: &str) -> PathBuf {
        self.shard_dir(digest).join(format!("{digest}.meta"))
    }

    fn write_atomic(&self, dir: &Path, final_path: &Path, bytes: &[u8]) -> Result<(), RequiemError> {
        fs::create_dir_all(dir).map_err(|e| io_error(&e, "create shard directory"))?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(dir)
            .map_err(|e| io_error(&e, "create temp file"))?;
        tmp.write_all(bytes).map_err(|e| io_error(&e, "write temp file"))?;
        tmp.as_file().sync_all().map_err(|e| io_error(&e, "fsync temp file"))?;
        tmp.persist(final_path)
            .map_err(|e| io_error(&e.error, "rename temp file into place"))?;
        Ok(())
    }
}

impl CasStore for LocalCasStore {
    fn put(&self, bytes: &[u8], encoding: Encoding) -> Result<String, RequiemError> {
        let digest = blake3_domain(Domain::Cas, bytes).to_hex();

        if self.contains(&digest) {
            return Ok(digest);
        }

        let stored_bytes = match encoding {
            Encoding::Identity => bytes.to_vec(),
            Encoding::Zstd => zstd::encode_all(bytes, 0)
                .map_err(|e| io_error(&e, "zstd-compress object"))?,
        };
        let stored_blob_hash = blake3_domain(Domain::Cas, &stored_bytes).to_hex();

        let shard = self.shard_dir(&digest);
        self.write_atomic(&shard, &self.object_path(&digest), &stored_bytes)?;

        let info = CasObjectInfo {
            digest: digest.clone(),
            encoding: encoding.as_str().to_string(),
            original_size: bytes.len() as u64,
            stored_size: stored_bytes.len() as u64,
            stored_blob_hash,
        };
        let meta_bytes = to_canonical_json_bytes(&info)?;
        self.write_atomic(&shard, &self.meta_path(&digest), &meta_bytes)?;

        self.index.lock().unwrap().insert(digest.clone(), info);
        Ok(digest)
    }

    fn get(&self, digest: &str) -> Result<Option<Vec<u8>>, RequiemError> {
        let Some(info) = self.info(digest) else {
            return Ok(None);
        };

        let stored = match fs::read(self.object_path(digest)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&e, "read CAS object")),
        };

        if blake3_domain(Domain::Cas, &stored).to_hex() != info.stored_blob_hash {
            tracing::warn!(digest = %digest, "cas stored_blob_hash mismatch, failing closed");
            self.integrity_failures.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let original = match info.encoding.as_str() {
            "zstd" => match zstd::decode_all(stored.as_slice()) {
                Ok(bytes) => bytes,
                Err(_) => {
                    self.integrity_failures.fetch_add(1, Ordering::Relaxed);
                    return Ok(None);
                }
            },
            _ => stored,
        };

        if blake3_domain(Domain::Cas, &original).to_hex() != digest {
            tracing::warn!(digest = %digest, "cas content digest mismatch, failing closed");
            self.integrity_failures.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        Ok(Some(original))
    }

    fn contains(&self, digest: &str) -> bool {
        self.index.lock().unwrap().contains_key(digest)
    }

    fn info(&self, digest: &str) -> Option<CasObjectInfo> {
        self.index.lock().unwrap().get(digest).cloned()
    }

    fn remove(&self, digest: &str) -> bool {
        let object_removed = match fs::remove_file(self.object_path(digest)) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(_) => false,
        };
        let meta_removed = match fs::remove_file(self.meta_path(digest)) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(_) => false,
        };
        if object_removed && meta_removed {
            self.index.lock().unwrap().remove(digest);
            true
        } else {
            false
        }
    }

    fn scan(&self, limit: usize, start_after: Option<&str>) -> Vec<CasObjectInfo> {
        let index = self.index.lock().unwrap();
        index
            .values()
            .filter(|info| start_after.is_none_or(|after| info.digest.as_str() > after))
            .take(limit)
            .cloned()
            .collect()
    }

    fn size(&self) -> usize {
        self.index.lock().unwrap().len()
    }

    fn backend_id(&self) -> &'static str {
        "local_fs"
    }
}

fn scan_meta_sidecars(objects_dir: &Path) -> Result<Vec<CasObjectInfo>, RequiemError> {
    let mut infos = Vec::new();
    if !objects_dir.exists() {
        return Ok(infos);
    }
    for top in fs::read_dir(objects_dir).map_err(|e| io_error(&e, "list CAS shard prefixes"))? {
        let top = top.map_err(|e| io_error(&e, "read CAS shard entry"))?;
        if !top.file_type().map_err(|e| io_error(&e, "stat CAS shard entry"))?.is_dir() {
            continue;
        }
        for mid in fs::read_dir(top.path()).map_err(|e| io_error(&e, "list CAS shard suffixes"))? {
            let mid = mid.map_err(|e| io_error(&e, "read CAS shard entry"))?;
            if !mid.file_type().map_err(|e| io_error(&e, "stat CAS shard entry"))?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(mid.path()).map_err(|e| io_error(&e, "list CAS objects"))? {
                let entry = entry.map_err(|e| io_error(&e, "read CAS object entry"))?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("meta") {
                    continue;
                }
                let bytes = fs::read(&path).map_err(|e| io_error(&e, "read meta sidecar"))?;
                match serde_json::from_slice::<CasObjectInfo>(&bytes) {
                    Ok(info) => infos.push(info),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable CAS meta sidecar");
                    }
                }
            }
        }
    }
    infos.sort_by(|a, b| a.digest.cmp(&b.digest));
    Ok(infos)
}

fn io_error(e: &dyn std::fmt::Display, context: &str) -> RequiemError {
    RequiemError::new(ErrorCode::CasIntegrityFailed, format!("{context}: {e}"))
}
