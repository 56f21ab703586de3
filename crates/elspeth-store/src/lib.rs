// crates/elspeth-store/src/lib.rs
// ============================================================================
// Module: Elspeth Payload Store
// Description: Content-addressed blob storage with integrity verification.
// Purpose: Let the Landscape recorder persist request/response/row payloads by
// hash, independent of the audit database.
// Dependencies: elspeth-core, thiserror
// ============================================================================

//! ## Overview
//! The payload store is the only place raw bytes live. The recorder stores
//! only hashes; purge removes blobs without touching audit metadata, so
//! every hash in the database remains a verifiable fingerprint even after
//! its bytes are gone (`spec.md` §4.2, §4.13).
//!
//! Two implementations ship here: [`FilesystemPayloadStore`], sharded by
//! hash prefix per `spec.md` §6, and [`MemoryPayloadStore`] for tests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use elspeth_core::hashing::DEFAULT_HASH_ALGORITHM;
use elspeth_core::hashing::hash_bytes;
use elspeth_core::HashDigest;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by a [`PayloadStore`] implementation.
#[derive(Debug, Error)]
pub enum PayloadStoreError {
    /// The requested hash is not present in the store.
    #[error("payload not found: {0}")]
    NotFound(HashDigest),
    /// The stored bytes re-hash to a value different from their key —
    /// the store is corrupt.
    #[error("payload integrity check failed for {expected}: re-hashed to {actual}")]
    Integrity {
        /// The hash the blob was stored under.
        expected: HashDigest,
        /// The hash the blob's bytes actually produce.
        actual: HashDigest,
    },
    /// The underlying filesystem operation failed.
    #[error("payload store io error: {0}")]
    Io(String),
}

impl From<PayloadStoreError> for elspeth_core::EngineError {
    fn from(error: PayloadStoreError) -> Self {
        match error {
            PayloadStoreError::Integrity { .. } => Self::Integrity(error.to_string()),
            other => Self::Integrity(other.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// A content-addressed blob store.
pub trait PayloadStore: Send + Sync {
    /// Stores `bytes`, returning its content hash. Storing identical
    /// content twice returns the same hash and performs no duplicate write.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadStoreError::Io`] when the write fails.
    fn store(&self, bytes: &[u8]) -> Result<HashDigest, PayloadStoreError>;

    /// Retrieves the bytes for `hash`.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadStoreError::NotFound`] when the hash is unknown, or
    /// [`PayloadStoreError::Integrity`] when the stored bytes no longer
    /// hash to `hash`.
    fn retrieve(&self, hash: &HashDigest) -> Result<Vec<u8>, PayloadStoreError>;

    /// Returns whether `hash` is present in the store.
    fn exists(&self, hash: &HashDigest) -> bool;

    /// Deletes the blob for `hash`. Deleting a missing hash succeeds
    /// (purge is idempotent).
    ///
    /// # Errors
    ///
    /// Returns [`PayloadStoreError::Io`] when the delete fails for a
    /// reason other than the blob already being absent.
    fn delete(&self, hash: &HashDigest) -> Result<(), PayloadStoreError>;
}

// ============================================================================
// SECTION: Filesystem Implementation
// ============================================================================

/// A [`PayloadStore`] backed by the filesystem, sharded by hash prefix:
/// `base/<first-2-hex>/<full-hash>`.
#[derive(Debug)]
pub struct FilesystemPayloadStore {
    base_dir: PathBuf,
}

impl FilesystemPayloadStore {
    /// Opens (creating if needed) a filesystem payload store rooted at `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadStoreError::Io`] when `base_dir` cannot be created.
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, PayloadStoreError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|err| PayloadStoreError::Io(err.to_string()))?;
        Ok(Self {
            base_dir,
        })
    }

    fn path_for(&self, hash: &HashDigest) -> PathBuf {
        let hex = hash.as_hex();
        let prefix = &hex[..hex.len().min(2)];
        self.base_dir.join(prefix).join(hex)
    }
}

impl PayloadStore for FilesystemPayloadStore {
    fn store(&self, bytes: &[u8]) -> Result<HashDigest, PayloadStoreError> {
        let hash = hash_bytes(DEFAULT_HASH_ALGORITHM, bytes);
        let path = self.path_for(&hash);
        if path.exists() {
            return Ok(hash);
        }
        let parent = path.parent().ok_or_else(|| PayloadStoreError::Io("invalid shard path".to_string()))?;
        fs::create_dir_all(parent).map_err(|err| PayloadStoreError::Io(err.to_string()))?;
        let tmp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path).map_err(|err| PayloadStoreError::Io(err.to_string()))?;
        file.write_all(bytes).map_err(|err| PayloadStoreError::Io(err.to_string()))?;
        file.sync_all().map_err(|err| PayloadStoreError::Io(err.to_string()))?;
        fs::rename(&tmp_path, &path).map_err(|err| PayloadStoreError::Io(err.to_string()))?;
        Ok(hash)
    }

    fn retrieve(&self, hash: &HashDigest) -> Result<Vec<u8>, PayloadStoreError> {
        let path = self.path_for(hash);
        let bytes = fs::read(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                PayloadStoreError::NotFound(hash.clone())
            } else {
                PayloadStoreError::Io(err.to_string())
            }
        })?;
        let actual = hash_bytes(hash.algorithm, &bytes);
        if &actual != hash {
            return Err(PayloadStoreError::Integrity {
                expected: hash.clone(),
                actual,
            });
        }
        Ok(bytes)
    }

    fn exists(&self, hash: &HashDigest) -> bool {
        self.path_for(hash).exists()
    }

    fn delete(&self, hash: &HashDigest) -> Result<(), PayloadStoreError> {
        let path = self.path_for(hash);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PayloadStoreError::Io(err.to_string())),
        }
    }
}

// ============================================================================
// SECTION: In-Memory Implementation
// ============================================================================

/// A [`PayloadStore`] backed by an in-memory map, for tests.
#[derive(Debug, Default)]
pub struct MemoryPayloadStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryPayloadStore {
    /// Creates an empty in-memory payload store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl PayloadStore for MemoryPayloadStore {
    fn store(&self, bytes: &[u8]) -> Result<HashDigest, PayloadStoreError> {
        let hash = hash_bytes(DEFAULT_HASH_ALGORITHM, bytes);
        self.lock().entry(hash.value.clone()).or_insert_with(|| bytes.to_vec());
        Ok(hash)
    }

    fn retrieve(&self, hash: &HashDigest) -> Result<Vec<u8>, PayloadStoreError> {
        let blobs = self.lock();
        let bytes = blobs.get(&hash.value).cloned().ok_or_else(|| PayloadStoreError::NotFound(hash.clone()))?;
        let actual = hash_bytes(hash.algorithm, &bytes);
        if &actual != hash {
            return Err(PayloadStoreError::Integrity {
                expected: hash.clone(),
                actual,
            });
        }
        Ok(bytes)
    }

    fn exists(&self, hash: &HashDigest) -> bool {
        self.lock().contains_key(&hash.value)
    }

    fn delete(&self, hash: &HashDigest) -> Result<(), PayloadStoreError> {
        self.lock().remove(&hash.value);
        Ok(())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only panic-based assertions are permitted."
    )]
    use super::*;

    fn exercise_store(store: &dyn PayloadStore) {
        let hash_a = store.store(b"hello world").unwrap();
        let hash_b = store.store(b"hello world").unwrap();
        assert_eq!(hash_a, hash_b, "identical content must hash identically");
        assert!(store.exists(&hash_a));
        assert_eq!(store.retrieve(&hash_a).unwrap(), b"hello world");

        store.delete(&hash_a).unwrap();
        assert!(!store.exists(&hash_a));
        assert!(matches!(store.retrieve(&hash_a), Err(PayloadStoreError::NotFound(_))));

        // Deleting an already-missing hash is a success (idempotent purge).
        store.delete(&hash_a).unwrap();
    }

    #[test]
    fn memory_store_round_trips() {
        exercise_store(&MemoryPayloadStore::new());
    }

    #[test]
    fn filesystem_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemPayloadStore::open(dir.path()).unwrap();
        exercise_store(&store);
    }

    #[test]
    fn filesystem_store_shards_by_hash_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemPayloadStore::open(dir.path()).unwrap();
        let hash = store.store(b"shard me").unwrap();
        let shard_dir = dir.path().join(&hash.as_hex()[..2]);
        assert!(shard_dir.is_dir());
        assert!(shard_dir.join(hash.as_hex()).is_file());
    }

    #[test]
    fn filesystem_retrieve_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemPayloadStore::open(dir.path()).unwrap();
        let hash = store.store(b"original").unwrap();
        let path = dir.path().join(&hash.as_hex()[..2]).join(hash.as_hex());
        std::fs::write(&path, b"tampered").unwrap();
        assert!(matches!(store.retrieve(&hash), Err(PayloadStoreError::Integrity { .. })));
    }
}
