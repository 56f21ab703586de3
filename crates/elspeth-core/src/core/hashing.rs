// crates/elspeth-core/src/core/hashing.rs
// ============================================================================
// Module: Elspeth Canonical Hashing
// Description: RFC 8785 JSON canonicalization and content hashing utilities.
// Purpose: Provide deterministic hashes for row data, configs, and payloads.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Elspeth hashes all canonical JSON using RFC 8785 (JCS) to guarantee stable,
//! replayable digests across platforms. Binary payloads are hashed directly
//! over their raw bytes. Every hashed artifact in the audit trail traces
//! back to one of the two functions in this module.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Canonical Version
// ============================================================================

/// Tag stored on every run identifying the canonicalization rules in effect.
///
/// A future change to the canonical encoding must advance this constant so
/// that old runs remain distinguishable from new ones during replay.
pub const CANONICAL_VERSION: &str = "elspeth-canonical-v1";

// ============================================================================
// SECTION: Hash Algorithm
// ============================================================================

/// Supported hash algorithms for Elspeth audit artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256 hashing (the only supported algorithm).
    Sha256,
}

/// Default hash algorithm for Elspeth.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

// ============================================================================
// SECTION: Hash Digest
// ============================================================================

/// Deterministic content hash representation.
///
/// # Invariants
/// - `value` is always lowercase hex and matches `algorithm`'s output width.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HashDigest {
    /// Hash algorithm identifier.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex-encoded digest bytes.
    pub value: String,
}

impl HashDigest {
    /// Creates a new digest from raw bytes.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            value: hex_encode(bytes),
        }
    }

    /// Returns the digest's hex string.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.value
    }

    /// Reconstructs a digest from an already-computed hex string, for
    /// callers reading a stored hash back out of persistence rather than
    /// hashing fresh bytes.
    #[must_use]
    pub fn from_hex(algorithm: HashAlgorithm, hex: impl Into<String>) -> Self {
        Self {
            algorithm,
            value: hex.into(),
        }
    }
}

impl std::fmt::Display for HashDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.value.fmt(f)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when computing canonical hashes.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed (e.g. NaN/infinite float, or a cyclic
    /// structure that cannot be represented).
    #[error("failed to canonicalize json: {0}")]
    InvalidType(String),
}

// ============================================================================
// SECTION: Hashing Helpers
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::InvalidType`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::InvalidType(err.to_string()))
}

/// Returns the canonical JSON byte string for a value as a `String`.
///
/// # Errors
///
/// Returns [`HashError::InvalidType`] when serialization fails.
pub fn canonical_json_string<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
    let bytes = canonical_json_bytes(value)?;
    String::from_utf8(bytes).map_err(|err| HashError::InvalidType(err.to_string()))
}

/// Hashes canonical JSON using the provided algorithm.
///
/// # Errors
///
/// Returns [`HashError::InvalidType`] when serialization fails.
pub fn hash_canonical_json<T: Serialize + ?Sized>(
    algorithm: HashAlgorithm,
    value: &T,
) -> Result<HashDigest, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(algorithm, &bytes))
}

/// Convenience wrapper around [`hash_canonical_json`] using
/// [`DEFAULT_HASH_ALGORITHM`].
///
/// # Errors
///
/// Returns [`HashError::InvalidType`] when serialization fails.
pub fn stable_hash<T: Serialize + ?Sized>(value: &T) -> Result<HashDigest, HashError> {
    hash_canonical_json(DEFAULT_HASH_ALGORITHM, value)
}

/// Hashes raw bytes using the provided algorithm.
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            let digest = hasher.finalize();
            HashDigest::new(HashAlgorithm::Sha256, &digest)
        }
    }
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================
