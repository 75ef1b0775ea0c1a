//! SHA-256 content verification.
//!
//! Validates the integrity of downloaded and cached feature packages.

use std::io::Read;
use std::path::Path;

use devforge_common::error::CacheError;
use devforge_common::types::Sha256Digest;
use sha2::{Digest, Sha256};

fn finish(hasher: Sha256) -> Sha256Digest {
    let mut bytes = [0_u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    Sha256Digest::from_bytes(bytes)
}

/// Computes the SHA-256 digest of an in-memory buffer.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> Sha256Digest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    finish(hasher)
}

/// Computes the SHA-256 digest of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<Sha256Digest, CacheError> {
    tracing::debug!(path = %path.display(), "computing SHA-256 hash");
    let mut file = std::fs::File::open(path).map_err(CacheError::io(path))?;
    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(CacheError::io(path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(finish(hasher))
}

/// Validates that `bytes` hash to `expected`.
///
/// # Errors
///
/// Returns `CacheError::Corrupt` if the digests differ.
pub fn verify_bytes(bytes: &[u8], expected: &Sha256Digest) -> Result<(), CacheError> {
    let actual = hash_bytes(bytes);
    if &actual == expected {
        Ok(())
    } else {
        Err(CacheError::Corrupt {
            digest: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

/// Validates that a file hashes to `expected`.
///
/// # Errors
///
/// Returns `CacheError::Corrupt` if the digests differ, or an I/O error if
/// the file cannot be read.
pub fn verify_file(path: &Path, expected: &Sha256Digest) -> Result<(), CacheError> {
    tracing::debug!(path = %path.display(), "validating SHA-256 hash");
    let actual = hash_file(path)?;
    if &actual == expected {
        Ok(())
    } else {
        Err(CacheError::Corrupt {
            digest: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}
