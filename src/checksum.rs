//! Checksum validation for finished files
//!
//! Validation is a pure function of a path, an algorithm and an expected digest.
//! The session runs it on the blocking pool through the [`FileChecksum`] trait so
//! tests and embedders can substitute their own implementation.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use memmap2::Mmap;
use sha2::Digest;

use crate::error::ChecksumError;
use crate::types::{ChecksumAlgorithm, Validation};

/// Files at least this large are memory-mapped instead of read into a buffer
const MMAP_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Trait for checksum validation implementations
pub trait FileChecksum: Send + Sync {
    /// Compare the digest of the file at `path` with `code`
    ///
    /// Returns `Ok(true)` on a match and `Ok(false)` on a mismatch.
    fn validate(
        &self,
        path: &Path,
        code: &str,
        algorithm: ChecksumAlgorithm,
    ) -> Result<bool, ChecksumError>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str {
        "checksum"
    }
}

/// Default validator backed by the `md5`, `sha1` and `sha2` crates
#[derive(Clone, Copy, Debug, Default)]
pub struct DigestFileChecksum;

impl FileChecksum for DigestFileChecksum {
    fn validate(
        &self,
        path: &Path,
        code: &str,
        algorithm: ChecksumAlgorithm,
    ) -> Result<bool, ChecksumError> {
        validate_file(path, code, algorithm)
    }

    fn name(&self) -> &'static str {
        "digest"
    }
}

/// Validate the file at `path` against the expected hex digest `code`
///
/// The comparison is case-insensitive.
///
/// # Errors
///
/// - [`ChecksumError::CodeEmpty`] if `code` is empty
/// - [`ChecksumError::FileDoesNotExist`] if nothing is stored at `path`
/// - [`ChecksumError::ReadFailed`] if the file cannot be opened or read
pub fn validate_file(
    path: &Path,
    code: &str,
    algorithm: ChecksumAlgorithm,
) -> Result<bool, ChecksumError> {
    let expected = code.trim();
    if expected.is_empty() {
        return Err(ChecksumError::CodeEmpty);
    }
    if !path.is_file() {
        return Err(ChecksumError::FileDoesNotExist {
            path: path.to_path_buf(),
        });
    }

    let actual = file_digest(path, algorithm)?;
    Ok(actual.eq_ignore_ascii_case(expected))
}

/// Map a validator result onto the task's validation outcome
pub(crate) fn outcome(result: &Result<bool, ChecksumError>) -> Validation {
    match result {
        Ok(true) => Validation::Correct,
        Ok(false) | Err(_) => Validation::Incorrect,
    }
}

fn file_digest(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String, ChecksumError> {
    let read_failed = |e: std::io::Error| ChecksumError::ReadFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut file = File::open(path).map_err(read_failed)?;
    let len = file.metadata().map_err(read_failed)?.len();

    if len >= MMAP_THRESHOLD {
        // SAFETY: the session owns its finished-files directory and does not
        // modify a file while it is being validated
        let map = unsafe { Mmap::map(&file) }.map_err(read_failed)?;
        Ok(digest_hex(algorithm, &map))
    } else {
        let mut bytes = Vec::with_capacity(len as usize);
        file.read_to_end(&mut bytes).map_err(read_failed)?;
        Ok(digest_hex(algorithm, &bytes))
    }
}

fn digest_hex(algorithm: ChecksumAlgorithm, bytes: &[u8]) -> String {
    match algorithm {
        ChecksumAlgorithm::Md5 => format!("{:x}", md5::compute(bytes)),
        ChecksumAlgorithm::Sha1 => hex::encode(sha1::Sha1::digest(bytes)),
        ChecksumAlgorithm::Sha256 => hex::encode(sha2::Sha256::digest(bytes)),
        ChecksumAlgorithm::Sha512 => hex::encode(sha2::Sha512::digest(bytes)),
    }
}
