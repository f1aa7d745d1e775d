//! Error types for durable-dl
//!
//! This module provides the error taxonomy for the library:
//! - [`Error`] - input/API errors returned synchronously to callers
//! - [`CacheError`] - storage failures (always logged, never fatal)
//! - [`ChecksumError`] - checksum validation failures (delivered via validation callbacks)
//! - [`TaskError`] - the serializable last error recorded on a download task

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for durable-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for durable-dl
///
/// Only input errors and session-lifetime errors surface through this type.
/// Transport failures resolve into task state transitions, and storage failures
/// are logged by the session.
#[derive(Debug, Error)]
pub enum Error {
    /// The supplied URL could not be parsed or has no host
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The same URL appeared more than once in a batch request
    #[error("duplicate URL in batch: {0}")]
    DuplicateUrl(String),

    /// Per-URL header list does not line up with the URL list
    #[error("headers count ({actual}) does not match URL count ({expected})")]
    HeadersMatchFailed {
        /// Number of URLs in the batch
        expected: usize,
        /// Number of header maps supplied
        actual: usize,
    },

    /// Per-URL file name list does not line up with the URL list
    #[error("file names count ({actual}) does not match URL count ({expected})")]
    FileNamesMatchFailed {
        /// Number of URLs in the batch
        expected: usize,
        /// Number of file names supplied
        actual: usize,
    },

    /// A task index was outside the task list
    #[error("index {index} out of range for {len} tasks")]
    IndexOutOfRange {
        /// The offending index
        index: usize,
        /// Current number of tasks
        len: usize,
    },

    /// No task is registered for the URL
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// The session actor has stopped and no longer accepts commands
    #[error("session {0} has shut down")]
    SessionClosed(String),

    /// Persistence store error
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Persistence store errors
///
/// Every variant names the path(s) involved together with the underlying cause.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to create a cache directory
    #[error("failed to create directory {path}: {source}")]
    CreateDirectory {
        /// Directory that could not be created
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Failed to move a file
    #[error("failed to move {from} to {to}: {source}")]
    Move {
        /// Source path
        from: PathBuf,
        /// Destination path
        to: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Failed to copy a file
    #[error("failed to copy {from} to {to}: {source}")]
    Copy {
        /// Source path
        from: PathBuf,
        /// Destination path
        to: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Failed to remove a file or directory
    #[error("failed to remove {path}: {source}")]
    Remove {
        /// Path that could not be removed
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Failed to read a file
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path that could not be read
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("failed to write {path}: {source}")]
    Write {
        /// Path that could not be written
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Failed to encode the task descriptor list
    #[error("failed to encode task descriptors: {0}")]
    Encode(#[source] serde_json::Error),

    /// Failed to decode the task descriptor file
    #[error("failed to decode task descriptors at {path}: {source}")]
    Decode {
        /// Descriptor file that could not be decoded
        path: PathBuf,
        /// Underlying decode error
        source: serde_json::Error,
    },
}

/// Checksum validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChecksumError {
    /// The expected digest was empty
    #[error("verification code is empty")]
    CodeEmpty,

    /// The file to validate does not exist
    #[error("file does not exist: {path}")]
    FileDoesNotExist {
        /// Path that was expected to hold the file
        path: PathBuf,
    },

    /// The file could not be read
    #[error("failed to read {path}: {reason}")]
    ReadFailed {
        /// Path that could not be read
        path: PathBuf,
        /// The reason reading failed
        reason: String,
    },
}

/// The last error recorded on a download task
///
/// Stored on the task and persisted with its descriptor, so it must stay serializable.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum TaskError {
    /// The transfer failed at the network level
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a status code outside 200..=299
    #[error("unacceptable status code: {0}")]
    UnacceptableStatusCode(u16),

    /// The transfer was cancelled
    #[error("transfer cancelled")]
    Cancelled,

    /// The downloaded file could not be stored
    #[error("storage error: {0}")]
    Storage(String),

    /// The transport channel was invalidated while the transfer was in flight
    #[error("transport invalidated")]
    TransportInvalidated,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_mismatch_message_names_both_counts() {
        let err = Error::HeadersMatchFailed {
            expected: 3,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "headers count (2) does not match URL count (3)"
        );
    }

    #[test]
    fn cache_error_converts_into_error() {
        let err: Error = CacheError::Remove {
            path: PathBuf::from("/tmp/x"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        }
        .into();
        assert!(
            matches!(err, Error::Cache(CacheError::Remove { .. })),
            "CacheError should convert via #[from], got {err:?}"
        );
        assert!(err.to_string().contains("/tmp/x"));
    }

    #[test]
    fn task_error_serializes_with_kind_tag() {
        let json = serde_json::to_value(TaskError::UnacceptableStatusCode(404)).unwrap();
        assert_eq!(json["kind"], "unacceptableStatusCode");
        assert_eq!(json["detail"], 404);

        let cancelled = serde_json::to_value(TaskError::Cancelled).unwrap();
        assert_eq!(cancelled["kind"], "cancelled");

        let back: TaskError = serde_json::from_value(json).unwrap();
        assert_eq!(back, TaskError::UnacceptableStatusCode(404));
    }

    #[test]
    fn checksum_error_messages_include_path() {
        let err = ChecksumError::FileDoesNotExist {
            path: PathBuf::from("/data/file.bin"),
        };
        assert!(err.to_string().contains("/data/file.bin"));
    }
}
