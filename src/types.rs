//! Core types for durable-dl

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::TaskError;

/// Request headers attached to a download
///
/// Ordered so that persisted descriptors serialize deterministically.
pub type Headers = BTreeMap<String, String>;

/// Status of a download task or of a whole session
///
/// `WillSuspend`, `WillCancel` and `WillRemove` are pending-intent markers: the
/// request was made while a transfer was running and the transport has not yet
/// delivered the completion that settles it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    /// Created or parked behind the concurrency ceiling
    #[default]
    Waiting,
    /// Transfer in flight
    Running,
    /// Stopped with (possibly) a resume token; can be started again
    Suspended,
    /// Transfer failed
    Failed,
    /// File downloaded and stored
    Succeeded,
    /// Cancelled; temporary data discarded
    Canceled,
    /// Removed; temporary data (and optionally the file) discarded
    Removed,
    /// Suspend requested while running
    WillSuspend,
    /// Cancel requested while running
    WillCancel,
    /// Remove requested while running
    WillRemove,
}

impl Status {
    /// Whether this is one of the pending-intent markers
    pub fn is_pending_intent(&self) -> bool {
        matches!(
            self,
            Status::WillSuspend | Status::WillCancel | Status::WillRemove
        )
    }

    /// Whether this status ends a task's life in the session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Succeeded | Status::Failed | Status::Canceled | Status::Removed
        )
    }

    /// Whether a transfer is still attached (running or settling an intent)
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Status::Running) || self.is_pending_intent()
    }

    /// Whether a start request may begin a transfer from this status
    pub fn is_startable(&self) -> bool {
        matches!(self, Status::Waiting | Status::Suspended | Status::Failed)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Waiting => "waiting",
            Status::Running => "running",
            Status::Suspended => "suspended",
            Status::Failed => "failed",
            Status::Succeeded => "succeeded",
            Status::Canceled => "canceled",
            Status::Removed => "removed",
            Status::WillSuspend => "willSuspend",
            Status::WillCancel => "willCancel",
            Status::WillRemove => "willRemove",
        };
        f.write_str(s)
    }
}

/// Outcome of checksum validation for a finished file
///
/// Persisted as its ordinal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", from = "u8")]
pub enum Validation {
    /// Not validated yet
    #[default]
    Unknown,
    /// Digest matched
    Correct,
    /// Digest did not match, or the file could not be checked
    Incorrect,
}

impl From<Validation> for u8 {
    fn from(v: Validation) -> Self {
        match v {
            Validation::Unknown => 0,
            Validation::Correct => 1,
            Validation::Incorrect => 2,
        }
    }
}

impl From<u8> for Validation {
    fn from(v: u8) -> Self {
        match v {
            1 => Validation::Correct,
            2 => Validation::Incorrect,
            _ => Validation::Unknown,
        }
    }
}

/// Digest algorithm used for checksum validation
///
/// Persisted as its ordinal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", from = "u8")]
pub enum ChecksumAlgorithm {
    /// MD5
    #[default]
    Md5,
    /// SHA-1
    Sha1,
    /// SHA-256
    Sha256,
    /// SHA-512
    Sha512,
}

impl From<ChecksumAlgorithm> for u8 {
    fn from(a: ChecksumAlgorithm) -> Self {
        match a {
            ChecksumAlgorithm::Md5 => 0,
            ChecksumAlgorithm::Sha1 => 1,
            ChecksumAlgorithm::Sha256 => 2,
            ChecksumAlgorithm::Sha512 => 3,
        }
    }
}

impl From<u8> for ChecksumAlgorithm {
    fn from(v: u8) -> Self {
        match v {
            1 => ChecksumAlgorithm::Sha1,
            2 => ChecksumAlgorithm::Sha256,
            3 => ChecksumAlgorithm::Sha512,
            _ => ChecksumAlgorithm::Md5,
        }
    }
}

/// Byte progress of a transfer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Bytes received so far
    pub completed: u64,
    /// Expected total bytes (0 while unknown)
    pub total: u64,
}

impl Progress {
    /// Create a progress value, clamping `completed` to `total` once the total is known
    pub fn new(completed: u64, total: u64) -> Self {
        let completed = if total > 0 {
            completed.min(total)
        } else {
            completed
        };
        Self { completed, total }
    }

    /// Completed fraction in `0.0..=1.0` (0.0 while the total is unknown)
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    /// Whether every expected byte has arrived
    pub fn is_finished(&self) -> bool {
        self.total > 0 && self.completed >= self.total
    }
}

/// Point-in-time copy of a task's observable state
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Canonical URL (lookup key)
    pub url: String,
    /// URL after transport redirects
    pub current_url: String,
    /// File name within the finished-files directory
    pub file_name: String,
    /// Full path of the finished file
    pub file_path: PathBuf,
    /// Request headers
    pub headers: Option<Headers>,
    /// Current status
    pub status: Status,
    /// Byte progress
    pub progress: Progress,
    /// Bytes per second
    pub speed: u64,
    /// Estimated seconds remaining
    pub time_remaining: u64,
    /// Epoch seconds of the last start (0 if never started)
    pub start_date: f64,
    /// Epoch seconds of the terminal transition (0 if none yet)
    pub end_date: f64,
    /// Last error
    pub error: Option<TaskError>,
    /// Expected digest, if registered
    pub verification_code: Option<String>,
    /// Digest algorithm
    pub verification_type: ChecksumAlgorithm,
    /// Validation outcome
    pub validation: Validation,
    /// Whether a resume token is held
    pub has_resume_token: bool,
}

/// Point-in-time copy of a session's aggregate state
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session identifier
    pub identifier: String,
    /// Derived session status
    pub status: Status,
    /// Aggregate byte progress over all tasks
    pub progress: Progress,
    /// Aggregate bytes per second over running tasks
    pub speed: u64,
    /// Estimated seconds remaining
    pub time_remaining: u64,
    /// Epoch seconds when the session last started running
    pub start_date: f64,
    /// Epoch seconds when the session last completed
    pub end_date: f64,
    /// Number of tasks in the session
    pub task_count: usize,
    /// Number of succeeded tasks
    pub succeeded_count: usize,
}

impl SessionSnapshot {
    pub(crate) fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            status: Status::Waiting,
            progress: Progress::default(),
            speed: 0,
            time_remaining: 0,
            start_date: 0.0,
            end_date: 0.0,
            task_count: 0,
            succeeded_count: 0,
        }
    }
}

/// Events broadcast to subscribers of a session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A task was created or rehydrated
    TaskAdded {
        /// Canonical URL
        url: String,
    },
    /// A task changed status
    TaskStatusChanged {
        /// Canonical URL
        url: String,
        /// New status
        status: Status,
    },
    /// A task received bytes
    TaskProgress {
        /// Canonical URL
        url: String,
        /// Progress after the update
        progress: Progress,
    },
    /// Checksum validation finished for a task
    TaskValidated {
        /// Canonical URL
        url: String,
        /// Outcome
        validation: Validation,
        /// Checksum error, if validation could not run
        error: Option<String>,
    },
    /// A task left the session (canceled or removed)
    TaskRemoved {
        /// Canonical URL
        url: String,
    },
    /// The derived session status changed
    SessionStatusChanged {
        /// New status
        status: Status,
    },
    /// Aggregate progress/speed update
    SessionProgress {
        /// Aggregate progress
        progress: Progress,
        /// Aggregate speed in bytes per second
        speed: u64,
        /// Estimated seconds remaining
        time_remaining: u64,
    },
    /// The transport channel was rebuilt
    TransportRebuilt {
        /// New transport generation
        generation: u64,
    },
}
