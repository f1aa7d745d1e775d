//! Persistence store for download sessions
//!
//! Each session identifier owns one directory tree:
//!
//! ```text
//! {root}/{identifier}/Downloads/{identifier}_Tasks.json   task descriptors
//! {root}/{identifier}/Downloads/Tmp/                      backed-up in-flight bytes
//! {root}/{identifier}/Downloads/File/                     finished files
//! ```
//!
//! ## Submodules
//!
//! Methods on [`Cache`] are organized by domain:
//! - [`descriptor`] - The persisted per-task record
//! - `tasks` - Descriptor list load/store and restore normalisation
//! - `files` - Moving, copying and removing temporary and finished files
//!
//! The cache is owned by the session actor, so every operation is already
//! serialized with respect to the rest of the session. Failures are logged
//! here with the offending path and returned so the caller can decide whether
//! they matter; none of them is fatal.

use std::path::{Path, PathBuf};

use crate::config::CacheConfig;
use crate::error::CacheError;

pub mod descriptor;
mod files;
mod tasks;

pub use descriptor::TaskDescriptor;

/// Persistence store for one session identifier
#[derive(Clone, Debug)]
pub struct Cache {
    identifier: String,
    download_path: PathBuf,
    download_tmp_path: PathBuf,
    download_file_path: PathBuf,
    system_tmp_path: PathBuf,
}

impl Cache {
    /// Compute the store locations for `identifier`
    ///
    /// Nothing is created on disk until [`Cache::create_directory`] runs.
    pub fn new(identifier: &str, config: &CacheConfig) -> Self {
        let download_path = config.root_dir.join(identifier).join("Downloads");
        Self {
            identifier: identifier.to_string(),
            download_tmp_path: download_path.join("Tmp"),
            download_file_path: download_path.join("File"),
            download_path,
            system_tmp_path: config.system_tmp_dir.clone(),
        }
    }

    /// Session identifier this store belongs to
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Root of this session's store
    pub fn download_path(&self) -> &Path {
        &self.download_path
    }

    /// Directory holding backed-up temporary files
    pub fn download_tmp_path(&self) -> &Path {
        &self.download_tmp_path
    }

    /// Directory holding finished files
    pub fn download_file_path(&self) -> &Path {
        &self.download_file_path
    }

    /// OS-wide temporary area the transport writes resumable bytes into
    pub fn system_tmp_path(&self) -> &Path {
        &self.system_tmp_path
    }

    /// Path of the descriptor file
    pub fn tasks_path(&self) -> PathBuf {
        self.download_path
            .join(format!("{}_Tasks.json", self.identifier))
    }

    /// Full path a finished file named `file_name` is stored at
    pub fn file_path(&self, file_name: &str) -> PathBuf {
        self.download_file_path.join(file_name)
    }

    /// Whether a finished file named `file_name` exists
    pub async fn file_exists(&self, file_name: &str) -> bool {
        tokio::fs::try_exists(self.file_path(file_name))
            .await
            .unwrap_or(false)
    }

    /// Length of `file_name` if it is already fully downloaded
    ///
    /// With `expected_total == 0` any existing file counts; otherwise its
    /// length must equal the expected total.
    pub async fn completed_length(&self, file_name: &str, expected_total: u64) -> Option<u64> {
        let metadata = tokio::fs::metadata(self.file_path(file_name)).await.ok()?;
        if !metadata.is_file() {
            return None;
        }
        let len = metadata.len();
        (expected_total == 0 || len == expected_total).then_some(len)
    }

    /// Ensure the root, temporary and finished-file directories exist
    ///
    /// Idempotent. Every directory is attempted even if an earlier one fails;
    /// the first failure is returned.
    pub async fn create_directory(&self) -> Result<(), CacheError> {
        let mut first_error = None;
        for path in [
            &self.download_path,
            &self.download_tmp_path,
            &self.download_file_path,
        ] {
            if let Err(source) = tokio::fs::create_dir_all(path).await {
                let err = CacheError::CreateDirectory {
                    path: path.clone(),
                    source,
                };
                tracing::warn!(identifier = %self.identifier, error = %err, "cache directory unavailable");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
