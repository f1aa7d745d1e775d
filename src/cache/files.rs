//! Temporary and finished file management

use std::path::{Path, PathBuf};

use crate::error::CacheError;

use super::Cache;

impl Cache {
    /// Move a finished transfer from `location` into the finished-files directory
    ///
    /// Any previous file with the same name is replaced. Falls back to
    /// copy-then-delete when a rename is not possible (e.g. across devices).
    pub async fn store_file(&self, location: &Path, file_name: &str) -> Result<PathBuf, CacheError> {
        let destination = self.file_path(file_name);
        let result = self.move_into_place(location, &destination).await;
        match &result {
            Ok(()) => tracing::debug!(path = %destination.display(), "stored finished file"),
            Err(e) => tracing::warn!(error = %e, "failed to store finished file"),
        }
        result.map(|()| destination)
    }

    /// Back up the transport's temporary file `tmp_file_name` into the store
    ///
    /// A transport that never wrote the file leaves nothing to back up, which
    /// is not an error.
    pub async fn store_tmp_file(&self, tmp_file_name: &str) -> Result<(), CacheError> {
        let source = self.system_tmp_path.join(tmp_file_name);
        if !exists(&source).await {
            tracing::debug!(path = %source.display(), "no temporary file to back up");
            return Ok(());
        }
        let destination = self.download_tmp_path.join(tmp_file_name);
        let result = self.copy_replacing(&source, &destination).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "failed to back up temporary file");
        }
        result
    }

    /// Make sure the transport can find `tmp_file_name` before resuming
    ///
    /// Returns `true` if the file is in the OS temporary area (restoring it
    /// from the store if needed).
    pub async fn retrieve_tmp_file(&self, tmp_file_name: &str) -> bool {
        if tmp_file_name.is_empty() {
            return false;
        }
        let destination = self.system_tmp_path.join(tmp_file_name);
        if exists(&destination).await {
            return true;
        }
        let backup = self.download_tmp_path.join(tmp_file_name);
        if !exists(&backup).await {
            return false;
        }
        match self.copy_replacing(&backup, &destination).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to restore temporary file");
                false
            }
        }
    }

    /// Delete `tmp_file_name` from both the store and the OS temporary area
    pub async fn remove_tmp_file(&self, tmp_file_name: &str) -> Result<(), CacheError> {
        if tmp_file_name.is_empty() {
            return Ok(());
        }
        let backup = remove_if_exists(&self.download_tmp_path.join(tmp_file_name)).await;
        let system = remove_if_exists(&self.system_tmp_path.join(tmp_file_name)).await;
        let result = backup.and(system);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "failed to remove temporary file");
        }
        result
    }

    /// Delete the finished file `file_name`
    pub async fn remove_file(&self, file_name: &str) -> Result<(), CacheError> {
        let result = remove_if_exists(&self.file_path(file_name)).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "failed to remove finished file");
        }
        result
    }

    /// Delete everything stored for this identifier and recreate the layout
    pub async fn clear_disk_cache(&self) -> Result<(), CacheError> {
        match tokio::fs::remove_dir_all(&self.download_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                let err = CacheError::Remove {
                    path: self.download_path.clone(),
                    source,
                };
                tracing::warn!(error = %err, "failed to clear disk cache");
                return Err(err);
            }
        }
        tracing::info!(identifier = %self.identifier, "disk cache cleared");
        self.create_directory().await
    }

    async fn move_into_place(&self, from: &Path, to: &Path) -> Result<(), CacheError> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CacheError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        remove_if_exists(to).await?;

        if tokio::fs::rename(from, to).await.is_ok() {
            return Ok(());
        }
        tokio::fs::copy(from, to)
            .await
            .map_err(|source| CacheError::Move {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                source,
            })?;
        remove_if_exists(from).await
    }

    async fn copy_replacing(&self, from: &Path, to: &Path) -> Result<(), CacheError> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CacheError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        remove_if_exists(to).await?;
        tokio::fs::copy(from, to)
            .await
            .map(|_| ())
            .map_err(|source| CacheError::Copy {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                source,
            })
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn remove_if_exists(path: &Path) -> Result<(), CacheError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CacheError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}
