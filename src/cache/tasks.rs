//! Descriptor list persistence and restore normalisation

use crate::error::CacheError;
use crate::resume_token::ResumeTokenCodec;
use crate::types::Status;

use super::{Cache, TaskDescriptor};

impl Cache {
    /// Load the persisted task list for a session start-up
    ///
    /// A missing file means no prior tasks. A file that cannot be read or
    /// decoded is logged and also treated as empty. Tasks that were waiting or
    /// running come back suspended; temporary files of tasks whose cancel or
    /// remove was still pending are deleted.
    pub async fn retrieve_all_tasks(&self) -> Vec<TaskDescriptor> {
        let descriptors = match self.load_descriptors().await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                tracing::warn!(
                    identifier = %self.identifier,
                    error = %e,
                    "discarding unreadable task list"
                );
                return Vec::new();
            }
        };

        let (kept, dropped) = normalize_restored(descriptors);
        for descriptor in &dropped {
            tracing::debug!(
                url = %descriptor.url,
                status = %descriptor.status,
                "completing interrupted removal"
            );
            if let Some(name) = descriptor
                .resume_token
                .as_deref()
                .and_then(ResumeTokenCodec::temp_file_name)
            {
                self.remove_tmp_file(&name).await.ok();
            }
        }

        tracing::info!(
            identifier = %self.identifier,
            restored = kept.len(),
            dropped = dropped.len(),
            "task list restored"
        );
        kept
    }

    /// Write the whole descriptor list
    ///
    /// The list is written to a sibling temporary file first and renamed into
    /// place, so a crash mid-write leaves the previous list intact.
    pub async fn store_tasks(&self, descriptors: &[TaskDescriptor]) -> Result<(), CacheError> {
        let result = self.write_descriptors(descriptors).await;
        if let Err(e) = &result {
            tracing::warn!(identifier = %self.identifier, error = %e, "failed to persist task list");
        }
        result
    }

    async fn load_descriptors(&self) -> Result<Vec<TaskDescriptor>, CacheError> {
        let path = self.tasks_path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(CacheError::Read { path, source }),
        };
        serde_json::from_slice(&bytes).map_err(|source| CacheError::Decode { path, source })
    }

    async fn write_descriptors(&self, descriptors: &[TaskDescriptor]) -> Result<(), CacheError> {
        let json = serde_json::to_vec_pretty(descriptors).map_err(CacheError::Encode)?;

        let path = self.tasks_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CacheError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, &json)
            .await
            .map_err(|source| CacheError::Write {
                path: staging.clone(),
                source,
            })?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|source| CacheError::Move {
                from: staging,
                to: path,
                source,
            })
    }
}

/// Normalise a restored task list
///
/// No transport is live across a restart, so `waiting`, `running` and
/// `willSuspend` tasks come back `suspended`. Tasks whose cancel or remove was
/// still pending are returned separately so their removal can be completed.
pub(crate) fn normalize_restored(
    descriptors: Vec<TaskDescriptor>,
) -> (Vec<TaskDescriptor>, Vec<TaskDescriptor>) {
    let mut kept = Vec::with_capacity(descriptors.len());
    let mut dropped = Vec::new();
    for mut descriptor in descriptors {
        match descriptor.status {
            Status::WillCancel | Status::WillRemove | Status::Canceled | Status::Removed => {
                dropped.push(descriptor);
            }
            Status::Waiting | Status::Running | Status::WillSuspend => {
                descriptor.status = Status::Suspended;
                kept.push(descriptor);
            }
            Status::Suspended | Status::Failed | Status::Succeeded => kept.push(descriptor),
        }
    }
    (kept, dropped)
}
