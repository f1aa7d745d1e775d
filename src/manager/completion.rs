//! Settling finished transfers into task states

use crate::error::TaskError;
use crate::resume_token::ResumeTokenCodec;
use crate::transport::{TransportError, TransportErrorKind};
use crate::types::{Progress, Status};
use crate::utils::{is_acceptable_status_code, now_timestamp};

use super::ControlReply;
use super::actor::{SessionCore, ack};

/// How a transfer ended
#[derive(Debug)]
pub(super) enum Settlement {
    /// The transport reported completion
    Completed {
        status_code: Option<u16>,
        error: Option<TransportError>,
    },
    /// The transport went away without reporting
    Invalidated,
}

impl SessionCore {
    /// Resolve a task whose transfer has ended
    ///
    /// The transport's outcome gives a base status; a pending intent on the
    /// task then decides the final one.
    pub(super) async fn settle_transfer(&mut self, key: &str, settlement: Settlement) {
        let Some(entry) = self.tasks.get_mut(key) else { return };
        entry.transfer = None;
        let file_stored = std::mem::take(&mut entry.file_stored);
        let storage_error = entry.storage_error.take();
        let completely = entry.remove_completely;
        let task = entry.task.clone();
        self.running.retain(|k| k != key);

        let (base, error, token) = match settlement {
            Settlement::Invalidated => (Status::Failed, Some(TaskError::TransportInvalidated), None),
            Settlement::Completed {
                error: Some(err), ..
            } => {
                let token = match err.resume_token.clone() {
                    Some(token) => self.repair_token(token).await,
                    None => None,
                };
                if let Some(name) = token.as_deref().and_then(ResumeTokenCodec::temp_file_name) {
                    self.cache.store_tmp_file(&name).await.ok();
                }
                let base = match (&err.kind, token.is_some()) {
                    (_, true) if err.background_invalidated => Status::Suspended,
                    (TransportErrorKind::Cancelled, true) => Status::Suspended,
                    _ => Status::Failed,
                };
                tracing::debug!(url = %key, error = %err, resumable = token.is_some(), "transfer ended with error");
                (base, Some(err.to_task_error()), token)
            }
            Settlement::Completed {
                error: None,
                status_code,
            } => match status_code.filter(|code| !is_acceptable_status_code(*code)) {
                Some(code) => {
                    if file_stored {
                        self.cache.remove_file(&task.file_name()).await.ok();
                    }
                    (Status::Failed, Some(TaskError::UnacceptableStatusCode(code)), None)
                }
                None => match storage_error {
                    Some(message) => (Status::Failed, Some(TaskError::Storage(message)), None),
                    None if !file_stored => (
                        Status::Failed,
                        Some(TaskError::Storage("transfer completed without a file".into())),
                        None,
                    ),
                    None => (Status::Succeeded, None, None),
                },
            },
        };

        let status = match task.status() {
            Status::WillCancel => Status::Canceled,
            Status::WillRemove => Status::Removed,
            Status::WillSuspend if base == Status::Succeeded => Status::Succeeded,
            Status::WillSuspend => Status::Suspended,
            _ => base,
        };

        match status {
            Status::Succeeded => self.succeed(key, true, None).await,
            Status::Canceled | Status::Removed => {
                task.update(|s| {
                    s.error = error;
                    s.resume_token = token;
                });
                self.finalize_removal(key, status, completely, None, true).await;
            }
            _ => {
                task.update(|s| {
                    s.error = error;
                    s.resume_token = token;
                });
                self.finalize_stopped(key, status).await;
            }
        }
    }

    /// Token repair is CPU-bound plist work; keep it off the actor
    async fn repair_token(&self, token: Vec<u8>) -> Option<Vec<u8>> {
        let quirks = self
            .transport
            .as_ref()
            .map(|transport| transport.token_quirks())
            .unwrap_or_default();
        let codec = ResumeTokenCodec::new(quirks);
        match tokio::task::spawn_blocking(move || codec.repair(&token)).await {
            Ok(repaired) => {
                if repaired.is_none() {
                    tracing::warn!("resume token could not be repaired, discarding it");
                }
                repaired
            }
            Err(e) => {
                tracing::warn!(error = %e, "resume token repair panicked");
                None
            }
        }
    }

    /// Commit a suspended or failed task
    async fn finalize_stopped(&mut self, key: &str, status: Status) {
        let Some(entry) = self.tasks.get(key) else { return };
        let task = entry.task.clone();
        task.update(|s| {
            s.speed = 0;
            s.time_remaining = 0;
            if status == Status::Failed && s.end_date == 0.0 {
                s.end_date = now_timestamp();
            }
        });
        self.set_task_status(&task, status);
        match task.error() {
            Some(error) if status == Status::Failed => {
                tracing::warn!(url = %key, error = %error, "task failed");
            }
            _ => tracing::info!(url = %key, status = %status, "task stopped"),
        }
        self.persist().await;

        task.fire_completion(false, self.main.as_ref());
        if let Some(entry) = self.tasks.get_mut(key) {
            entry.settle_acks();
        }
        self.publish_progress();
        self.determine_status(true).await;
    }

    /// Commit a succeeded task
    ///
    /// Also used when a start finds the file already stored; then the end
    /// date of an earlier success is kept.
    pub(super) async fn succeed(&mut self, key: &str, from_running: bool, reply: Option<ControlReply>) {
        let Some(entry) = self.tasks.get_mut(key) else {
            ack(reply, Ok(()));
            return;
        };
        entry.token_stale = false;
        let task = entry.task.clone();
        let file_name = task.file_name();
        let stored_len = self.cache.completed_length(&file_name, 0).await;

        let token = task.update(|s| {
            let total = match (s.progress.total, stored_len) {
                (0, Some(len)) => len,
                (0, None) => s.progress.completed,
                (total, _) => total,
            };
            s.progress = Progress::new(total, total);
            s.speed = 0;
            s.time_remaining = 0;
            s.error = None;
            if s.end_date == 0.0 {
                s.end_date = now_timestamp();
            }
            s.resume_token.take()
        });
        if let Some(name) = token.as_deref().and_then(ResumeTokenCodec::temp_file_name) {
            self.cache.remove_tmp_file(&name).await.ok();
        }
        self.set_task_status(&task, Status::Succeeded);
        if !self.succeeded.iter().any(|k| k == key) {
            self.succeeded.push(key.to_string());
        }
        tracing::info!(url = %key, bytes = task.progress().total, "task succeeded");
        self.persist().await;

        task.fire_progress(self.main.as_ref());
        task.fire_completion(true, self.main.as_ref());
        if let Some(entry) = self.tasks.get_mut(key) {
            entry.settle_acks();
        }
        ack(reply, Ok(()));

        self.request_validation(key);
        self.publish_progress();
        self.determine_status(from_running).await;
    }
}
