//! Single-task start, suspend, cancel and remove

use std::sync::Arc;

use crate::error::Error;
use crate::resume_token::ResumeTokenCodec;
use crate::task::ActiveTransfer;
use crate::transport::TransportRequest;
use crate::types::{Event, Progress, Status, Validation};
use crate::utils::now_timestamp;

use super::actor::{SessionCore, ack};
use super::completion::Settlement;
use super::{ControlAction, ControlReply};

/// How a task leaves the session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Removal {
    Cancel,
    Remove { completely: bool },
}

impl Removal {
    pub(super) fn intent(self) -> Status {
        match self {
            Removal::Cancel => Status::WillCancel,
            Removal::Remove { .. } => Status::WillRemove,
        }
    }

    pub(super) fn terminal(self) -> Status {
        match self {
            Removal::Cancel => Status::Canceled,
            Removal::Remove { .. } => Status::Removed,
        }
    }

    fn completely(self) -> bool {
        matches!(self, Removal::Remove { completely: true })
    }
}

impl SessionCore {
    pub(super) async fn control(&mut self, url: String, action: ControlAction, reply: ControlReply) {
        let Some(key) = self.resolve_key(&url) else {
            tracing::warn!(url = %url, ?action, "control request for unknown task");
            reply.send(Err(Error::TaskNotFound(url))).ok();
            return;
        };
        let reply = Some(reply);
        match action {
            ControlAction::Start => self.start_task(&key, reply).await,
            ControlAction::Suspend => self.suspend_task(&key, reply).await,
            ControlAction::Cancel => self.stop_task(&key, Removal::Cancel, reply).await,
            ControlAction::Remove { completely } => {
                self.stop_task(&key, Removal::Remove { completely }, reply).await;
            }
        }
    }

    /// Start a task, subject to the concurrency limit
    ///
    /// A finished file already in the store completes the task without
    /// touching the transport.
    pub(super) async fn start_task(&mut self, key: &str, reply: Option<ControlReply>) {
        let Some(entry) = self.tasks.get(key) else {
            ack(reply, Err(Error::TaskNotFound(key.to_string())));
            return;
        };
        let task = entry.task.clone();
        let status = task.status();
        if status.is_in_flight() {
            ack(reply, Ok(()));
            return;
        }

        let (file_name, total) = task.read(|s| (s.file_name.clone(), s.progress.total));
        if let Some(len) = self.cache.completed_length(&file_name, total).await {
            tracing::debug!(url = %key, bytes = len, "file already present, skipping transfer");
            task.update(|s| s.progress = Progress::new(len, len));
            self.succeed(key, false, reply).await;
            return;
        }

        if self.running.len() >= self.config.max_concurrent_tasks_limit {
            if status != Status::Waiting {
                self.leave_succeeded(key);
                self.set_task_status(&task, Status::Waiting);
                self.persist().await;
            }
            tracing::debug!(url = %key, running = self.running.len(), "concurrency limit reached, task waits");
            ack(reply, Ok(()));
            return;
        }

        self.launch(key).await;
        ack(reply, Ok(()));
    }

    /// Hand a task to the transport, resuming from its token when possible
    async fn launch(&mut self, key: &str) {
        let transport = self.ensure_transport();
        let Some(entry) = self.tasks.get(key) else { return };
        let task = entry.task.clone();
        let token_stale = entry.token_stale;

        let (headers, token) = task.read(|s| (s.headers.clone(), s.resume_token.clone()));
        let request = TransportRequest {
            url: key.to_string(),
            headers: headers.unwrap_or_default(),
            timeout: self.config.timeout_interval_for_request,
        };

        let temp_name = token.as_deref().and_then(ResumeTokenCodec::temp_file_name);
        let resumable = match (&token, &temp_name) {
            (Some(_), Some(name)) if !token_stale => self.cache.retrieve_tmp_file(name).await,
            _ => false,
        };

        let id = match token {
            Some(token) if resumable => {
                tracing::debug!(url = %key, "resuming transfer from token");
                transport.resume(request, token)
            }
            _ => {
                if let Some(name) = &temp_name {
                    self.cache.remove_tmp_file(name).await.ok();
                }
                task.update(|s| {
                    s.resume_token = None;
                    s.progress = Progress::default();
                });
                tracing::debug!(url = %key, "beginning fresh transfer");
                transport.begin(request)
            }
        };

        let generation = self.generation;
        if let Some(entry) = self.tasks.get_mut(key) {
            entry.transfer = Some(ActiveTransfer { generation, id });
            entry.token_stale = false;
            entry.file_stored = false;
            entry.storage_error = None;
            entry.restart_sampler();
        }

        self.leave_succeeded(key);
        task.update(|s| {
            s.start_date = now_timestamp();
            s.end_date = 0.0;
            s.error = None;
            s.speed = 0;
            s.time_remaining = 0;
        });
        self.set_task_status(&task, Status::Running);
        if !self.running.iter().any(|k| k == key) {
            self.running.push(key.to_string());
        }
        tracing::info!(url = %key, transfer = %id, generation, "transfer started");

        self.mark_session_running();
        self.persist().await;
    }

    /// Drop a task from the succeeded list when it is about to be downloaded again
    fn leave_succeeded(&mut self, key: &str) {
        let Some(position) = self.succeeded.iter().position(|k| k == key) else {
            return;
        };
        self.succeeded.remove(position);
        if let Some(entry) = self.tasks.get(key) {
            entry.task.update(|s| {
                s.validation = Validation::Unknown;
                s.validated_with = None;
                s.validation_error = None;
            });
        }
    }

    pub(super) async fn suspend_task(&mut self, key: &str, reply: Option<ControlReply>) {
        let Some(entry) = self.tasks.get_mut(key) else {
            ack(reply, Err(Error::TaskNotFound(key.to_string())));
            return;
        };
        let task = entry.task.clone();
        match task.status() {
            Status::Running => {
                let transfer = entry.transfer;
                entry.pending_acks.extend(reply);
                self.set_task_status(&task, Status::WillSuspend);
                self.cancel_transfer(key, transfer, true).await;
                self.persist().await;
            }
            Status::Waiting => {
                self.set_task_status(&task, Status::Suspended);
                self.persist().await;
                task.fire_completion(false, self.main.as_ref());
                ack(reply, Ok(()));
                self.determine_status(false).await;
            }
            _ => ack(reply, Ok(())),
        }
    }

    /// Cancel or remove a task
    ///
    /// A running transfer is cancelled first and the task settles when the
    /// transport reports back; anything else leaves the session right away.
    pub(super) async fn stop_task(&mut self, key: &str, removal: Removal, reply: Option<ControlReply>) {
        let Some(entry) = self.tasks.get_mut(key) else {
            ack(reply, Err(Error::TaskNotFound(key.to_string())));
            return;
        };
        let task = entry.task.clone();
        match task.status() {
            Status::Running => {
                let transfer = entry.transfer;
                entry.remove_completely = removal.completely();
                entry.pending_acks.extend(reply);
                self.set_task_status(&task, removal.intent());
                self.cancel_transfer(key, transfer, false).await;
                self.persist().await;
            }
            Status::WillSuspend | Status::WillCancel => {
                // Already cancelling; only upgrade the intent
                entry.pending_acks.extend(reply);
                if let Removal::Remove { completely } = removal {
                    entry.remove_completely = completely;
                }
                let intent = match (task.status(), removal) {
                    (Status::WillCancel, Removal::Cancel) => Status::WillCancel,
                    _ => removal.intent(),
                };
                self.set_task_status(&task, intent);
                self.persist().await;
            }
            Status::WillRemove => {
                entry.pending_acks.extend(reply);
            }
            _ => {
                self.finalize_removal(key, removal.terminal(), removal.completely(), reply, false)
                    .await;
            }
        }
    }

    /// Ask the transport to stop a transfer
    ///
    /// A transfer on a torn-down transport never reports back, so it is
    /// settled on the spot.
    async fn cancel_transfer(
        &mut self,
        key: &str,
        transfer: Option<ActiveTransfer>,
        produce_token: bool,
    ) {
        let live = match (transfer, &self.transport) {
            (Some(transfer), Some(transport)) if transfer.generation == self.generation => {
                Some((transfer, Arc::clone(transport)))
            }
            _ => None,
        };
        match live {
            Some((transfer, transport)) => {
                tracing::debug!(url = %key, transfer = %transfer.id, produce_token, "cancelling transfer");
                transport.cancel(transfer.id, produce_token);
            }
            None => {
                tracing::warn!(url = %key, "no live transfer to cancel, settling locally");
                self.settle_transfer(key, Settlement::Invalidated).await;
            }
        }
    }

    /// Take a task out of the session as canceled or removed
    pub(super) async fn finalize_removal(
        &mut self,
        key: &str,
        status: Status,
        completely: bool,
        reply: Option<ControlReply>,
        from_running: bool,
    ) {
        let Some(mut entry) = self.tasks.shift_remove(key) else {
            ack(reply, Err(Error::TaskNotFound(key.to_string())));
            return;
        };
        let task = entry.task.clone();
        let (token, file_name, current_url) =
            task.read(|s| (s.resume_token.clone(), s.file_name.clone(), s.current_url.clone()));

        if let Some(name) = token.as_deref().and_then(ResumeTokenCodec::temp_file_name) {
            self.cache.remove_tmp_file(&name).await.ok();
        }
        if status == Status::Removed && completely {
            self.cache.remove_file(&file_name).await.ok();
        }

        task.update(|s| {
            s.resume_token = None;
            s.speed = 0;
            s.time_remaining = 0;
            if s.end_date == 0.0 {
                s.end_date = now_timestamp();
            }
        });
        self.set_task_status(&task, status);

        self.url_mapper.remove(key);
        self.url_mapper.remove(&current_url);
        self.running.retain(|k| k != key);
        self.succeeded.retain(|k| k != key);
        self.emit(Event::TaskRemoved {
            url: key.to_string(),
        });
        tracing::info!(url = %key, status = %status, completely, "task left the session");
        self.persist().await;

        task.fire_completion(false, self.main.as_ref());
        entry.settle_acks();
        ack(reply, Ok(()));
        self.publish_progress();
        self.determine_status(from_running).await;
    }
}
