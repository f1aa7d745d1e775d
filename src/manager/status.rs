//! Derived session status, aggregate progress and speed sampling

use std::time::Instant;

use futures::future::BoxFuture;

use crate::executer::Executer;
use crate::task::{DownloadTask, time_remaining};
use crate::types::{Event, Progress, SessionSnapshot, Status};
use crate::utils::now_timestamp;

use super::actor::SessionCore;

impl SessionCore {
    pub(super) fn session_status(&self) -> Status {
        self.shared.snapshot.lock().status
    }

    /// Set a task's status and announce it
    pub(super) fn set_task_status(&self, task: &DownloadTask, status: Status) {
        let previous = task.update(|s| std::mem::replace(&mut s.status, status));
        if previous != status {
            tracing::debug!(url = %task.url(), from = %previous, to = %status, "task status changed");
            self.emit(Event::TaskStatusChanged {
                url: task.url().to_string(),
                status,
            });
        }
    }

    /// Set the session status without running any settle logic
    pub(super) fn set_session_status(&self, status: Status) -> Status {
        let previous = {
            let mut snapshot = self.shared.snapshot.lock();
            let previous = std::mem::replace(&mut snapshot.status, status);
            if status == Status::Running && previous != Status::Running {
                snapshot.start_date = now_timestamp();
                snapshot.end_date = 0.0;
            }
            previous
        };
        if previous != status {
            tracing::debug!(identifier = %self.identifier, from = %previous, to = %status, "session status changed");
            self.emit(Event::SessionStatusChanged { status });
        }
        previous
    }

    /// A transfer has started: the session runs unless an intent is settling
    pub(super) fn mark_session_running(&self) {
        let current = self.session_status();
        if !current.is_pending_intent() {
            self.set_session_status(Status::Running);
        }
    }

    /// Re-derive the session status after a task transition
    ///
    /// With `from_running` the freed slot is handed to the next waiting task
    /// first. Boxed because starting a task can settle it synchronously, which
    /// comes back here.
    pub(super) fn determine_status(&mut self, from_running: bool) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let current = self.session_status();
            if from_running && !current.is_pending_intent() && !self.should_rebuild {
                self.start_next_task().await;
            }

            let current = self.session_status();
            if current.is_pending_intent() {
                if self.intent_settled(current) {
                    let target = match current {
                        Status::WillSuspend => Status::Suspended,
                        Status::WillCancel => Status::Canceled,
                        _ => Status::Removed,
                    };
                    self.enter_session_status(target).await;
                }
                return;
            }

            let derived = self.derive_status();
            // An emptied session keeps reporting how it was emptied
            let emptied = matches!(current, Status::Canceled | Status::Removed) && self.tasks.is_empty();
            if derived != current && !emptied {
                self.enter_session_status(derived).await;
            }
        })
    }

    /// Start waiting tasks in list order while slots are free
    pub(super) async fn start_next_task(&mut self) {
        while self.running.len() < self.config.max_concurrent_tasks_limit {
            let next = self
                .tasks
                .iter()
                .find(|(_, entry)| entry.status() == Status::Waiting)
                .map(|(key, _)| key.clone());
            let Some(key) = next else { break };
            self.start_task(&key, None).await;
            if self.tasks.get(&key).is_some_and(|e| e.status() == Status::Waiting) {
                break;
            }
        }
    }

    fn intent_settled(&self, intent: Status) -> bool {
        match intent {
            Status::WillSuspend => !self.tasks.values().any(|entry| {
                let status = entry.status();
                status.is_in_flight() || status == Status::Waiting
            }),
            // Every task, succeeded ones included, leaves the list first
            _ => self.tasks.is_empty(),
        }
    }

    /// Session status implied by the task statuses
    pub(super) fn derive_status(&self) -> Status {
        let statuses: Vec<Status> = self.tasks.values().map(|e| e.status()).collect();
        let all = |allowed: &[Status]| statuses.iter().all(|s| allowed.contains(s));

        if statuses.is_empty() {
            Status::Waiting
        } else if statuses.iter().any(Status::is_in_flight) {
            Status::Running
        } else if all(&[Status::Succeeded]) {
            Status::Succeeded
        } else if all(&[Status::Succeeded, Status::Failed]) {
            Status::Failed
        } else if all(&[Status::Succeeded, Status::Failed, Status::Suspended]) {
            Status::Suspended
        } else {
            Status::Waiting
        }
    }

    async fn enter_session_status(&mut self, status: Status) {
        self.set_session_status(status);
        match status {
            Status::Succeeded
            | Status::Failed
            | Status::Suspended
            | Status::Canceled
            | Status::Removed => {
                let snapshot = {
                    let mut snapshot = self.shared.snapshot.lock();
                    snapshot.end_date = now_timestamp();
                    snapshot.speed = 0;
                    snapshot.time_remaining = 0;
                    snapshot.clone()
                };
                self.teardown_transport();
                for reply in self.session_acks.drain(..) {
                    reply.send(Ok(())).ok();
                }

                if self.should_rebuild {
                    self.rebuild_and_restart().await;
                    return;
                }

                tracing::info!(
                    identifier = %self.identifier,
                    status = %status,
                    tasks = snapshot.task_count,
                    succeeded = snapshot.succeeded_count,
                    "session settled"
                );
                self.fire_session_completion(status == Status::Succeeded, &snapshot);
            }
            Status::Waiting if self.should_rebuild => self.rebuild_and_restart().await,
            Status::Waiting if self.tasks.is_empty() => self.teardown_transport(),
            _ => {}
        }
    }

    fn fire_session_completion(&self, succeeded: bool, snapshot: &SessionSnapshot) {
        let executer: Option<Executer<SessionSnapshot>> = {
            let callbacks = self.shared.callbacks.lock();
            match (&callbacks.completion, succeeded) {
                (Some(completion), _) => Some(completion.clone()),
                (None, true) => callbacks.success.clone(),
                (None, false) => callbacks.failure.clone(),
            }
        };
        if let Some(executer) = executer {
            executer.execute(snapshot, self.main.as_ref());
        }
    }

    /// Recompute aggregate progress and notify session observers
    pub(super) fn publish_progress(&self) {
        let mut completed = 0u64;
        let mut total = 0u64;
        let mut speed = 0u64;
        for entry in self.tasks.values() {
            let (progress, task_speed, status) =
                entry.task.read(|s| (s.progress, s.speed, s.status));
            completed = completed.saturating_add(progress.completed);
            total = total.saturating_add(progress.total);
            if status == Status::Running {
                speed = speed.saturating_add(task_speed);
            }
        }
        let progress = Progress::new(completed, total);
        let remaining = time_remaining(total.saturating_sub(completed), speed);

        let snapshot = {
            let mut snapshot = self.shared.snapshot.lock();
            snapshot.progress = progress;
            snapshot.speed = speed;
            snapshot.time_remaining = remaining;
            snapshot.task_count = self.tasks.len();
            snapshot.succeeded_count = self.succeeded.len();
            snapshot.clone()
        };

        let executer = self.shared.callbacks.lock().progress.clone();
        if let Some(executer) = executer {
            executer.execute(&snapshot, self.main.as_ref());
        }
        self.emit(Event::SessionProgress {
            progress,
            speed,
            time_remaining: remaining,
        });
    }

    /// Once-a-second speed and remaining-time update for running tasks
    pub(super) fn tick_speed(&mut self) {
        let now = Instant::now();
        for key in &self.running {
            let Some(entry) = self.tasks.get_mut(key) else { continue };
            let completed = entry.task.progress().completed;
            if let Some(speed) = entry.sampler.sample(completed, now) {
                entry.task.update(|s| {
                    s.speed = speed;
                    s.time_remaining =
                        time_remaining(s.progress.total.saturating_sub(s.progress.completed), speed);
                });
            }
        }
        self.publish_progress();
    }
}
