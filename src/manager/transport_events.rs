//! Routing of transport callbacks to tasks

use std::path::PathBuf;

use crate::task::ActiveTransfer;
use crate::transport::{TransferInfo, TransportEvent};
use crate::types::{Event, Progress, Status};

use super::actor::SessionCore;
use super::completion::Settlement;

impl SessionCore {
    pub(super) async fn transport_event(&mut self, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Invalidated { reason } => self.transport_invalidated(generation, reason).await,
            TransportEvent::Progress {
                info,
                total_written,
                total_expected,
            } => {
                if let Some(key) = self.route(generation, &info) {
                    self.transfer_progress(&key, total_written, total_expected);
                }
            }
            TransportEvent::Finished { info, location } => {
                if let Some(key) = self.route(generation, &info) {
                    self.transfer_finished(&key, location).await;
                }
            }
            TransportEvent::Completed {
                info,
                status_code,
                error,
            } => {
                if let Some(key) = self.route(generation, &info) {
                    self.settle_transfer(&key, Settlement::Completed { status_code, error })
                        .await;
                }
            }
        }
    }

    /// Find the task a callback belongs to
    ///
    /// Callbacks from an older transport, or for a transfer the task no longer
    /// holds, are dropped. Redirects update the task's current URL.
    fn route(&mut self, generation: u64, info: &TransferInfo) -> Option<String> {
        let expected = Some(ActiveTransfer {
            generation,
            id: info.id,
        });
        let key = [&info.current_url, &info.original_url]
            .into_iter()
            .filter_map(|url| self.url_mapper.get(url))
            .find(|key| self.tasks.get(*key).is_some_and(|e| e.transfer == expected))
            .cloned()
            .or_else(|| {
                self.tasks
                    .iter()
                    .find(|(_, entry)| entry.transfer == expected)
                    .map(|(key, _)| key.clone())
            });
        let Some(key) = key else {
            tracing::debug!(
                generation,
                transfer = %info.id,
                url = %info.original_url,
                "ignoring callback for an unknown or superseded transfer"
            );
            return None;
        };

        let task = self.tasks.get(&key)?.task.clone();
        let previous = task.current_url();
        if previous != info.current_url {
            tracing::debug!(url = %key, current_url = %info.current_url, "transfer redirected");
            task.update(|s| s.current_url = info.current_url.clone());
            if previous != key {
                self.url_mapper.remove(&previous);
            }
            self.url_mapper.insert(info.current_url.clone(), key.clone());
        }
        Some(key)
    }

    fn transfer_progress(&mut self, key: &str, total_written: u64, total_expected: Option<u64>) {
        let Some(entry) = self.tasks.get(key) else { return };
        let task = entry.task.clone();
        if !task.status().is_in_flight() {
            return;
        }
        let total = total_expected.unwrap_or(0);
        // A late callback never moves progress backwards within a run
        let progress = task.update(|s| {
            let completed = if total == s.progress.total {
                total_written.max(s.progress.completed)
            } else {
                total_written
            };
            s.progress = Progress::new(completed, total);
            s.progress
        });
        task.fire_progress(self.main.as_ref());
        self.emit(Event::TaskProgress {
            url: key.to_string(),
            progress,
        });
        self.publish_progress();
    }

    async fn transfer_finished(&mut self, key: &str, location: PathBuf) {
        let Some(entry) = self.tasks.get(key) else { return };
        let file_name = entry.task.file_name();
        let result = self.cache.store_file(&location, &file_name).await;
        let Some(entry) = self.tasks.get_mut(key) else { return };
        match result {
            Ok(_) => entry.file_stored = true,
            Err(e) => entry.storage_error = Some(e.to_string()),
        }
    }

    /// The transport died on its own: fail its transfers, then reconnect and
    /// restart the ones that were running
    async fn transport_invalidated(&mut self, generation: u64, reason: Option<String>) {
        if generation != self.generation || self.transport.is_none() {
            tracing::debug!(generation, "ignoring invalidation of a retired transport");
            return;
        }
        tracing::warn!(
            identifier = %self.identifier,
            generation,
            reason = reason.as_deref().unwrap_or("unknown"),
            "transport invalidated unexpectedly"
        );
        self.transport = None;
        self.generation += 1;

        let interrupted: Vec<(String, Status)> = self
            .tasks
            .iter()
            .filter(|(_, entry)| entry.transfer.is_some_and(|t| t.generation == generation))
            .map(|(key, entry)| (key.clone(), entry.status()))
            .collect();
        if interrupted.is_empty() {
            return;
        }

        self.restart_set = interrupted
            .iter()
            .filter(|(_, status)| *status == Status::Running)
            .map(|(key, _)| key.clone())
            .collect();
        self.should_rebuild = !self.restart_set.is_empty();
        for (key, _) in interrupted {
            self.settle_transfer(&key, Settlement::Invalidated).await;
        }
    }
}
