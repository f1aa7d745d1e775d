//! Session actor: owned state, start-up restore and the command loop

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::mpsc::{UnboundedReceiver, WeakUnboundedSender};
use tokio::time::MissedTickBehavior;

use crate::cache::Cache;
use crate::checksum::FileChecksum;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::executer::MainExecutor;
use crate::task::{DownloadTask, ManagerLink, TaskEntry};
use crate::transport::{Transport, TransportFactory};
use crate::types::{Event, Status};

use super::{Command, ControlReply, SessionShared};

/// Interval of the speed/remaining-time ticker
const SPEED_TICK: Duration = Duration::from_secs(1);

/// State owned by the session actor
///
/// Only the actor task touches this struct, so multi-step invariants (task
/// list vs. URL maps, running count, session status) need no locking.
pub(crate) struct SessionCore {
    pub(super) identifier: String,
    pub(super) config: SessionConfig,
    pub(super) cache: Cache,
    pub(super) factory: Arc<dyn TransportFactory>,
    pub(super) checksum: Arc<dyn FileChecksum>,
    pub(super) main: Arc<dyn MainExecutor>,
    pub(super) shared: Arc<SessionShared>,
    pub(super) tx: WeakUnboundedSender<Command>,
    /// Live transport channel; connected lazily
    pub(super) transport: Option<Arc<dyn Transport>>,
    /// Bumped whenever the transport is discarded
    pub(super) generation: u64,
    /// Canonical URL -> task, in caller-visible order
    pub(super) tasks: IndexMap<String, TaskEntry>,
    /// Current URL -> canonical URL
    pub(super) url_mapper: HashMap<String, String>,
    /// Canonical URLs of tasks holding a transfer
    pub(super) running: Vec<String>,
    /// Canonical URLs of succeeded tasks, in completion order
    pub(super) succeeded: Vec<String>,
    /// Tasks to start again once the transport has been rebuilt
    pub(super) restart_set: Vec<String>,
    pub(super) should_rebuild: bool,
    /// Replies for bulk requests waiting on the session status to settle
    pub(super) session_acks: Vec<ControlReply>,
}

impl SessionCore {
    /// Build the actor state, rehydrating tasks persisted for the identifier
    #[allow(clippy::too_many_arguments)]
    pub(super) async fn restore(
        identifier: String,
        config: SessionConfig,
        cache: Cache,
        factory: Arc<dyn TransportFactory>,
        checksum: Arc<dyn FileChecksum>,
        main: Arc<dyn MainExecutor>,
        shared: Arc<SessionShared>,
        tx: WeakUnboundedSender<Command>,
    ) -> Self {
        // Failures are logged by the cache; downloads still work in memory
        cache.create_directory().await.ok();

        let mut core = Self {
            identifier,
            config,
            cache,
            factory,
            checksum,
            main,
            shared,
            tx,
            transport: None,
            generation: 0,
            tasks: IndexMap::new(),
            url_mapper: HashMap::new(),
            running: Vec::new(),
            succeeded: Vec::new(),
            restart_set: Vec::new(),
            should_rebuild: false,
            session_acks: Vec::new(),
        };

        for descriptor in core.cache.retrieve_all_tasks().await {
            if core.tasks.contains_key(&descriptor.url) {
                tracing::warn!(url = %descriptor.url, "duplicate task in persisted list, skipping");
                continue;
            }
            let task = DownloadTask::from_descriptor(
                descriptor,
                core.cache.download_file_path().to_path_buf(),
                core.link(),
            );
            core.insert_task(task);
        }

        // Persist the normalised list so it never describes a live transfer
        core.persist().await;
        core.publish_progress();
        core.determine_status(false).await;
        core
    }

    /// Process commands until shutdown or until every handle is dropped
    pub(super) async fn run(mut self, mut rx: UnboundedReceiver<Command>) {
        let mut ticker = tokio::time::interval(SPEED_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        reply.send(()).ok();
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                _ = ticker.tick(), if self.session_status() == Status::Running => {
                    self.tick_speed();
                }
            }
        }
        tracing::debug!(identifier = %self.identifier, "session actor stopped");
    }

    async fn handle(&mut self, command: Command) {
        tracing::trace!(identifier = %self.identifier, ?command, "handling command");
        match command {
            Command::Download {
                url,
                headers,
                file_name,
                reply,
            } => {
                let result = self.download(url, headers, file_name).await;
                reply.send(result).ok();
            }
            Command::MultiDownload {
                urls,
                headers,
                file_names,
                reply,
            } => {
                let result = self.multi_download(urls, headers, file_names).await;
                reply.send(result).ok();
            }
            Command::Control { url, action, reply } => self.control(url, action, reply).await,
            Command::Bulk { action, reply } => self.bulk(action, reply).await,
            Command::FetchTask { url, reply } => {
                let task = self
                    .resolve_key(&url)
                    .and_then(|key| self.tasks.get(&key))
                    .map(|entry| entry.task.clone());
                reply.send(task).ok();
            }
            Command::Tasks { reply } => {
                reply.send(self.task_handles()).ok();
            }
            Command::SucceededTasks { reply } => {
                let tasks = self
                    .succeeded
                    .iter()
                    .filter_map(|key| self.tasks.get(key))
                    .map(|entry| entry.task.clone())
                    .collect();
                reply.send(tasks).ok();
            }
            Command::MoveTask { from, to, reply } => {
                let result = self.move_task(from, to).await;
                reply.send(result).ok();
            }
            Command::SortTasks { compare, reply } => {
                self.sort_tasks(compare).await;
                reply.send(()).ok();
            }
            Command::UpdateConfig { config, reply } => {
                self.update_config(config).await;
                reply.send(()).ok();
            }
            Command::ValidateFile {
                url,
                code,
                algorithm,
            } => self.validate_file(url, code, algorithm).await,
            Command::ValidationFinished {
                url,
                code,
                algorithm,
                result,
            } => self.validation_finished(url, code, algorithm, result).await,
            Command::ClearDiskCache { reply } => {
                let result = self.cache.clear_disk_cache().await.map_err(Error::from);
                reply.send(result).ok();
            }
            Command::Transport { generation, event } => {
                self.transport_event(generation, event).await;
            }
            Command::Shutdown { reply } => {
                // Handled by the run loop; answer anyway
                reply.send(()).ok();
            }
        }
    }

    async fn shutdown(&mut self) {
        self.persist().await;
        if let Some(transport) = self.transport.take() {
            transport.invalidate();
            self.generation += 1;
        }
        tracing::info!(
            identifier = %self.identifier,
            tasks = self.tasks.len(),
            "session shut down"
        );
    }

    pub(super) fn link(&self) -> ManagerLink {
        ManagerLink {
            identifier: self.identifier.clone(),
            tx: self.tx.clone(),
        }
    }

    /// Add a task to the list and the URL maps
    pub(super) fn insert_task(&mut self, task: DownloadTask) {
        let key = task.url().to_string();
        let current_url = task.current_url();
        if task.status() == Status::Succeeded && !self.succeeded.contains(&key) {
            self.succeeded.push(key.clone());
        }
        self.url_mapper.insert(key.clone(), key.clone());
        self.url_mapper.insert(current_url, key.clone());
        self.tasks.insert(key.clone(), TaskEntry::new(task));
        self.emit(Event::TaskAdded { url: key });
    }

    /// Map a caller-supplied URL (canonical, unnormalised or redirected) to a task key
    pub(super) fn resolve_key(&self, url: &str) -> Option<String> {
        if self.tasks.contains_key(url) {
            return Some(url.to_string());
        }
        if let Ok(parsed) = crate::utils::parse_url(url)
            && self.tasks.contains_key(parsed.as_str())
        {
            return Some(parsed.as_str().to_string());
        }
        self.url_mapper.get(url).cloned()
    }

    pub(super) fn task_handles(&self) -> Vec<DownloadTask> {
        self.tasks.values().map(|entry| entry.task.clone()).collect()
    }

    /// Write the whole task list; failures are logged by the cache
    pub(super) async fn persist(&self) {
        let descriptors: Vec<_> = self
            .tasks
            .values()
            .map(|entry| entry.task.to_descriptor())
            .collect();
        self.cache.store_tasks(&descriptors).await.ok();
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers the event is dropped.
    pub(super) fn emit(&self, event: Event) {
        self.shared.event_tx.send(event).ok();
    }
}

/// Reply to a control call that settles immediately
pub(super) fn ack(reply: Option<ControlReply>, result: Result<()>) {
    if let Some(reply) = reply {
        reply.send(result).ok();
    }
}
