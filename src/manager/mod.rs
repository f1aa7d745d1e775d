//! Session orchestration split into focused submodules.
//!
//! A [`SessionManager`] is a cloneable handle to a session actor: one tokio
//! task that owns every [`DownloadTask`] of a session identifier and processes
//! commands strictly in order. The actor's state is organized by domain:
//! - [`actor`] - Actor state, start-up restore and the command loop
//! - [`queue`] - Task creation, lookup, listing and ordering
//! - [`control`] - Single-task start/suspend/cancel/remove
//! - [`bulk`] - Whole-session start/suspend/cancel/remove
//! - [`completion`] - Settling transfers into task states
//! - [`validation`] - Checksum validation scheduling
//! - [`status`] - Derived session status and aggregate progress
//! - [`config_ops`] - Runtime configuration updates and transport rebuilds
//! - [`transport_events`] - Routing of transport callbacks

mod actor;
mod bulk;
mod completion;
mod config_ops;
mod control;
mod queue;
mod status;
mod transport_events;
mod validation;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::cache::Cache;
use crate::checksum::{DigestFileChecksum, FileChecksum};
use crate::config::{Config, SessionConfig};
use crate::error::{ChecksumError, Error, Result};
use crate::executer::{Executer, MainExecutor, SerialMainExecutor};
use crate::task::DownloadTask;
use crate::transport::{TransportEvent, TransportFactory};
use crate::types::{ChecksumAlgorithm, Event, Headers, Progress, SessionSnapshot, Status, TaskSnapshot};

use self::actor::SessionCore;

/// Reply channel for a control call
pub(crate) type ControlReply = oneshot::Sender<Result<()>>;

/// Comparator used by [`SessionManager::sort_tasks`]
pub type TaskComparator = Box<dyn FnMut(&TaskSnapshot, &TaskSnapshot) -> Ordering + Send>;

/// Single-task control request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ControlAction {
    Start,
    Suspend,
    Cancel,
    Remove { completely: bool },
}

/// Commands processed by the session actor
pub(crate) enum Command {
    Download {
        url: String,
        headers: Option<Headers>,
        file_name: Option<String>,
        reply: oneshot::Sender<Result<DownloadTask>>,
    },
    MultiDownload {
        urls: Vec<String>,
        headers: Vec<Headers>,
        file_names: Vec<String>,
        reply: oneshot::Sender<Result<Vec<DownloadTask>>>,
    },
    Control {
        url: String,
        action: ControlAction,
        reply: ControlReply,
    },
    Bulk {
        action: ControlAction,
        reply: ControlReply,
    },
    FetchTask {
        url: String,
        reply: oneshot::Sender<Option<DownloadTask>>,
    },
    Tasks {
        reply: oneshot::Sender<Vec<DownloadTask>>,
    },
    SucceededTasks {
        reply: oneshot::Sender<Vec<DownloadTask>>,
    },
    MoveTask {
        from: usize,
        to: usize,
        reply: oneshot::Sender<Result<()>>,
    },
    SortTasks {
        compare: TaskComparator,
        reply: oneshot::Sender<()>,
    },
    UpdateConfig {
        config: SessionConfig,
        reply: oneshot::Sender<()>,
    },
    ValidateFile {
        url: String,
        code: String,
        algorithm: ChecksumAlgorithm,
    },
    ValidationFinished {
        url: String,
        code: String,
        algorithm: ChecksumAlgorithm,
        result: std::result::Result<bool, ChecksumError>,
    },
    ClearDiskCache {
        reply: oneshot::Sender<Result<()>>,
    },
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Download { url, .. } => f.debug_struct("Download").field("url", url).finish(),
            Command::MultiDownload { urls, .. } => f
                .debug_struct("MultiDownload")
                .field("urls", &urls.len())
                .finish(),
            Command::Control { url, action, .. } => f
                .debug_struct("Control")
                .field("url", url)
                .field("action", action)
                .finish(),
            Command::Bulk { action, .. } => f.debug_struct("Bulk").field("action", action).finish(),
            Command::FetchTask { url, .. } => f.debug_struct("FetchTask").field("url", url).finish(),
            Command::Tasks { .. } => f.write_str("Tasks"),
            Command::SucceededTasks { .. } => f.write_str("SucceededTasks"),
            Command::MoveTask { from, to, .. } => f
                .debug_struct("MoveTask")
                .field("from", from)
                .field("to", to)
                .finish(),
            Command::SortTasks { .. } => f.write_str("SortTasks"),
            Command::UpdateConfig { config, .. } => f
                .debug_struct("UpdateConfig")
                .field("config", config)
                .finish(),
            Command::ValidateFile { url, algorithm, .. } => f
                .debug_struct("ValidateFile")
                .field("url", url)
                .field("algorithm", algorithm)
                .finish(),
            Command::ValidationFinished { url, result, .. } => f
                .debug_struct("ValidationFinished")
                .field("url", url)
                .field("result", result)
                .finish(),
            Command::ClearDiskCache { .. } => f.write_str("ClearDiskCache"),
            Command::Transport { generation, event } => f
                .debug_struct("Transport")
                .field("generation", generation)
                .field("event", event)
                .finish(),
            Command::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

/// Acknowledgement of a control call
///
/// The request is queued on the session as soon as the call returns. Awaiting
/// the acknowledgement resolves once the resulting status transition has been
/// committed (for a running transfer, once the transport has settled it);
/// dropping it leaves the request in effect.
pub struct ControlAck {
    identifier: String,
    rx: Option<oneshot::Receiver<Result<()>>>,
}

impl ControlAck {
    pub(crate) fn dispatch(
        tx: Option<mpsc::UnboundedSender<Command>>,
        identifier: &str,
        build: impl FnOnce(ControlReply) -> Command,
    ) -> Self {
        let (reply, rx) = oneshot::channel();
        let sent = tx.is_some_and(|tx| tx.send(build(reply)).is_ok());
        Self {
            identifier: identifier.to_string(),
            rx: sent.then_some(rx),
        }
    }
}

impl std::fmt::Debug for ControlAck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlAck")
            .field("identifier", &self.identifier)
            .field("queued", &self.rx.is_some())
            .finish()
    }
}

impl IntoFuture for ControlAck {
    type Output = Result<()>;
    type IntoFuture = BoxFuture<'static, Result<()>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let closed = || Error::SessionClosed(self.identifier.clone());
            match self.rx {
                Some(rx) => rx.await.unwrap_or_else(|_| Err(closed())),
                None => Err(closed()),
            }
        })
    }
}

/// Callbacks registered on a session
#[derive(Default)]
pub(crate) struct SessionCallbacks {
    pub(crate) progress: Option<Executer<SessionSnapshot>>,
    pub(crate) success: Option<Executer<SessionSnapshot>>,
    pub(crate) failure: Option<Executer<SessionSnapshot>>,
    pub(crate) completion: Option<Executer<SessionSnapshot>>,
}

/// State shared between the handle and the actor for point reads
pub(crate) struct SessionShared {
    pub(crate) snapshot: Mutex<SessionSnapshot>,
    pub(crate) config: Mutex<SessionConfig>,
    pub(crate) callbacks: Mutex<SessionCallbacks>,
    pub(crate) event_tx: broadcast::Sender<Event>,
}

/// Optional collaborators for a [`SessionManager`]
#[derive(Clone)]
pub struct ManagerOptions {
    /// Checksum validator (default: [`DigestFileChecksum`])
    pub checksum: Arc<dyn FileChecksum>,
    /// Context for callbacks registered with `on_main = true`
    /// (default: a [`SerialMainExecutor`] spawned for the session)
    pub main_executor: Option<Arc<dyn MainExecutor>>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            checksum: Arc::new(DigestFileChecksum),
            main_executor: None,
        }
    }
}

/// Handle to a download session (cloneable)
///
/// The session stops when [`SessionManager::shutdown`] is called or when the
/// last handle is dropped; in both cases the task list is persisted and the
/// transport invalidated first.
#[derive(Clone)]
pub struct SessionManager {
    identifier: Arc<str>,
    tx: mpsc::UnboundedSender<Command>,
    shared: Arc<SessionShared>,
    cache: Cache,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("identifier", &self.identifier)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a session, restoring any tasks persisted under the identifier
    ///
    /// Restored tasks that were waiting or running come back suspended; call
    /// [`SessionManager::total_start`] to resume them. The transport is not
    /// connected until the first transfer starts.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use durable_dl::{Config, SessionManager, TransportFactory};
    /// # async fn example(factory: Arc<dyn TransportFactory>) -> durable_dl::Result<()> {
    /// let manager = SessionManager::new(Config::new("videos"), factory).await?;
    /// let mut events = manager.subscribe();
    /// tokio::spawn(async move {
    ///     while let Ok(event) = events.recv().await {
    ///         println!("event: {event:?}");
    ///     }
    /// });
    /// manager.total_start().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(config: Config, factory: Arc<dyn TransportFactory>) -> Result<Self> {
        Self::with_options(config, factory, ManagerOptions::default()).await
    }

    /// Create a session with custom collaborators
    pub async fn with_options(
        config: Config,
        factory: Arc<dyn TransportFactory>,
        options: ManagerOptions,
    ) -> Result<Self> {
        let session_config = config.session.clone().clamped();
        let cache = Cache::new(&config.identifier, &config.cache);

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = broadcast::channel(1000);
        let shared = Arc::new(SessionShared {
            snapshot: Mutex::new(SessionSnapshot::new(&config.identifier)),
            config: Mutex::new(session_config.clone()),
            callbacks: Mutex::new(SessionCallbacks::default()),
            event_tx,
        });

        let main: Arc<dyn MainExecutor> = match options.main_executor {
            Some(main) => main,
            None => Arc::new(SerialMainExecutor::new()),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let core = SessionCore::restore(
            config.identifier.clone(),
            session_config,
            cache.clone(),
            factory,
            options.checksum,
            main,
            Arc::clone(&shared),
            tx.downgrade(),
        )
        .await;
        tokio::spawn(core.run(rx));

        tracing::info!(identifier = %config.identifier, "session started");
        Ok(Self {
            identifier: Arc::from(config.identifier.as_str()),
            tx,
            shared,
            cache,
        })
    }

    /// Session identifier
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Current transport-facing configuration
    pub fn config(&self) -> SessionConfig {
        self.shared.config.lock().clone()
    }

    /// Persistence store of this session (paths and file checks)
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Full path a finished file named `file_name` is stored at
    pub fn file_path(&self, file_name: &str) -> PathBuf {
        self.cache.file_path(file_name)
    }

    /// Whether a finished file named `file_name` exists
    pub async fn file_exists(&self, file_name: &str) -> bool {
        self.cache.file_exists(file_name).await
    }

    /// Subscribe to session events
    ///
    /// Multiple subscribers are supported. A subscriber that falls more than
    /// 1000 events behind receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.event_tx.subscribe()
    }

    /// Derived session status
    pub fn status(&self) -> Status {
        self.shared.snapshot.lock().status
    }

    /// Aggregate byte progress over all tasks
    pub fn progress(&self) -> Progress {
        self.shared.snapshot.lock().progress
    }

    /// Aggregate speed of running tasks, in bytes per second
    pub fn speed(&self) -> u64 {
        self.shared.snapshot.lock().speed
    }

    /// Estimated seconds until every running task finishes
    pub fn time_remaining(&self) -> u64 {
        self.shared.snapshot.lock().time_remaining
    }

    /// Point-in-time copy of the session's aggregate state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot.lock().clone()
    }

    /// Called with a session snapshot whenever aggregate progress changes
    pub fn on_progress(
        &self,
        on_main: bool,
        handler: impl Fn(&SessionSnapshot) + Send + Sync + 'static,
    ) -> &Self {
        self.shared.callbacks.lock().progress = Some(Executer::new(on_main, handler));
        self
    }

    /// Called when every task has succeeded (unless a completion handler is set)
    pub fn on_success(
        &self,
        on_main: bool,
        handler: impl Fn(&SessionSnapshot) + Send + Sync + 'static,
    ) -> &Self {
        self.shared.callbacks.lock().success = Some(Executer::new(on_main, handler));
        self
    }

    /// Called when the session settles without full success (unless a
    /// completion handler is set)
    pub fn on_failure(
        &self,
        on_main: bool,
        handler: impl Fn(&SessionSnapshot) + Send + Sync + 'static,
    ) -> &Self {
        self.shared.callbacks.lock().failure = Some(Executer::new(on_main, handler));
        self
    }

    /// Called whenever the session settles; supersedes `on_success` and `on_failure`
    pub fn on_completion(
        &self,
        on_main: bool,
        handler: impl Fn(&SessionSnapshot) + Send + Sync + 'static,
    ) -> &Self {
        self.shared.callbacks.lock().completion = Some(Executer::new(on_main, handler));
        self
    }

    /// Find or create the task for `url` and start it
    ///
    /// An existing task keeps its progress; `headers` and `file_name` replace
    /// the stored ones when given. The start is subject to the concurrency
    /// limit.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidUrl`] if `url` is not an absolute URL with a host.
    pub async fn download(
        &self,
        url: impl Into<String>,
        headers: Option<Headers>,
        file_name: Option<String>,
    ) -> Result<DownloadTask> {
        let url = url.into();
        self.request(|reply| Command::Download {
            url,
            headers,
            file_name,
            reply,
        })
        .await?
    }

    /// Find or create tasks for a batch of URLs and start them
    ///
    /// `headers` and `file_names` are either empty or line up with `urls`.
    /// Invalid URLs are skipped and duplicates within the batch are dropped,
    /// both with a logged error.
    ///
    /// # Errors
    ///
    /// [`Error::HeadersMatchFailed`] or [`Error::FileNamesMatchFailed`] when a
    /// non-empty list has the wrong length; no task is created or changed.
    pub async fn multi_download(
        &self,
        urls: Vec<String>,
        headers: Vec<Headers>,
        file_names: Vec<String>,
    ) -> Result<Vec<DownloadTask>> {
        self.request(|reply| Command::MultiDownload {
            urls,
            headers,
            file_names,
            reply,
        })
        .await?
    }

    /// Look up a task by canonical URL
    pub async fn fetch_task(&self, url: impl AsRef<str>) -> Result<Option<DownloadTask>> {
        let url = url.as_ref().to_string();
        self.request(|reply| Command::FetchTask { url, reply }).await
    }

    /// All tasks in list order
    pub async fn tasks(&self) -> Result<Vec<DownloadTask>> {
        self.request(|reply| Command::Tasks { reply }).await
    }

    /// Succeeded tasks in the order they succeeded
    pub async fn succeeded_tasks(&self) -> Result<Vec<DownloadTask>> {
        self.request(|reply| Command::SucceededTasks { reply }).await
    }

    /// Start a task
    pub fn start(&self, task: impl AsRef<str>) -> ControlAck {
        self.control(task, ControlAction::Start)
    }

    /// Suspend a task, keeping a resume token when the transport provides one
    pub fn suspend(&self, task: impl AsRef<str>) -> ControlAck {
        self.control(task, ControlAction::Suspend)
    }

    /// Cancel a task and discard its temporary data
    pub fn cancel(&self, task: impl AsRef<str>) -> ControlAck {
        self.control(task, ControlAction::Cancel)
    }

    /// Remove a task; with `completely` the finished file is deleted too
    pub fn remove(&self, task: impl AsRef<str>, completely: bool) -> ControlAck {
        self.control(task, ControlAction::Remove { completely })
    }

    /// Start every task that has not succeeded
    pub fn total_start(&self) -> ControlAck {
        self.bulk(ControlAction::Start)
    }

    /// Suspend every task; resolves once the session is suspended
    pub fn total_suspend(&self) -> ControlAck {
        self.bulk(ControlAction::Suspend)
    }

    /// Cancel every task; resolves once the session is canceled
    pub fn total_cancel(&self) -> ControlAck {
        self.bulk(ControlAction::Cancel)
    }

    /// Remove every task; resolves once the session is removed
    pub fn total_remove(&self, completely: bool) -> ControlAck {
        self.bulk(ControlAction::Remove { completely })
    }

    /// Move the task at `from` to position `to` in the list
    ///
    /// Only the caller-visible order changes; scheduling is unaffected.
    ///
    /// # Errors
    ///
    /// [`Error::IndexOutOfRange`] if either index is outside the list.
    pub async fn move_task(&self, from: usize, to: usize) -> Result<()> {
        self.request(|reply| Command::MoveTask { from, to, reply })
            .await?
    }

    /// Reorder the task list with `compare`
    pub async fn sort_tasks(
        &self,
        compare: impl FnMut(&TaskSnapshot, &TaskSnapshot) -> Ordering + Send + 'static,
    ) -> Result<()> {
        let compare: TaskComparator = Box::new(compare);
        self.request(|reply| Command::SortTasks { compare, reply })
            .await
    }

    /// Apply a new transport configuration
    ///
    /// Running and waiting tasks are suspended, the transport is rebuilt with
    /// the new settings, and the same tasks are started again under the new
    /// concurrency limit.
    pub async fn update_config(&self, config: SessionConfig) -> Result<()> {
        self.request(|reply| Command::UpdateConfig { config, reply })
            .await
    }

    /// Delete every stored file of this session and recreate the layout
    pub async fn clear_disk_cache(&self) -> Result<()> {
        self.request(|reply| Command::ClearDiskCache { reply })
            .await?
    }

    /// Persist the task list, invalidate the transport and stop the session
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    fn control(&self, task: impl AsRef<str>, action: ControlAction) -> ControlAck {
        let url = task.as_ref().to_string();
        ControlAck::dispatch(Some(self.tx.clone()), &self.identifier, |reply| {
            Command::Control { url, action, reply }
        })
    }

    fn bulk(&self, action: ControlAction) -> ControlAck {
        ControlAck::dispatch(Some(self.tx.clone()), &self.identifier, |reply| {
            Command::Bulk { action, reply }
        })
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| Error::SessionClosed(self.identifier.to_string()))?;
        rx.await
            .map_err(|_| Error::SessionClosed(self.identifier.to_string()))
    }
}
