//! Download task handle and per-task state
//!
//! A [`DownloadTask`] is a cheap, cloneable handle. Its observable state lives
//! behind a `parking_lot` mutex so progress and status can be read from any
//! thread without waiting for the session; every mutation is made by the
//! session actor in a single critical section per transition.
//!
//! The handle refers back to its session only through the session identifier
//! and a weak command sender, so a task kept alive by the application never
//! keeps the session alive.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc::WeakUnboundedSender;

use crate::cache::TaskDescriptor;
use crate::error::{ChecksumError, TaskError};
use crate::executer::{Executer, MainExecutor};
use crate::manager::{Command, ControlAck, ControlAction, ControlReply};
use crate::transport::TransferId;
use crate::types::{ChecksumAlgorithm, Headers, Progress, Status, TaskSnapshot, Validation};
use crate::utils;

pub(crate) mod speed;

pub use speed::time_remaining;
use speed::SpeedSampler;

/// Mutable state of one download
#[derive(Clone, Debug)]
pub(crate) struct TaskState {
    pub(crate) current_url: String,
    pub(crate) file_name: String,
    pub(crate) headers: Option<Headers>,
    pub(crate) status: Status,
    pub(crate) progress: Progress,
    pub(crate) speed: u64,
    pub(crate) time_remaining: u64,
    pub(crate) start_date: f64,
    pub(crate) end_date: f64,
    pub(crate) error: Option<TaskError>,
    pub(crate) verification_code: Option<String>,
    pub(crate) verification_type: ChecksumAlgorithm,
    pub(crate) validation: Validation,
    /// The (code, algorithm) pair `validation` was computed for
    pub(crate) validated_with: Option<(String, ChecksumAlgorithm)>,
    pub(crate) validation_error: Option<ChecksumError>,
    pub(crate) resume_token: Option<Vec<u8>>,
}

impl TaskState {
    fn new(url: &str, file_name: String, headers: Option<Headers>) -> Self {
        Self {
            current_url: url.to_string(),
            file_name,
            headers,
            status: Status::Waiting,
            progress: Progress::default(),
            speed: 0,
            time_remaining: 0,
            start_date: 0.0,
            end_date: 0.0,
            error: None,
            verification_code: None,
            verification_type: ChecksumAlgorithm::default(),
            validation: Validation::Unknown,
            validated_with: None,
            validation_error: None,
            resume_token: None,
        }
    }

    fn from_descriptor(descriptor: TaskDescriptor) -> Self {
        // A restored non-unknown outcome was computed for the stored pair
        let validated_with = match (&descriptor.verification_code, descriptor.validation) {
            (Some(code), Validation::Correct | Validation::Incorrect) => {
                Some((code.clone(), descriptor.verification_type))
            }
            _ => None,
        };
        Self {
            current_url: descriptor.current_url,
            file_name: descriptor.file_name,
            headers: descriptor.headers,
            status: descriptor.status,
            progress: Progress::new(descriptor.completed_bytes, descriptor.total_bytes),
            speed: 0,
            time_remaining: 0,
            start_date: descriptor.start_date,
            end_date: descriptor.end_date,
            error: descriptor.error,
            verification_code: descriptor.verification_code,
            verification_type: descriptor.verification_type,
            validation: descriptor.validation,
            validated_with,
            validation_error: None,
            resume_token: descriptor.resume_token,
        }
    }
}

/// Callbacks registered on a task
#[derive(Default)]
struct TaskCallbacks {
    progress: Option<Executer<DownloadTask>>,
    success: Option<Executer<DownloadTask>>,
    failure: Option<Executer<DownloadTask>>,
    completion: Option<Executer<DownloadTask>>,
    validation: Option<Executer<DownloadTask>>,
}

/// Non-owning route back to the session that owns a task
#[derive(Clone, Debug)]
pub(crate) struct ManagerLink {
    pub(crate) identifier: String,
    pub(crate) tx: WeakUnboundedSender<Command>,
}

struct TaskInner {
    url: String,
    file_dir: PathBuf,
    link: ManagerLink,
    state: Mutex<TaskState>,
    callbacks: Mutex<TaskCallbacks>,
}

/// Handle to one download in a session
///
/// Clones share the same task. Registering callbacks returns `&Self` so calls
/// can be chained.
///
/// # Examples
///
/// ```no_run
/// # async fn example(manager: durable_dl::SessionManager) -> durable_dl::Result<()> {
/// use durable_dl::ChecksumAlgorithm;
///
/// let task = manager
///     .download("https://example.com/big.iso", None, None)
///     .await?;
/// task.on_progress(true, |t| println!("{:.1}%", t.progress().fraction() * 100.0))
///     .on_completion(true, |t| println!("{} ended as {}", t.url(), t.status()))
///     .validate_file("d41d8cd98f00b204e9800998ecf8427e", ChecksumAlgorithm::Md5, true, |t| {
///         println!("checksum: {:?}", t.validation())
///     });
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DownloadTask {
    inner: Arc<TaskInner>,
}

impl std::fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTask")
            .field("url", &self.inner.url)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl PartialEq for DownloadTask {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl AsRef<str> for DownloadTask {
    fn as_ref(&self) -> &str {
        &self.inner.url
    }
}

impl DownloadTask {
    pub(crate) fn new(
        url: String,
        file_name: Option<String>,
        headers: Option<Headers>,
        file_dir: PathBuf,
        link: ManagerLink,
    ) -> Self {
        let file_name = file_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| utils::default_file_name(&url));
        let state = TaskState::new(&url, file_name, headers);
        Self::with_state(url, state, file_dir, link)
    }

    pub(crate) fn from_descriptor(
        descriptor: TaskDescriptor,
        file_dir: PathBuf,
        link: ManagerLink,
    ) -> Self {
        let url = descriptor.url.clone();
        let mut state = TaskState::from_descriptor(descriptor);
        if state.file_name.is_empty() {
            state.file_name = utils::default_file_name(&url);
        }
        Self::with_state(url, state, file_dir, link)
    }

    fn with_state(url: String, state: TaskState, file_dir: PathBuf, link: ManagerLink) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                url,
                file_dir,
                link,
                state: Mutex::new(state),
                callbacks: Mutex::new(TaskCallbacks::default()),
            }),
        }
    }

    /// Canonical URL; the task's key within its session
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Identifier of the owning session
    pub fn session_identifier(&self) -> &str {
        &self.inner.link.identifier
    }

    /// URL after transport redirects
    pub fn current_url(&self) -> String {
        self.read(|s| s.current_url.clone())
    }

    /// File name within the session's finished-files directory
    pub fn file_name(&self) -> String {
        self.read(|s| s.file_name.clone())
    }

    /// Full path of the finished file
    pub fn file_path(&self) -> PathBuf {
        self.inner.file_dir.join(self.file_name())
    }

    /// Request headers
    pub fn headers(&self) -> Option<Headers> {
        self.read(|s| s.headers.clone())
    }

    /// Current status
    pub fn status(&self) -> Status {
        self.read(|s| s.status)
    }

    /// Byte progress
    pub fn progress(&self) -> Progress {
        self.read(|s| s.progress)
    }

    /// Bytes per second, sampled once a second while running
    pub fn speed(&self) -> u64 {
        self.read(|s| s.speed)
    }

    /// Estimated seconds remaining
    pub fn time_remaining(&self) -> u64 {
        self.read(|s| s.time_remaining)
    }

    /// Epoch seconds of the last start (0 if never started)
    pub fn start_date(&self) -> f64 {
        self.read(|s| s.start_date)
    }

    /// Epoch seconds of the terminal transition (0 if none yet)
    pub fn end_date(&self) -> f64 {
        self.read(|s| s.end_date)
    }

    /// Last error
    pub fn error(&self) -> Option<TaskError> {
        self.read(|s| s.error.clone())
    }

    /// Checksum validation outcome
    pub fn validation(&self) -> Validation {
        self.read(|s| s.validation)
    }

    /// Why the last validation could not run, if it could not
    pub fn validation_error(&self) -> Option<ChecksumError> {
        self.read(|s| s.validation_error.clone())
    }

    /// Registered expected digest
    pub fn verification_code(&self) -> Option<String> {
        self.read(|s| s.verification_code.clone())
    }

    /// Registered digest algorithm
    pub fn verification_type(&self) -> ChecksumAlgorithm {
        self.read(|s| s.verification_type)
    }

    /// Whether a resume token is held
    pub fn has_resume_token(&self) -> bool {
        self.read(|s| s.resume_token.is_some())
    }

    /// Speed formatted for display (e.g. "1.50 MB/s")
    pub fn speed_string(&self) -> String {
        utils::format_speed(self.speed())
    }

    /// Remaining time formatted for display
    pub fn time_remaining_string(&self) -> String {
        utils::format_time_remaining(self.time_remaining())
    }

    /// Point-in-time copy of the task's state
    pub fn snapshot(&self) -> TaskSnapshot {
        let file_path = self.file_path();
        self.read(|s| TaskSnapshot {
            url: self.inner.url.clone(),
            current_url: s.current_url.clone(),
            file_name: s.file_name.clone(),
            file_path,
            headers: s.headers.clone(),
            status: s.status,
            progress: s.progress,
            speed: s.speed,
            time_remaining: s.time_remaining,
            start_date: s.start_date,
            end_date: s.end_date,
            error: s.error.clone(),
            verification_code: s.verification_code.clone(),
            verification_type: s.verification_type,
            validation: s.validation,
            has_resume_token: s.resume_token.is_some(),
        })
    }

    /// Called with the task whenever bytes arrive
    pub fn on_progress(
        &self,
        on_main: bool,
        handler: impl Fn(&DownloadTask) + Send + Sync + 'static,
    ) -> &Self {
        self.inner.callbacks.lock().progress = Some(Executer::new(on_main, handler));
        self
    }

    /// Called when the task succeeds (unless a completion handler is set)
    pub fn on_success(
        &self,
        on_main: bool,
        handler: impl Fn(&DownloadTask) + Send + Sync + 'static,
    ) -> &Self {
        self.inner.callbacks.lock().success = Some(Executer::new(on_main, handler));
        self
    }

    /// Called when the task stops without success (unless a completion handler is set)
    pub fn on_failure(
        &self,
        on_main: bool,
        handler: impl Fn(&DownloadTask) + Send + Sync + 'static,
    ) -> &Self {
        self.inner.callbacks.lock().failure = Some(Executer::new(on_main, handler));
        self
    }

    /// Called whenever the task settles; supersedes `success` and `failure`
    pub fn on_completion(
        &self,
        on_main: bool,
        handler: impl Fn(&DownloadTask) + Send + Sync + 'static,
    ) -> &Self {
        self.inner.callbacks.lock().completion = Some(Executer::new(on_main, handler));
        self
    }

    /// Register an expected digest and a handler for the validation outcome
    ///
    /// Validation runs once the task has succeeded (immediately if it already
    /// has). The outcome never changes the task's status.
    pub fn validate_file(
        &self,
        code: impl Into<String>,
        algorithm: ChecksumAlgorithm,
        on_main: bool,
        handler: impl Fn(&DownloadTask) + Send + Sync + 'static,
    ) -> &Self {
        self.inner.callbacks.lock().validation = Some(Executer::new(on_main, handler));
        let command = Command::ValidateFile {
            url: self.inner.url.clone(),
            code: code.into(),
            algorithm,
        };
        if !self.send(command) {
            tracing::debug!(url = %self.inner.url, "session gone, validation not scheduled");
        }
        self
    }

    /// Ask the owning session to start this task
    pub fn start(&self) -> ControlAck {
        self.control(ControlAction::Start)
    }

    /// Ask the owning session to suspend this task
    pub fn suspend(&self) -> ControlAck {
        self.control(ControlAction::Suspend)
    }

    /// Ask the owning session to cancel this task
    pub fn cancel(&self) -> ControlAck {
        self.control(ControlAction::Cancel)
    }

    /// Ask the owning session to remove this task
    pub fn remove(&self, completely: bool) -> ControlAck {
        self.control(ControlAction::Remove { completely })
    }

    fn control(&self, action: ControlAction) -> ControlAck {
        let url = self.inner.url.clone();
        ControlAck::dispatch(
            self.inner.link.tx.upgrade(),
            &self.inner.link.identifier,
            |reply| Command::Control { url, action, reply },
        )
    }

    fn send(&self, command: Command) -> bool {
        self.inner
            .link
            .tx
            .upgrade()
            .is_some_and(|tx| tx.send(command).is_ok())
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&TaskState) -> R) -> R {
        f(&self.inner.state.lock())
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut TaskState) -> R) -> R {
        f(&mut self.inner.state.lock())
    }

    pub(crate) fn to_descriptor(&self) -> TaskDescriptor {
        self.read(|s| TaskDescriptor {
            url: self.inner.url.clone(),
            current_url: s.current_url.clone(),
            file_name: s.file_name.clone(),
            headers: s.headers.clone(),
            start_date: s.start_date,
            end_date: s.end_date,
            total_bytes: s.progress.total,
            completed_bytes: s.progress.completed,
            status: s.status,
            verification_code: s.verification_code.clone(),
            verification_type: s.verification_type,
            validation: s.validation,
            resume_token: s.resume_token.clone(),
            error: s.error.clone(),
        })
    }

    pub(crate) fn fire_progress(&self, main: &dyn MainExecutor) {
        let executer = self.inner.callbacks.lock().progress.clone();
        if let Some(executer) = executer {
            executer.execute(self, main);
        }
    }

    pub(crate) fn fire_completion(&self, succeeded: bool, main: &dyn MainExecutor) {
        let executer = {
            let callbacks = self.inner.callbacks.lock();
            match (&callbacks.completion, succeeded) {
                (Some(completion), _) => Some(completion.clone()),
                (None, true) => callbacks.success.clone(),
                (None, false) => callbacks.failure.clone(),
            }
        };
        if let Some(executer) = executer {
            executer.execute(self, main);
        }
    }

    pub(crate) fn fire_validation(&self, main: &dyn MainExecutor) {
        let executer = self.inner.callbacks.lock().validation.clone();
        if let Some(executer) = executer {
            executer.execute(self, main);
        }
    }
}

/// The transfer currently attached to a task
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ActiveTransfer {
    pub(crate) generation: u64,
    pub(crate) id: TransferId,
}

/// Session-side bookkeeping for one task, owned by the session actor
pub(crate) struct TaskEntry {
    pub(crate) task: DownloadTask,
    pub(crate) transfer: Option<ActiveTransfer>,
    /// Control replies waiting for a pending intent to settle
    pub(crate) pending_acks: Vec<ControlReply>,
    pub(crate) remove_completely: bool,
    /// Set when the request changed since the resume token was produced
    pub(crate) token_stale: bool,
    /// Whether the transport delivered and the cache stored the file
    pub(crate) file_stored: bool,
    pub(crate) storage_error: Option<String>,
    pub(crate) sampler: SpeedSampler,
    /// (code, algorithm) currently being validated on the blocking pool
    pub(crate) validating: Option<(String, ChecksumAlgorithm)>,
}

impl TaskEntry {
    pub(crate) fn new(task: DownloadTask) -> Self {
        Self {
            task,
            transfer: None,
            pending_acks: Vec::new(),
            remove_completely: false,
            token_stale: false,
            file_stored: false,
            storage_error: None,
            sampler: SpeedSampler::default(),
            validating: None,
        }
    }

    pub(crate) fn status(&self) -> Status {
        self.task.status()
    }

    /// Reply to every control call waiting on this task
    pub(crate) fn settle_acks(&mut self) {
        for reply in self.pending_acks.drain(..) {
            reply.send(Ok(())).ok();
        }
    }

    pub(crate) fn restart_sampler(&mut self) {
        let completed = self.task.progress().completed;
        self.sampler.reset(completed, Instant::now());
    }
}
