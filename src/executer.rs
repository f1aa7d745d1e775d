//! Callback dispatch
//!
//! Every user callback is wrapped in an [`Executer`] that remembers which
//! execution context it wants. Handlers registered with `on_main = false` run
//! inline on the session actor, in the order their events were processed.
//! Handlers registered with `on_main = true` are handed to the session's
//! [`MainExecutor`], which by default drains them one at a time on a dedicated
//! tokio task (the stand-in for an application's UI thread).

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::mpsc;

/// A unit of work handed to a [`MainExecutor`]
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Execution context for callbacks registered with `on_main = true`
///
/// Implementations must run jobs in submission order.
pub trait MainExecutor: Send + Sync {
    /// Schedule `job`
    fn execute(&self, job: Job);
}

/// Default [`MainExecutor`]: a single tokio task that runs jobs in FIFO order
///
/// Must be created inside a tokio runtime. The draining task stops once every
/// clone of the executor is dropped.
#[derive(Clone, Debug)]
pub struct SerialMainExecutor {
    tx: mpsc::UnboundedSender<Job>,
}

impl SerialMainExecutor {
    /// Spawn the draining task
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                run_guarded(job);
            }
        });
        Self { tx }
    }
}

impl Default for SerialMainExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MainExecutor for SerialMainExecutor {
    fn execute(&self, job: Job) {
        if self.tx.send(job).is_err() {
            tracing::warn!("main executor stopped, dropping callback");
        }
    }
}

/// [`MainExecutor`] that runs jobs immediately on the calling thread
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl MainExecutor for InlineExecutor {
    fn execute(&self, job: Job) {
        run_guarded(job);
    }
}

/// Run a callback, containing any panic it raises
///
/// A panicking user callback must not take the session actor down with it.
pub(crate) fn run_guarded(job: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        tracing::error!("callback panicked");
    }
}

/// A user callback bound to its delivery context
pub struct Executer<T> {
    on_main: bool,
    handler: Arc<dyn Fn(&T) + Send + Sync>,
}

impl<T> Clone for Executer<T> {
    fn clone(&self) -> Self {
        Self {
            on_main: self.on_main,
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<T> std::fmt::Debug for Executer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executer")
            .field("on_main", &self.on_main)
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> Executer<T> {
    /// Wrap `handler`; with `on_main` it is delivered through the main executor
    pub fn new(on_main: bool, handler: impl Fn(&T) + Send + Sync + 'static) -> Self {
        Self {
            on_main,
            handler: Arc::new(handler),
        }
    }

    /// Whether this callback is delivered through the main executor
    pub fn on_main(&self) -> bool {
        self.on_main
    }

    /// Deliver `value` to the handler on its context
    pub fn execute(&self, value: &T, main: &dyn MainExecutor) {
        if self.on_main {
            let handler = Arc::clone(&self.handler);
            let value = value.clone();
            main.execute(Box::new(move || handler(&value)));
        } else {
            run_guarded(|| (self.handler)(value));
        }
    }
}
