//! # durable-dl
//!
//! Client-side resumable download manager.
//!
//! ## Design Philosophy
//!
//! durable-dl is designed to be:
//! - **Transport-agnostic** - Byte transfer is delegated to an embedding-supplied
//!   [`Transport`]; the crate owns scheduling, persistence and recovery
//! - **Durable** - The task list, resume tokens and finished files survive
//!   process restarts
//! - **Embeddable** - No UI and no network stack of its own
//! - **Event-driven** - Consumers register callbacks or subscribe to events
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use durable_dl::{Config, SessionManager, TransportFactory};
//!
//! async fn run(factory: Arc<dyn TransportFactory>) -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = SessionManager::new(Config::new("videos"), factory).await?;
//!
//!     // Observe every state change
//!     let mut events = manager.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             tracing::debug!(?event, "session event");
//!         }
//!     });
//!
//!     let task = manager
//!         .download("https://example.com/big.iso", None, None)
//!         .await?;
//!     task.on_completion(true, |t| println!("{} ended as {}", t.url(), t.status()));
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Persistence store: task list, temporary files and finished files
pub mod cache;
/// File checksum validation
pub mod checksum;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Callback dispatch
pub mod executer;
/// Session manager (decomposed into focused submodules)
pub mod manager;
/// Resume token repair and inspection
pub mod resume_token;
/// Download task handle
pub mod task;
/// Transport capability contract
pub mod transport;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use cache::{Cache, TaskDescriptor};
pub use checksum::{DigestFileChecksum, FileChecksum};
pub use config::{CacheConfig, Config, SessionConfig};
pub use error::{CacheError, ChecksumError, Error, Result, TaskError};
pub use executer::{Executer, InlineExecutor, MainExecutor, SerialMainExecutor};
pub use manager::{ControlAck, ManagerOptions, SessionManager, TaskComparator};
pub use resume_token::{ResumeTokenCodec, TokenQuirks};
pub use task::DownloadTask;
pub use transport::{
    TransferId, TransferInfo, Transport, TransportDelegate, TransportError, TransportErrorKind,
    TransportFactory, TransportRequest,
};
pub use types::{
    ChecksumAlgorithm, Event, Headers, Progress, SessionSnapshot, Status, TaskSnapshot,
    Validation,
};

/// Run until a termination signal arrives, then shut the session down.
///
/// Shutting down persists the task list, so transfers interrupted this way
/// come back suspended on the next start.
///
/// - **Unix:** listens for SIGTERM and SIGINT.
/// - **Other targets:** waits for Ctrl+C only.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use durable_dl::{Config, SessionManager, TransportFactory, run_with_shutdown};
///
/// async fn serve(factory: Arc<dyn TransportFactory>) -> durable_dl::Result<()> {
///     let manager = SessionManager::new(Config::new("videos"), factory).await?;
///     manager.total_start().await?;
///     run_with_shutdown(manager).await
/// }
/// ```
pub async fn run_with_shutdown(manager: SessionManager) -> Result<()> {
    wait_for_signal().await;
    tracing::info!(identifier = %manager.identifier(), "shutting down session");
    manager.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
