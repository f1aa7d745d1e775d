//! Transport capability contract
//!
//! The byte-level transfer is delegated to an embedding-supplied [`Transport`].
//! A session drives it through `begin`/`resume`/`cancel` and receives results
//! through the [`TransportDelegate`] it hands to [`TransportFactory::connect`].
//!
//! Delegate calls may come from any thread; they are forwarded to the session's
//! serial context and never block.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::WeakUnboundedSender;

use crate::config::SessionConfig;
use crate::error::TaskError;
use crate::manager::Command;
use crate::resume_token::TokenQuirks;
use crate::types::Headers;

/// Identifier of a single transfer, unique within one transport instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransferId(pub u64);

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fresh transfer request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportRequest {
    /// URL to fetch
    pub url: String,
    /// Headers to send
    pub headers: Headers,
    /// Per-request timeout
    pub timeout: Duration,
}

/// Identity of a transfer as reported in delegate callbacks
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferInfo {
    /// Transfer handle returned by `begin`/`resume`
    pub id: TransferId,
    /// URL the transfer was created for
    pub original_url: String,
    /// URL after redirects
    pub current_url: String,
}

/// Why a transfer ended without success
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The transfer was cancelled (by request or by the system)
    Cancelled,
    /// The request timed out
    TimedOut,
    /// Any other network failure
    Network(String),
}

/// Completion error reported by a transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportError {
    /// Failure classification
    pub kind: TransportErrorKind,
    /// Opaque token allowing the transfer to be resumed later
    pub resume_token: Option<Vec<u8>>,
    /// Set when the transfer ended because the background channel was
    /// invalidated (e.g. a suspend-triggered cancellation) rather than a
    /// real network failure
    pub background_invalidated: bool,
}

impl TransportError {
    /// A plain cancellation
    pub fn cancelled() -> Self {
        Self {
            kind: TransportErrorKind::Cancelled,
            resume_token: None,
            background_invalidated: false,
        }
    }

    /// A network failure with a description
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Network(message.into()),
            resume_token: None,
            background_invalidated: false,
        }
    }

    /// A request timeout
    pub fn timed_out() -> Self {
        Self {
            kind: TransportErrorKind::TimedOut,
            resume_token: None,
            background_invalidated: false,
        }
    }

    /// Attach a resume token
    #[must_use]
    pub fn with_resume_token(mut self, token: Vec<u8>) -> Self {
        self.resume_token = Some(token);
        self
    }

    /// Mark the error as caused by background invalidation
    #[must_use]
    pub fn invalidated(mut self) -> Self {
        self.background_invalidated = true;
        self
    }

    pub(crate) fn to_task_error(&self) -> TaskError {
        match &self.kind {
            TransportErrorKind::Cancelled => TaskError::Cancelled,
            TransportErrorKind::TimedOut => TaskError::Network("request timed out".into()),
            TransportErrorKind::Network(message) => TaskError::Network(message.clone()),
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            TransportErrorKind::Cancelled => write!(f, "cancelled"),
            TransportErrorKind::TimedOut => write!(f, "timed out"),
            TransportErrorKind::Network(message) => write!(f, "network error: {message}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Trait for the byte-transfer capability
///
/// Implementations perform the transfer asynchronously and report back through
/// the [`TransportDelegate`] they were connected with. Every transfer started
/// by `begin` or `resume` must eventually produce exactly one `completed` call.
///
/// The file reported to [`TransportDelegate::finished`] must stay in place until
/// the matching `completed` call has been made; the session moves it into its
/// cache.
pub trait Transport: Send + Sync {
    /// Start a fresh transfer
    fn begin(&self, request: TransportRequest) -> TransferId;

    /// Continue a transfer from a resume token previously delivered in a
    /// [`TransportError`]
    fn resume(&self, request: TransportRequest, token: Vec<u8>) -> TransferId;

    /// Cancel a transfer; with `produce_token` the completion error should
    /// carry a resume token
    fn cancel(&self, id: TransferId, produce_token: bool);

    /// Cancel everything and release the channel; a final
    /// [`TransportDelegate::invalidated`] call is optional
    fn invalidate(&self);

    /// Which known resume-token defects this transport's tokens carry
    fn token_quirks(&self) -> TokenQuirks {
        TokenQuirks::None
    }

    /// Human-readable name for logging
    fn name(&self) -> &'static str {
        "transport"
    }
}

/// Creates transport channels for a session
///
/// Called lazily before the first transfer and again after every rebuild.
pub trait TransportFactory: Send + Sync {
    /// Build a transport for `config` reporting through `delegate`
    fn connect(&self, config: &SessionConfig, delegate: TransportDelegate) -> Arc<dyn Transport>;
}

/// Callback events forwarded from a transport to the session actor
#[derive(Debug)]
pub(crate) enum TransportEvent {
    Progress {
        info: TransferInfo,
        total_written: u64,
        total_expected: Option<u64>,
    },
    Finished {
        info: TransferInfo,
        location: PathBuf,
    },
    Completed {
        info: TransferInfo,
        status_code: Option<u16>,
        error: Option<TransportError>,
    },
    Invalidated {
        reason: Option<String>,
    },
}

/// Callback sink handed to a transport
///
/// Holds only a weak handle to the session, so a transport kept alive after its
/// session is gone simply has its callbacks dropped.
#[derive(Clone, Debug)]
pub struct TransportDelegate {
    generation: u64,
    tx: WeakUnboundedSender<Command>,
}

impl TransportDelegate {
    pub(crate) fn new(generation: u64, tx: WeakUnboundedSender<Command>) -> Self {
        Self { generation, tx }
    }

    /// Generation of the transport channel this delegate belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bytes were written for a transfer
    ///
    /// `total_expected` is `None` while the size is unknown.
    pub fn progress(
        &self,
        info: TransferInfo,
        bytes_written: u64,
        total_written: u64,
        total_expected: Option<u64>,
    ) {
        tracing::trace!(
            transfer = %info.id,
            bytes_written,
            total_written,
            "transport progress"
        );
        self.send(TransportEvent::Progress {
            info,
            total_written,
            total_expected,
        });
    }

    /// The transfer's bytes are complete and stored at `location`
    pub fn finished(&self, info: TransferInfo, location: PathBuf) {
        self.send(TransportEvent::Finished { info, location });
    }

    /// The transfer ended; `error` is `None` on success
    pub fn completed(
        &self,
        info: TransferInfo,
        status_code: Option<u16>,
        error: Option<TransportError>,
    ) {
        self.send(TransportEvent::Completed {
            info,
            status_code,
            error,
        });
    }

    /// The whole channel became invalid
    pub fn invalidated(&self, reason: Option<String>) {
        self.send(TransportEvent::Invalidated { reason });
    }

    fn send(&self, event: TransportEvent) {
        match self.tx.upgrade() {
            Some(tx) => {
                // A closed channel means the session is shutting down
                tx.send(Command::Transport {
                    generation: self.generation,
                    event,
                })
                .ok();
            }
            None => {
                tracing::debug!(
                    generation = self.generation,
                    "session gone, dropping transport callback"
                );
            }
        }
    }
}
