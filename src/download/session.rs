//! Per-session state shared between the transfer task and its observers.
//!
//! The transfer task is the only writer. Counters are atomics, the lifecycle
//! is a `watch` channel, so progress readers on any thread never block it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::DownloadError;
use super::probe::ResourceSize;

/// Identifier of one session within a [`Downloader`](super::Downloader).
pub type SessionId = u64;

/// Lifecycle of a session. The last three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, not yet probing.
    Pending,
    /// Probing or transferring.
    Running,
    /// Every byte written to the sink.
    Finished,
    /// Stopped by an error.
    Failed,
    /// Stopped on request.
    Cancelled,
}

impl SessionState {
    /// True once the session can no longer change.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }
}

/// Point-in-time view of a session, safe to hand to a UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub id: SessionId,
    pub url: String,
    pub target: String,
    pub state: SessionState,
    /// Probed size; `None` until probed or when unknown.
    pub total_size: Option<u64>,
    pub downloaded: u64,
    pub started: bool,
    pub finished: bool,
    pub failed: bool,
    pub cancelled: bool,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl Progress {
    /// Completed fraction in `0.0..=1.0`, when the size is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        match self.total_size {
            Some(total) if total > 0 => Some((self.downloaded as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    /// All bytes written.
    Finished { bytes: u64 },
    /// The transfer failed; the error says why.
    Failed(Arc<DownloadError>),
    /// The session was cancelled before it finished.
    Cancelled,
}

impl SessionOutcome {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}

#[derive(Debug)]
pub(crate) struct SessionShared {
    id: SessionId,
    url: String,
    target: String,
    created: Instant,
    total_size: AtomicU64,
    size_known: AtomicBool,
    downloaded: AtomicU64,
    state: watch::Sender<SessionState>,
    error: Mutex<Option<Arc<DownloadError>>>,
    cancel: CancellationToken,
}

impl SessionShared {
    pub(crate) fn new(id: SessionId, url: String, target: String, cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(SessionState::Pending);
        Self {
            id,
            url,
            target,
            created: Instant::now(),
            total_size: AtomicU64::new(0),
            size_known: AtomicBool::new(false),
            downloaded: AtomicU64::new(0),
            state,
            error: Mutex::new(None),
            cancel,
        }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn set_total(&self, size: ResourceSize) {
        if let ResourceSize::Known(total) = size {
            self.total_size.store(total, Ordering::Relaxed);
            self.size_known.store(true, Ordering::Release);
        }
    }

    pub(crate) fn add_downloaded(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    /// Moves to `next` unless already terminal. Returns whether it moved.
    pub(crate) fn transition(&self, next: SessionState) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        })
    }

    pub(crate) fn fail(&self, error: DownloadError) -> Arc<DownloadError> {
        let error = Arc::new(error);
        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&error));
        self.transition(SessionState::Failed);
        error
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn error(&self) -> Option<Arc<DownloadError>> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn outcome(&self) -> Option<SessionOutcome> {
        match self.state() {
            SessionState::Finished => Some(SessionOutcome::Finished {
                bytes: self.downloaded(),
            }),
            SessionState::Failed => Some(
                self.error()
                    .map_or(SessionOutcome::Cancelled, SessionOutcome::Failed),
            ),
            SessionState::Cancelled => Some(SessionOutcome::Cancelled),
            SessionState::Pending | SessionState::Running => None,
        }
    }

    fn progress(&self) -> Progress {
        let state = self.state();
        let elapsed_ms = u64::try_from(self.created.elapsed().as_millis()).unwrap_or(u64::MAX);
        Progress {
            id: self.id,
            url: self.url.clone(),
            target: self.target.clone(),
            state,
            total_size: self
                .size_known
                .load(Ordering::Acquire)
                .then(|| self.total_size.load(Ordering::Relaxed)),
            downloaded: self.downloaded(),
            started: state != SessionState::Pending,
            finished: state == SessionState::Finished,
            failed: state == SessionState::Failed,
            cancelled: state == SessionState::Cancelled,
            error: self.error().map(|e| e.to_string()),
            elapsed_ms,
        }
    }
}

/// Caller's handle to one session. Cheap to clone; every clone observes the
/// same session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
        Self { shared }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Current progress snapshot.
    #[must_use]
    pub fn progress(&self) -> Progress {
        self.shared.progress()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Receiver that is notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Requests cancellation. A no-op once the session has ended.
    pub fn cancel(&self) {
        if self.state().is_terminal() {
            debug!(session = self.id(), "cancel ignored; session already ended");
            return;
        }
        debug!(session = self.id(), url = %self.shared.url, "cancelling session");
        self.shared.cancel.cancel();
    }

    /// Waits until the session ends.
    pub async fn wait(&self) -> SessionOutcome {
        let mut receiver = self.subscribe();
        loop {
            if let Some(outcome) = self.shared.outcome() {
                return outcome;
            }
            if receiver.changed().await.is_err() {
                return self.shared.outcome().unwrap_or(SessionOutcome::Cancelled);
            }
        }
    }
}
