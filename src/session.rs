//! Scan lifecycle state machine.
//!
//! At most one scan runs per [`ScanSession`]. The session tracks where that
//! scan is in its lifecycle and owns the cancellation token the engines poll:
//!
//! ```text
//! Idle -> Scanning -> Complete | Cancelled | Error -> Idle (acknowledge)
//!             \-> Cancelling (cancel requested, engines still draining)
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::error::ScanError;
use crate::media::MediaItem;
use crate::progress::ProgressCallback;
use crate::repository::{ScanMode, ScanReport, ScanRepository};
use crate::signal::CancellationToken;

/// Where the current scan is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanState {
    /// No scan has been started, or the last outcome was acknowledged
    #[default]
    Idle,
    /// Engines are running
    Scanning,
    /// Cancellation requested, engines stopping at the next chunk boundary
    Cancelling,
    /// Finished and the snapshot was saved
    Complete,
    /// Stopped early, nothing saved
    Cancelled,
    /// Failed
    Error,
}

impl ScanState {
    /// Whether a scan is still running.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Scanning | Self::Cancelling)
    }

    /// Terminal state for a report.
    #[must_use]
    pub fn from_report(report: &ScanReport) -> Self {
        match report {
            ScanReport::Complete { .. } => Self::Complete,
            ScanReport::Cancelled { .. } => Self::Cancelled,
            ScanReport::Failed { .. } => Self::Error,
        }
    }
}

/// Guards a single in-flight scan.
#[derive(Debug, Default)]
pub struct ScanSession {
    state: Mutex<ScanState>,
    token: CancellationToken,
}

impl ScanSession {
    /// Create an idle session with its own cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an idle session driven by an existing token, such as the
    /// Ctrl+C token from [`crate::signal::install_handler`].
    #[must_use]
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            state: Mutex::new(ScanState::Idle),
            token,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScanState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ScanState {
        let state = *self.lock();
        if state == ScanState::Scanning && self.token.is_cancelled() {
            ScanState::Cancelling
        } else {
            state
        }
    }

    /// The token engines poll for this session.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Move to `Scanning`.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::AlreadyRunning`] unless the session is idle.
    pub fn begin(&self) -> Result<(), ScanError> {
        let mut state = self.lock();
        if *state != ScanState::Idle {
            return Err(ScanError::AlreadyRunning);
        }
        self.token.reset();
        *state = ScanState::Scanning;
        log::debug!("Scan session started");
        Ok(())
    }

    /// Request cancellation of the running scan.
    ///
    /// Has no effect unless a scan is running.
    pub fn cancel(&self) {
        if *self.lock() == ScanState::Scanning {
            log::info!("Cancellation requested");
            self.token.cancel();
        }
    }

    /// Record the terminal state of the running scan.
    pub fn finish(&self, report: &ScanReport) {
        let mut state = self.lock();
        *state = ScanState::from_report(report);
        log::debug!("Scan session finished: {:?}", *state);
    }

    /// Return to `Idle` after a terminal state was observed.
    ///
    /// Returns `false` while a scan is still running.
    pub fn acknowledge(&self) -> bool {
        let mut state = self.lock();
        if state.is_active() {
            return false;
        }
        *state = ScanState::Idle;
        true
    }

    /// Run a scan on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::AlreadyRunning`] if another scan holds the session.
    pub fn run(
        &self,
        repository: &ScanRepository,
        items: &[MediaItem],
        mode: ScanMode,
        progress: Option<Arc<dyn ProgressCallback>>,
    ) -> Result<ScanReport, ScanError> {
        self.begin()?;
        let report = repository.run_scan(items, mode, progress, &self.token);
        self.finish(&report);
        Ok(report)
    }

    /// Run a scan on a background thread.
    ///
    /// The session is claimed before the thread starts, so a second call
    /// fails immediately with [`ScanError::AlreadyRunning`].
    pub fn spawn(
        self: Arc<Self>,
        repository: Arc<ScanRepository>,
        items: Vec<MediaItem>,
        mode: ScanMode,
        progress: Option<Arc<dyn ProgressCallback>>,
    ) -> Result<JoinHandle<ScanReport>, ScanError> {
        self.begin()?;
        Ok(std::thread::spawn(move || {
            let report = repository.run_scan(&items, mode, progress, &self.token);
            self.finish(&report);
            report
        }))
    }
}
