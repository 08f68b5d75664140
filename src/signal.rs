//! Cooperative cancellation and Ctrl+C handling.
//!
//! A [`CancellationToken`] wraps an `AtomicBool` that engines poll between
//! chunks of work. Cancelling never interrupts a file that is already being
//! hashed; the engine stops at the next chunk boundary.
//!
//! # Usage
//!
//! ```rust,no_run
//! use mediadupe::signal::install_handler;
//!
//! // Ctrl+C now cancels this token.
//! let token = install_handler().expect("Failed to install signal handler");
//!
//! if token.is_cancelled() {
//!     println!("Cancelled, stopping at the next chunk");
//! }
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Exit code for SIGINT (Ctrl+C) interruption.
/// This follows Unix convention: 128 + signal number (SIGINT = 2).
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Shared cancellation flag.
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can guard another scan.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Error type for signal handler installation.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Failed to install the Ctrl+C handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_TOKEN: OnceLock<CancellationToken> = OnceLock::new();

/// Install a Ctrl+C handler that cancels the returned token.
///
/// Calling this again returns the already-installed token, reset. If another
/// component registered a handler first, an unhooked token is returned so
/// callers can still cancel manually.
pub fn install_handler() -> Result<CancellationToken, SignalError> {
    if let Some(token) = GLOBAL_TOKEN.get() {
        token.reset();
        return Ok(token.clone());
    }

    let token = CancellationToken::new();
    let hooked = token.clone();

    match ctrlc::set_handler(move || {
        hooked.cancel();
        let _ = writeln!(std::io::stderr(), "\nInterrupted. Finishing current chunk...");
        let _ = std::io::stderr().flush();
        log::info!("Cancellation signal received");
    }) {
        Ok(()) => {
            let _ = GLOBAL_TOKEN.set(token.clone());
            Ok(token)
        }
        Err(ctrlc::Error::MultipleHandlers) => {
            log::debug!("Ctrl+C handler already registered, using unhooked token");
            let fallback = GLOBAL_TOKEN.get_or_init(CancellationToken::new);
            fallback.reset();
            Ok(fallback.clone())
        }
        Err(e) => Err(SignalError::InstallFailed(e)),
    }
}
