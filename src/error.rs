//! Scan errors, exit codes and structured error output.

use serde::Serialize;

use crate::cache::CacheError;

/// Fatal errors of a scan.
///
/// Per-file read and decode failures are not errors at this level; they end
/// up in the unscannable list. Cancellation is not an error either.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// The cache store failed; the scan cannot continue.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A scan is already running or its outcome has not been acknowledged.
    #[error("A scan is already in progress")]
    AlreadyRunning,

    /// The hashing worker pool could not be created.
    #[error("Failed to build hashing worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Exit codes for the mediadupe binary.
///
/// - 0: Success (completed normally, groups found)
/// - 1: General error (unexpected failure)
/// - 2: No groups found (completed normally)
/// - 3: Partial success (completed, some files could not be scanned)
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: Scan completed and groups were found.
    Success = 0,
    /// General error: An unexpected error occurred.
    GeneralError = 1,
    /// No duplicates: Scan completed but no groups were found.
    NoDuplicates = 2,
    /// Partial success: Scan completed but some files were unscannable.
    PartialSuccess = 3,
    /// Interrupted: Scan was cancelled by the user.
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "MD000",
            Self::GeneralError => "MD001",
            Self::NoDuplicates => "MD002",
            Self::PartialSuccess => "MD003",
            Self::Interrupted => "MD130",
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "MD001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message
    pub message: String,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            // Include the whole context chain.
            message: format!("{:#}", err),
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
