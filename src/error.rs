//! Error types for keyscope
//!
//! Provides a unified error type for all operations, plus a coarse
//! [`ErrorKind`] so callers can decide between retrying, extending a bound,
//! or giving up.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using KeyscopeError
pub type Result<T> = std::result::Result<T, KeyscopeError>;

/// Unified error type for keyscope operations
#[derive(Debug, Error)]
pub enum KeyscopeError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Fetch Errors
    // -------------------------------------------------------------------------
    #[error("Fetch of {locator} failed: {reason}")]
    Fetch { locator: String, reason: String },

    // -------------------------------------------------------------------------
    // Extraction Errors
    // -------------------------------------------------------------------------
    #[error("Failed to spawn extractor for {label}: {source}")]
    Spawn {
        label: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Extractor for {label} exited with {status}")]
    ProcessFailure { label: String, status: String },

    #[error("Sort of {} failed: {source}", path.display())]
    Sort {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Stage Control Errors
    // -------------------------------------------------------------------------
    #[error("{stage} stage timed out after {elapsed:?}")]
    Timeout { stage: String, elapsed: Duration },

    #[error("{0} stage was cancelled")]
    Cancelled(String),

    #[error("Another stage is already running for run {0}")]
    StageBusy(String),

    #[error("Cannot start {stage}: {reason}")]
    StagePrecondition { stage: String, reason: String },

    // -------------------------------------------------------------------------
    // Index / Query Errors
    // -------------------------------------------------------------------------
    #[error("Prefix not found: {0}")]
    PrefixNotFound(String),

    #[error("Index not built for {0}")]
    IndexNotReady(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    // -------------------------------------------------------------------------
    // Registry Errors
    // -------------------------------------------------------------------------
    #[error("Run not found: {0}")]
    RunNotFound(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse failure classes exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or file trouble; retrying the stage is reasonable
    TransientIo,
    /// The extraction tool could not run or exited unsuccessfully
    ProcessFailure,
    /// A stage exceeded its bound
    Timeout,
    /// A run or prefix does not exist
    NotFound,
    /// Malformed input or a broken construction assertion; fatal to the run
    InvariantViolation,
    /// The caller asked for something the current state does not allow
    Usage,
}

impl KeyscopeError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeyscopeError::Io(_) | KeyscopeError::Fetch { .. } | KeyscopeError::Sort { .. } => {
                ErrorKind::TransientIo
            }
            KeyscopeError::Spawn { .. } | KeyscopeError::ProcessFailure { .. } => {
                ErrorKind::ProcessFailure
            }
            KeyscopeError::Timeout { .. } | KeyscopeError::Cancelled(_) => ErrorKind::Timeout,
            KeyscopeError::PrefixNotFound(_) | KeyscopeError::RunNotFound(_) => {
                ErrorKind::NotFound
            }
            KeyscopeError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            KeyscopeError::StageBusy(_)
            | KeyscopeError::StagePrecondition { .. }
            | KeyscopeError::IndexNotReady(_)
            | KeyscopeError::Config(_) => ErrorKind::Usage,
        }
    }

    /// True when re-running the failed stage may succeed without changes
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientIo | ErrorKind::Timeout)
    }
}
