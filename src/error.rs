//! Structured error handling and exit codes.

use serde::Serialize;

use crate::session::{BackupError, HostError, RestoreError};
use crate::signal::SignalError;
use crate::store::StoreError;

/// Exit codes for the sessionvault binary.
///
/// - 0: Success
/// - 1: General error
/// - 2: No stored session (`restore` found nothing to restore)
/// - 130: Interrupted by user (Ctrl+C) before the command finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: the command completed.
    Success = 0,
    /// General error: an unexpected error occurred.
    GeneralError = 1,
    /// Not found: the store holds no session under the requested id.
    NotFound = 2,
    /// Interrupted: stopped by Ctrl+C.
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
            Self::Success => "SV000",
            Self::GeneralError => "SV001",
            Self::NotFound => "SV002",
            Self::Interrupted => "SV130",
        }
    }

    /// Pick the exit code for a failed command.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(SignalError::Interrupted) = cause.downcast_ref::<SignalError>() {
                return Self::Interrupted;
            }
            // A stored session that vanished mid-restore is an unavailable
            // store, not an absent session.
            if is_store_unavailable(cause) {
                return Self::GeneralError;
            }
            if cause
                .downcast_ref::<StoreError>()
                .is_some_and(StoreError::is_not_found)
            {
                return Self::NotFound;
            }
        }
        Self::GeneralError
    }
}

fn is_store_unavailable(cause: &(dyn std::error::Error + 'static)) -> bool {
    let restore = match cause.downcast_ref::<HostError>() {
        Some(HostError::Restore(e)) => Some(e),
        _ => cause.downcast_ref::<RestoreError>(),
    };
    matches!(restore, Some(RestoreError::StoreUnavailable(_)))
}

/// Coarse error category for JSON reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Restore,
    Backup,
    Store,
    Config,
    Other,
}

impl ErrorKind {
    fn classify(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.is::<RestoreError>() {
                return Self::Restore;
            }
            if cause.is::<BackupError>() {
                return Self::Backup;
            }
            if cause.is::<StoreError>() {
                return Self::Store;
            }
            if cause.is::<crate::config::ConfigError>() {
                return Self::Config;
            }
            if let Some(host) = cause.downcast_ref::<HostError>() {
                return match host {
                    HostError::Restore(_) => Self::Restore,
                    HostError::Backup(_) => Self::Backup,
                    HostError::Store(_) => Self::Store,
                    HostError::Io { .. } => Self::Other,
                };
            }
        }
        Self::Other
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "SV001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Error category
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
    /// Underlying causes, outermost first
    pub causes: Vec<String>,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            kind: ErrorKind::classify(err),
            message: err.to_string(),
            causes: err.chain().skip(1).map(ToString::to_string).collect(),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
