//! Error types for the sc64deck core crate.
//!
//! Every failed operation carries an [`ErrorKind`] from a closed set plus a
//! diagnostic message. Callers key their user-facing wording on the kind;
//! the message is for logs and detail views.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of failure categories reported for remote operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    DeviceNotConnected,
    DirectoryNotEmpty,
    Timeout,
    ExecutableUnavailable,
    InvalidPath,
    ParseError,
    Unknown,
}

impl ErrorKind {
    /// Stable, human-readable description of the failure category.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::NotFound => "File or directory not found",
            Self::PermissionDenied => "Permission denied",
            Self::DeviceNotConnected => "SC64 device not connected",
            Self::DirectoryNotEmpty => "Directory is not empty",
            Self::Timeout => "Command timed out",
            Self::ExecutableUnavailable => "sc64deployer executable unavailable",
            Self::InvalidPath => "Invalid path",
            Self::ParseError => "Unexpected tool output",
            Self::Unknown => "Operation failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A failed remote operation: the category and a diagnostic string.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct OperationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl OperationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidPath, message)
    }
}

/// Error returned when a size token from the tool cannot be interpreted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid size token '{token}': {reason}")]
pub struct ParseError {
    pub token: String,
    pub reason: &'static str,
}

impl From<ParseError> for OperationError {
    fn from(err: ParseError) -> Self {
        OperationError::new(ErrorKind::ParseError, err.to_string())
    }
}

/// Errors raised while accepting a request into the scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// A caller-supplied id is still queued or running.
    #[error("Operation id already in flight: {0}")]
    DuplicateId(String),

    /// The scheduler has been shut down and accepts no more work.
    #[error("Scheduler has been shut down")]
    ShutDown,
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid values, missing fields or unusable executable path.
    #[error("Config error: {0}")]
    Config(String),

    /// A low-level I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid JSON for a
    /// [`DeployerConfig`](crate::config::DeployerConfig).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
