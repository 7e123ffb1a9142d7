//! Error types for the property store.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for property store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can terminate a load, save or restore transaction.
///
/// Every failure is resolved to exactly one variant at the point where it is
/// detected. Shell channel failures are reported as booleans by the channel
/// itself and mapped to one of these by the transaction that issued them.
#[derive(Error, Debug)]
pub enum Error {
    /// The property file does not exist or is not a regular file.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Superuser access is required but was not granted.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The privileged copy into the staging area failed.
    #[error("Unable to stage {0} for reading")]
    StagingFailed(PathBuf),

    /// The file content could not be decoded.
    #[error("Parse error in {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The destination path cannot be written to.
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    /// Remounting the protected partition failed.
    #[error("Unable to remount {mount_point} as {flag}")]
    MountFailed { mount_point: PathBuf, flag: String },

    /// Writing the staged copy failed.
    #[error("Unable to write staged file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A backup already exists and would be overwritten.
    #[error("Backup already exists: {0}")]
    BackupCollision(PathBuf),

    /// Creating or removing a backup failed.
    #[error("Backup failed: {0}")]
    BackupFailed(String),

    /// Copying the new content over the destination failed.
    #[error("Unable to replace {0}")]
    SwapFailed(PathBuf),

    /// No backup exists for the destination.
    #[error("No backup found: {0}")]
    NoBackup(PathBuf),

    /// A key or value that cannot be represented as a property line.
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Classification of an [`Error`], independent of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    StagingFailed,
    ParseError,
    IoError,
    InvalidDestination,
    MountFailed,
    WriteFailed,
    BackupCollision,
    BackupFailed,
    SwapFailed,
    NoBackup,
    InvalidEntry,
    Config,
}

impl ErrorKind {
    /// Whether this kind comes from an unexpected low-level condition that
    /// is worth forwarding as a diagnostic report.
    ///
    /// Privileged command failures (staging, backup, swap) and expected
    /// environmental conditions explain themselves and return `false`.
    pub fn needs_report(self) -> bool {
        matches!(
            self,
            ErrorKind::ParseError | ErrorKind::IoError | ErrorKind::WriteFailed
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Error {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::StagingFailed(_) => ErrorKind::StagingFailed,
            Error::Parse { .. } => ErrorKind::ParseError,
            Error::Io(_) => ErrorKind::IoError,
            Error::InvalidDestination(_) => ErrorKind::InvalidDestination,
            Error::MountFailed { .. } => ErrorKind::MountFailed,
            Error::WriteFailed { .. } => ErrorKind::WriteFailed,
            Error::BackupCollision(_) => ErrorKind::BackupCollision,
            Error::BackupFailed(_) => ErrorKind::BackupFailed,
            Error::SwapFailed(_) => ErrorKind::SwapFailed,
            Error::NoBackup(_) => ErrorKind::NoBackup,
            Error::InvalidEntry(_) => ErrorKind::InvalidEntry,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Shorthand for `self.kind().needs_report()`.
    pub fn needs_report(&self) -> bool {
        self.kind().needs_report()
    }

    pub(crate) fn no_root() -> Self {
        Error::PermissionDenied("superuser access is not available".to_string())
    }
}
