//! Load, save and restore transactions.
//!
//! Each transaction runs to a terminal state and resolves every failure to
//! a single [`Error`]. Callers receive a [`TransactionResult`]: an outcome,
//! a human-readable message, and the error kind when it failed.

mod load;
mod restore;
mod save;
mod worker;

pub use load::LoadTransaction;
pub use restore::{discard_backup, RestoreTransaction};
pub use save::SaveTransaction;
pub use worker::{Job, JobId, TransactionKind, TransactionWorker, WorkerEvent};

use crate::config::StoreConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::shell::{CommandChannel, MountController, MountFlag, PrivilegedCommand};
use log::{debug, warn};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

/// Terminal state of a transaction, as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Ok,
    /// Expected, self-explanatory failure.
    Error,
    /// Unexpected failure the user may want to forward as a report.
    ErrorNeedsReport,
}

/// Result handed back to the caller of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionResult {
    pub outcome: Outcome,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl TransactionResult {
    /// A successful result.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Ok,
            message: message.into(),
            kind: None,
        }
    }

    /// A failed result classified from an error.
    pub fn from_error(error: &Error) -> Self {
        let kind = error.kind();
        Self {
            outcome: if kind.needs_report() {
                Outcome::ErrorNeedsReport
            } else {
                Outcome::Error
            },
            message: error.to_string(),
            kind: Some(kind),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == Outcome::Ok
    }
}

impl From<Result<String>> for TransactionResult {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(message) => Self::ok(message),
            Err(e) => Self::from_error(&e),
        }
    }
}

/// Remounts the protected partition read-only when dropped.
///
/// Runs on every exit path of the step sequence it guards. Its own failure
/// is logged and never changes the transaction's result.
pub(crate) struct ReadOnlyGuard<'a> {
    mounts: MountController<'a>,
    mount_point: PathBuf,
}

impl Drop for ReadOnlyGuard<'_> {
    fn drop(&mut self) {
        if !self.mounts.remount(&self.mount_point, MountFlag::ReadOnly) {
            warn!(
                "{} could not be restored to read-only",
                self.mount_point.display()
            );
        }
    }
}

/// Make `destination` writable if it lives on the protected partition.
///
/// Returns a guard only when this call remounted the partition.
pub(crate) fn make_writable<'a>(
    channel: &'a dyn CommandChannel,
    config: &StoreConfig,
    destination: &Path,
) -> Result<Option<ReadOnlyGuard<'a>>> {
    if !config.is_protected(destination) {
        return Ok(None);
    }

    let mounts = MountController::new(channel);
    let partition = &config.protected_partition;
    if mounts.check_mount_flags(partition, MountFlag::ReadWrite) {
        debug!("{} already read-write", partition.display());
        return Ok(None);
    }

    if !mounts.remount(partition, MountFlag::ReadWrite) {
        return Err(Error::MountFailed {
            mount_point: partition.clone(),
            flag: MountFlag::ReadWrite.to_string(),
        });
    }

    Ok(Some(ReadOnlyGuard {
        mounts,
        mount_point: partition.clone(),
    }))
}

/// Whether anything (including a dangling symlink) exists at `path`.
///
/// Falls back to a privileged check when the parent directory cannot be
/// searched. `None` means the answer is unknown.
pub(crate) fn path_exists(channel: &dyn CommandChannel, path: &Path) -> Option<bool> {
    match std::fs::symlink_metadata(path) {
        Ok(_) => return Some(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Some(false),
        Err(e) => debug!("cannot stat {}: {}, asking the shell", path.display(), e),
    }

    if !channel.has_root_access() {
        return None;
    }
    let output = channel.execute(
        &PrivilegedCommand::Exists {
            path: path.to_path_buf(),
        }
        .to_shell(),
    );
    match output.exit_code {
        Some(0) => Some(true),
        Some(1) => Some(false),
        _ => None,
    }
}
