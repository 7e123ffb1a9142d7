//! Putting a backup back in place.

use super::{make_writable, path_exists};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::shell::{CommandChannel, PrivilegedCommand};
use crate::store::PropertyStore;
use log::{error, info};
use std::path::{Path, PathBuf};

/// Moves `<destination><suffix>` back over the destination.
pub struct RestoreTransaction<'a> {
    channel: &'a dyn CommandChannel,
    config: &'a StoreConfig,
    destination: PathBuf,
}

impl<'a> RestoreTransaction<'a> {
    pub fn new(
        channel: &'a dyn CommandChannel,
        config: &'a StoreConfig,
        destination: &Path,
    ) -> Self {
        Self {
            channel,
            config,
            destination: destination.to_path_buf(),
        }
    }

    /// Run the transaction.
    ///
    /// On success the modified flag of `store` is cleared. Its content is
    /// stale at that point; reload before editing again.
    pub fn run(&self, store: Option<&mut PropertyStore>) -> Result<String> {
        let backup = self.config.backup_path(&self.destination);
        info!("restoring {} from {}", self.destination.display(), backup.display());

        let result = self.restore(&backup);
        match &result {
            Ok(summary) => {
                if let Some(store) = store {
                    store.set_modified(false);
                }
                info!("{}", summary);
            }
            Err(e) => error!("restore {} failed: {}", self.destination.display(), e),
        }
        result
    }

    fn restore(&self, backup: &Path) -> Result<String> {
        // Unknown existence falls through to the root check.
        if path_exists(self.channel, backup) == Some(false) {
            return Err(Error::NoBackup(backup.to_path_buf()));
        }
        if !self.channel.has_root_access() {
            return Err(Error::no_root());
        }

        let _read_only = make_writable(self.channel, self.config, &self.destination)?;

        let moved = self.channel.run(&PrivilegedCommand::Move {
            from: backup.to_path_buf(),
            to: self.destination.clone(),
        });
        if !moved {
            return Err(Error::SwapFailed(self.destination.clone()));
        }

        Ok(format!(
            "Restored {} from {}",
            self.destination.display(),
            backup.display()
        ))
    }
}

/// Delete the backup of `destination` so the next save can make a new one.
///
/// Only ever done on explicit request; saves never remove a backup.
pub fn discard_backup(
    channel: &dyn CommandChannel,
    config: &StoreConfig,
    destination: &Path,
) -> Result<String> {
    let backup = config.backup_path(destination);
    if path_exists(channel, &backup) == Some(false) {
        return Err(Error::NoBackup(backup));
    }
    if !channel.has_root_access() {
        return Err(Error::no_root());
    }

    let _read_only = make_writable(channel, config, destination)?;

    if !channel.run(&PrivilegedCommand::Remove {
        path: backup.clone(),
    }) {
        return Err(Error::BackupFailed(format!(
            "unable to remove {}",
            backup.display()
        )));
    }

    info!("discarded backup {}", backup.display());
    Ok(format!("Removed backup {}", backup.display()))
}
