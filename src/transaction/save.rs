//! Committing a [`PropertyStore`] back to the protected file.
//!
//! ```text
//! VALIDATE -> (MOUNT_RW)? -> WRITE_STAGED -> BACKUP_ORIGINAL -> SWAP -> (MOUNT_RO)?
//! ```
//!
//! The read-only remount runs whenever the read-write remount happened,
//! whatever the outcome of the steps in between.

use super::{make_writable, path_exists};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::shell::{CommandChannel, PrivilegedCommand};
use crate::store::PropertyStore;
use log::{error, info, warn};
use std::fs::Permissions;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Length of the digest prefix shown in the save summary.
const DIGEST_PREFIX: usize = 12;

/// Writes a store to its destination through a staged copy, keeping a
/// backup of the previous file.
pub struct SaveTransaction<'a> {
    channel: &'a dyn CommandChannel,
    config: &'a StoreConfig,
    destination: PathBuf,
}

impl<'a> SaveTransaction<'a> {
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

    /// Where the new content is written before the swap.
    pub fn staging_path(&self) -> Option<PathBuf> {
        self.destination
            .file_name()
            .map(|name| self.config.data_dir.join(name))
    }

    /// Run the transaction. The store's modified flag is cleared only when
    /// the new content is in place.
    pub fn run(&self, store: &mut PropertyStore) -> Result<String> {
        info!("saving {}", self.destination.display());
        let result = self.save(store);
        match &result {
            Ok(summary) => info!("{}", summary),
            Err(e) => error!("save {} failed: {}", self.destination.display(), e),
        }
        result
    }

    fn save(&self, store: &mut PropertyStore) -> Result<String> {
        let destination = &self.destination;
        let (parent, staged) = match (destination.parent(), self.staging_path()) {
            (Some(parent), Some(staged)) if !parent.as_os_str().is_empty() => (parent, staged),
            _ => {
                return Err(Error::InvalidDestination(format!(
                    "{} has no parent directory",
                    destination.display()
                )))
            }
        };
        if !self.channel.has_root_access() {
            return Err(Error::no_root());
        }

        let _read_only = make_writable(self.channel, self.config, destination)?;

        self.write_staged(store, &staged)?;
        self.backup_original()?;
        self.swap(parent, &staged)?;

        store.set_modified(false);
        let digest = store.digest();
        Ok(format!(
            "Saved {} properties to {} (sha256 {})",
            store.len(),
            destination.display(),
            &digest[..DIGEST_PREFIX]
        ))
    }

    fn write_staged(&self, store: &PropertyStore, staged: &Path) -> Result<()> {
        let write_failed = |source| Error::WriteFailed {
            path: staged.to_path_buf(),
            source,
        };

        self.config.prepare_data_dir()?;
        match std::fs::remove_file(staged) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(write_failed(e)),
            _ => {}
        }
        let mode = self.config.file_mode_bits()?;
        store.write_new(staged, mode).map_err(write_failed)?;
        // The umask may have narrowed the creation mode.
        std::fs::set_permissions(staged, Permissions::from_mode(mode)).map_err(write_failed)?;
        Ok(())
    }

    fn backup_original(&self) -> Result<()> {
        let destination = &self.destination;
        let unknown = |path: &Path| {
            Error::BackupFailed(format!("unable to tell whether {} exists", path.display()))
        };

        match path_exists(self.channel, destination) {
            Some(true) => {}
            Some(false) => {
                info!("{} does not exist yet, no backup needed", destination.display());
                return Ok(());
            }
            None => return Err(unknown(destination)),
        }

        let backup = self.config.backup_path(destination);
        match path_exists(self.channel, &backup) {
            Some(false) => {}
            Some(true) => return Err(Error::BackupCollision(backup)),
            None => return Err(unknown(&backup)),
        }

        let moved = self.channel.run(&PrivilegedCommand::MoveNoClobber {
            from: destination.clone(),
            to: backup.clone(),
        });
        if !moved {
            return Err(Error::BackupFailed(format!(
                "unable to move {} to {}",
                destination.display(),
                backup.display()
            )));
        }

        // `mv -n` succeeds without moving when a backup appeared meanwhile.
        match path_exists(self.channel, destination) {
            Some(false) => {}
            Some(true) => return Err(Error::BackupCollision(backup)),
            None => return Err(unknown(destination)),
        }
        info!("backed up {} to {}", destination.display(), backup.display());
        Ok(())
    }

    fn swap(&self, parent: &Path, staged: &Path) -> Result<()> {
        let destination = &self.destination;
        if !parent.is_dir()
            && !self.channel.run(&PrivilegedCommand::MakeDir {
                path: parent.to_path_buf(),
            })
        {
            return Err(Error::InvalidDestination(format!(
                "unable to create {}",
                parent.display()
            )));
        }

        let copied = self.channel.run(&PrivilegedCommand::Copy {
            from: staged.to_path_buf(),
            to: destination.clone(),
        });
        if !copied {
            return Err(Error::SwapFailed(destination.clone()));
        }

        let chmod = PrivilegedCommand::Chmod {
            path: destination.clone(),
            mode: self.config.file_mode.clone(),
        };
        if !self.channel.run(&chmod) {
            warn!("unable to chmod {}", destination.display());
        }
        Ok(())
    }
}
