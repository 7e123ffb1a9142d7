//! Reading the protected file into a [`PropertyStore`].

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::shell::{CommandChannel, PrivilegedCommand};
use crate::store::{ParseOptions, PropertyStore};
use log::{error, info, warn};
use std::fs::OpenOptions;
use std::io::ErrorKind as IoErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Creation mode of the staged copy.
const STAGED_MODE: u32 = 0o600;

/// Loads a property file, staging a privileged copy when the file cannot be
/// read directly.
pub struct LoadTransaction<'a> {
    channel: &'a dyn CommandChannel,
    config: &'a StoreConfig,
    target: PathBuf,
}

impl<'a> LoadTransaction<'a> {
    pub fn new(channel: &'a dyn CommandChannel, config: &'a StoreConfig, target: &Path) -> Self {
        Self {
            channel,
            config,
            target: target.to_path_buf(),
        }
    }

    /// Where the privileged copy of the target is staged.
    pub fn staging_path(&self) -> PathBuf {
        let name = self
            .target
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("staged.prop"));
        self.config.load_staging_dir().join(name)
    }

    /// Run the transaction.
    ///
    /// On success `store` is replaced by the file content with its modified
    /// flag cleared, and a summary is returned. On failure `store` is left
    /// untouched.
    pub fn run(&self, store: &mut PropertyStore) -> Result<String> {
        info!("loading {}", self.target.display());
        match self.read() {
            Ok(loaded) => {
                let count = loaded.len();
                store.replace_with(loaded);
                store.set_modified(false);
                let summary = format!("Loaded {} properties from {}", count, self.target.display());
                info!("{}", summary);
                Ok(summary)
            }
            Err(e) => {
                error!("load {} failed: {}", self.target.display(), e);
                Err(e)
            }
        }
    }

    fn options(&self) -> ParseOptions {
        ParseOptions {
            preserve_comments: self.config.preserve_comments,
        }
    }

    fn read(&self) -> Result<PropertyStore> {
        match std::fs::metadata(&self.target) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(Error::NotFound(self.target.clone())),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(Error::NotFound(self.target.clone()))
            }
            // An unsearchable parent still allows a privileged read.
            Err(e) if e.kind() == IoErrorKind::PermissionDenied => {
                return self.read_staged();
            }
            Err(e) => return Err(Error::Io(e)),
        }

        match PropertyStore::load_from(&self.target, self.options()) {
            Err(Error::Io(e)) if e.kind() == IoErrorKind::PermissionDenied => self.read_staged(),
            other => other,
        }
    }

    fn read_staged(&self) -> Result<PropertyStore> {
        info!("{} is not directly readable, staging a copy", self.target.display());
        if !self.channel.has_root_access() {
            return Err(Error::no_root());
        }

        let staged = self.stage()?;
        PropertyStore::load_from(&staged, self.options())
    }

    fn stage(&self) -> Result<PathBuf> {
        self.config.prepare_data_dir()?;
        let staged = self.staging_path();
        if let Err(e) = std::fs::remove_file(&staged) {
            if e.kind() != IoErrorKind::NotFound {
                // A root-owned leftover can only be removed with privileges.
                self.channel.run(&PrivilegedCommand::Remove {
                    path: staged.clone(),
                });
            }
        }
        // Owned by this user, so the copy stays readable without privileges.
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(STAGED_MODE)
            .open(&staged)?;

        let copied = self.channel.run(&PrivilegedCommand::Copy {
            from: self.target.clone(),
            to: staged.clone(),
        });
        if !copied {
            let _ = std::fs::remove_file(&staged);
            return Err(Error::StagingFailed(self.target.clone()));
        }

        let chmod = PrivilegedCommand::Chmod {
            path: staged.clone(),
            mode: self.config.file_mode.clone(),
        };
        if !self.channel.run(&chmod) {
            warn!("unable to chmod {}", staged.display());
        }
        if let Some(label) = &self.config.access_label {
            let chcon = PrivilegedCommand::ChangeLabel {
                path: staged.clone(),
                label: label.clone(),
            };
            if !self.channel.run(&chcon) {
                warn!("unable to label {} as {}", staged.display(), label);
            }
        }

        Ok(staged)
    }
}
