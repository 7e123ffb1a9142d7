//! Configuration constants and types for the property store.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::DirBuilder;
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};

/// Default property file.
pub const DEFAULT_TARGET: &str = "/system/build.prop";

/// Partition that is normally mounted read-only.
pub const SYSTEM_PARTITION: &str = "/system";

/// Suffix appended to the destination path to name its backup.
pub const BACKUP_SUFFIX: &str = ".bak";

/// Mode applied to staged and swapped files.
pub const DEFAULT_FILE_MODE: &str = "644";

/// SELinux label that lets an app sandbox read a staged copy.
pub const ANDROID_APP_DATA_LABEL: &str = "u:object_r:app_data_file:s0:c512,c768";

/// Default seconds to wait for a single privileged command.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Number of log lines kept in memory for diagnostic reports.
pub const DEFAULT_RECENT_LOG_LINES: usize = 200;

/// Configuration file name inside the data directory.
pub const CONFIG_FILENAME: &str = "config.json";

/// Log file name inside the logs directory.
pub const LOG_FILENAME: &str = "prop-editor.log";

/// Directory (under the data directory) holding logs and reports.
pub const LOGS_DIR: &str = "logs";

/// Directory (under the data directory) holding load staging copies.
pub const LOAD_STAGING_DIR: &str = "tmp";

/// Name of the data directory under the per-user data location.
pub const APP_DIR_NAME: &str = "prop-editor";

/// Mode of directories created for staging and logs: owner only.
pub const PRIVATE_DIR_MODE: u32 = 0o700;

/// Places where an `su` binary is commonly installed.
pub const SU_LOCATIONS: &[&str] = &[
    "/system/bin/su",
    "/system/xbin/su",
    "/sbin/su",
    "/su/bin/su",
    "/system/sbin/su",
    "/vendor/bin/su",
    "/data/local/xbin/su",
    "/data/local/bin/su",
    "/data/local/su",
];

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Property file to edit.
    pub target: PathBuf,

    /// Application-private, always-writable directory. Defaults to the
    /// per-user data location; must be owned by this user and not writable
    /// by anyone else.
    pub data_dir: PathBuf,

    /// Escalation binary. Resolved on first use when unset and persisted on
    /// shutdown.
    pub su_path: Option<PathBuf>,

    /// Mount point that must be remounted read-write before a swap.
    pub protected_partition: PathBuf,

    /// Suffix for backup files.
    pub backup_suffix: String,

    /// Octal mode for staged and swapped files.
    pub file_mode: String,

    /// Access-control label applied to the load staging copy.
    pub access_label: Option<String>,

    /// Seconds to wait for a single privileged command.
    pub command_timeout_secs: u64,

    /// Keep comment, blank and malformed lines when rewriting the file.
    pub preserve_comments: bool,

    /// Log file. Defaults to `<data_dir>/logs/prop-editor.log`.
    pub log_file: Option<PathBuf>,

    /// Log lines kept in memory for diagnostic reports.
    pub recent_log_lines: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            target: PathBuf::from(DEFAULT_TARGET),
            data_dir: default_data_dir(),
            su_path: None,
            protected_partition: PathBuf::from(SYSTEM_PARTITION),
            backup_suffix: BACKUP_SUFFIX.to_string(),
            file_mode: DEFAULT_FILE_MODE.to_string(),
            access_label: if cfg!(target_os = "android") {
                Some(ANDROID_APP_DATA_LABEL.to_string())
            } else {
                None
            },
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            preserve_comments: true,
            log_file: None,
            recent_log_lines: DEFAULT_RECENT_LOG_LINES,
        }
    }
}

fn default_data_dir() -> PathBuf {
    match dirs::data_local_dir() {
        Some(dir) => dir.join(APP_DIR_NAME),
        None => std::env::temp_dir().join(format!("{}-{}", APP_DIR_NAME, effective_uid())),
    }
}

fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() }
}

/// Create `dir` (and missing parents) with [`PRIVATE_DIR_MODE`] and check
/// that nobody else can plant files in it.
///
/// An existing directory must be a real directory owned by the effective
/// user and not writable by group or others.
pub fn ensure_private_dir(dir: &Path) -> Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(PRIVATE_DIR_MODE)
        .create(dir)?;

    let meta = std::fs::symlink_metadata(dir)?;
    if !meta.file_type().is_dir() {
        return Err(Error::Config(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    if meta.uid() != effective_uid() {
        return Err(Error::Config(format!(
            "{} is owned by uid {}, not by this user",
            dir.display(),
            meta.uid()
        )));
    }
    if meta.mode() & 0o022 != 0 {
        return Err(Error::Config(format!(
            "{} is writable by other users (mode {:o})",
            dir.display(),
            meta.mode() & 0o7777
        )));
    }
    Ok(())
}

impl StoreConfig {
    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        default_data_dir().join(CONFIG_FILENAME)
    }

    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: StoreConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as pretty JSON, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.target.is_absolute() {
            return Err(Error::Config(format!(
                "Target must be an absolute path: {}",
                self.target.display()
            )));
        }
        if self.backup_suffix.is_empty() || self.backup_suffix.contains('/') {
            return Err(Error::Config(
                "Backup suffix must be non-empty and contain no '/'".to_string(),
            ));
        }
        self.file_mode_bits()?;
        if self.command_timeout_secs == 0 {
            return Err(Error::Config(
                "Command timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured file mode as permission bits.
    pub fn file_mode_bits(&self) -> Result<u32> {
        match u32::from_str_radix(&self.file_mode, 8) {
            Ok(bits) if bits <= 0o7777 => Ok(bits),
            _ => Err(Error::Config(format!(
                "File mode must be an octal permission value: {}",
                self.file_mode
            ))),
        }
    }

    /// Backup path for a destination: `<destination><suffix>`.
    pub fn backup_path(&self, destination: &Path) -> PathBuf {
        let mut name = destination.as_os_str().to_owned();
        name.push(&self.backup_suffix);
        PathBuf::from(name)
    }

    /// Whether a destination lives on the protected partition.
    pub fn is_protected(&self, destination: &Path) -> bool {
        destination.starts_with(&self.protected_partition)
    }

    /// Create the data directory and the load staging directory, both
    /// private to this user.
    pub fn prepare_data_dir(&self) -> Result<()> {
        ensure_private_dir(&self.data_dir)?;
        ensure_private_dir(&self.load_staging_dir())
    }

    /// Directory holding the load staging copy.
    pub fn load_staging_dir(&self) -> PathBuf {
        self.data_dir.join(LOAD_STAGING_DIR)
    }

    /// Directory holding logs and diagnostic reports.
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join(LOGS_DIR)
    }

    /// Effective log file path.
    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.logs_dir().join(LOG_FILENAME))
    }
}
