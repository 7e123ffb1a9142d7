//! Application-wide context.
//!
//! Owns the privileged shell, the log writer and the configuration. Created
//! once at startup and torn down explicitly with [`AppContext::shutdown`].

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::logging::{self, LogWriter};
use crate::report::DiagnosticReport;
use crate::shell::{CommandChannel, MountController, MountFlag, PrivilegedCommand, ShellChannel};
use crate::transaction::{TransactionResult, TransactionWorker};
use log::{info, warn, LevelFilter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Shared state handed to every component that needs it.
pub struct AppContext {
    config: StoreConfig,
    config_path: Option<PathBuf>,
    shell: Arc<ShellChannel>,
    log: Option<Arc<LogWriter>>,
}

impl AppContext {
    /// Build a context without installing a logger.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let shell = Arc::new(ShellChannel::new(
            config.su_path.clone(),
            Duration::from_secs(config.command_timeout_secs),
        ));
        Ok(Self {
            config,
            config_path: None,
            shell,
            log: None,
        })
    }

    /// Build a context, open the log file and install the global logger.
    ///
    /// `config_path` is where the configuration is persisted on shutdown.
    pub fn init(config: StoreConfig, config_path: Option<PathBuf>, level: LevelFilter) -> Result<Self> {
        let mut ctx = Self::new(config)?;
        ctx.config_path = config_path;
        ctx.config.prepare_data_dir()?;

        let writer = Arc::new(LogWriter::open(
            &ctx.config.log_path(),
            ctx.config.recent_log_lines,
        )?);
        if let Err(e) = logging::init(Arc::clone(&writer), level) {
            return Err(Error::Config(format!("logger already installed: {}", e)));
        }
        ctx.log = Some(writer);
        info!("prop-editor {} started", env!("CARGO_PKG_VERSION"));
        Ok(ctx)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The privileged command channel.
    pub fn channel(&self) -> &dyn CommandChannel {
        self.shell.as_ref()
    }

    /// Mount controller over the context's channel.
    pub fn mounts(&self) -> MountController<'_> {
        MountController::new(self.channel())
    }

    /// Start a transaction worker sharing the context's channel.
    pub fn spawn_worker(&self) -> Result<TransactionWorker> {
        let channel: Arc<dyn CommandChannel> = self.shell.clone();
        Ok(TransactionWorker::spawn(channel, self.config.clone())?)
    }

    /// Whether `mount_point` is currently read-write, read-only, or unknown.
    pub fn mount_state(&self, mount_point: &Path) -> Option<MountFlag> {
        let mounts = self.mounts();
        if mounts.check_mount_flags(mount_point, MountFlag::ReadWrite) {
            Some(MountFlag::ReadWrite)
        } else if mounts.check_mount_flags(mount_point, MountFlag::ReadOnly) {
            Some(MountFlag::ReadOnly)
        } else {
            None
        }
    }

    /// Reboot the device.
    pub fn reboot(&self) -> Result<()> {
        if !self.channel().has_root_access() {
            return Err(Error::no_root());
        }
        info!("rebooting");
        if self.channel().run(&PrivilegedCommand::Reboot) {
            Ok(())
        } else {
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "reboot command failed",
            )))
        }
    }

    /// Write a diagnostic report for a failed transaction.
    pub fn write_report(&self, target: &Path, result: &TransactionResult) -> Result<PathBuf> {
        let recent = self.log.as_ref().map(|l| l.recent()).unwrap_or_default();
        DiagnosticReport::new(target, result.clone(), recent).write(&self.config.logs_dir())
    }

    /// Persist the resolved escalation binary, close the shell, and drain
    /// the log file.
    pub fn shutdown(mut self) {
        if self.config.su_path.is_none() {
            self.config.su_path = self.shell.program();
        }
        if let Some(path) = &self.config_path {
            if let Err(e) = self.config.save(path) {
                warn!("unable to save configuration to {}: {}", path.display(), e);
            }
        }

        self.shell.close();
        info!("prop-editor stopped");
        if let Some(log) = self.log.take() {
            log.close();
        }
    }
}
