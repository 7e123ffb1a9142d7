//! Shared helpers for integration tests.
//!
//! `FakeChannel` stands in for the superuser shell: commands run through
//! `sh -c` as the current user, every command line is recorded, and
//! individual commands can be scripted by prefix.

#![allow(dead_code)]

use parking_lot::Mutex;
use prop_editor::shell::{CommandChannel, CommandOutput, PrivilegedCommand};
use prop_editor::StoreConfig;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

pub struct FakeChannel {
    root: AtomicBool,
    commands: Mutex<Vec<String>>,
    scripted: Mutex<Vec<(String, CommandOutput)>>,
    locked: Mutex<Vec<(PathBuf, u32)>>,
}

impl FakeChannel {
    pub fn new(root: bool) -> Self {
        Self {
            root: AtomicBool::new(root),
            commands: Mutex::new(Vec::new()),
            scripted: Mutex::new(Vec::new()),
            locked: Mutex::new(Vec::new()),
        }
    }

    /// Answer every command starting with `prefix` with `output` instead of
    /// running it. Earlier scripts win.
    pub fn script(&self, prefix: impl Into<String>, output: CommandOutput) {
        self.scripted.lock().push((prefix.into(), output));
    }

    pub fn script_success(&self, prefix: impl Into<String>) {
        self.script(prefix, ok_output(Vec::new()));
    }

    pub fn script_failure(&self, prefix: impl Into<String>) {
        self.script(
            prefix,
            CommandOutput {
                success: false,
                exit_code: Some(1),
                stdout: Vec::new(),
            },
        );
    }

    /// Report `mount_point` in the mount table with the given options and
    /// accept remounts.
    pub fn fake_mount(&self, mount_point: &Path, options: &str) {
        let line = format!("/dev/block/dm-0 {} ext4 {} 0 0", mount_point.display(), options);
        self.script(
            PrivilegedCommand::ReadMounts.to_shell(),
            ok_output(vec![line]),
        );
        self.script_success("mount -o remount,");
    }

    /// Make `path` inaccessible to the test process but accessible to the
    /// commands this channel runs. A locked directory cannot be searched.
    pub fn lock(&self, path: &Path) {
        let open = if path.is_dir() { 0o755 } else { 0o644 };
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o000)).unwrap();
        self.locked.lock().push((path.to_path_buf(), open));
    }

    /// Give every locked path its permissions back.
    pub fn unlock(&self) {
        self.open_locked();
        self.locked.lock().clear();
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Index of the first recorded command starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.commands.lock().iter().position(|c| c.starts_with(prefix))
    }

    fn open_locked(&self) {
        for (path, open) in self.locked.lock().iter() {
            let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(*open));
        }
    }

    fn close_locked(&self) {
        // Reverse order: paths inside a locked directory are closed first.
        for (path, _) in self.locked.lock().iter().rev() {
            let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o000));
        }
    }
}

impl Drop for FakeChannel {
    fn drop(&mut self) {
        // Let TempDir clean up.
        self.open_locked();
    }
}

fn ok_output(stdout: Vec<String>) -> CommandOutput {
    CommandOutput {
        success: true,
        exit_code: Some(0),
        stdout,
    }
}

impl CommandChannel for FakeChannel {
    fn execute(&self, command: &str) -> CommandOutput {
        self.commands.lock().push(command.to_string());

        if command == PrivilegedCommand::RootCheck.to_shell() {
            let uid = if self.root.load(Ordering::SeqCst) { "0" } else { "1000" };
            return ok_output(vec![uid.to_string()]);
        }
        if let Some((_, output)) = self
            .scripted
            .lock()
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
        {
            return output.clone();
        }
        if !self.root.load(Ordering::SeqCst) {
            return CommandOutput {
                success: false,
                exit_code: Some(1),
                stdout: vec!["Permission denied".to_string()],
            };
        }

        self.open_locked();
        let output = Command::new("sh").arg("-c").arg(command).output();
        self.close_locked();

        match output {
            Ok(output) => CommandOutput {
                success: output.status.success(),
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .map(str::to_string)
                    .collect(),
            },
            Err(_) => CommandOutput::failed(),
        }
    }

    fn is_busy(&self) -> bool {
        false
    }

    fn close(&self) {}
}

/// Temporary layout: `<tmp>/system` is the protected partition and
/// `<tmp>/data` the application data directory.
pub struct Sandbox {
    pub dir: TempDir,
    pub config: StoreConfig,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let system = dir.path().join("system");
        std::fs::create_dir_all(&system).unwrap();
        let config = StoreConfig {
            target: system.join("build.prop"),
            data_dir: dir.path().join("data"),
            protected_partition: system,
            access_label: None,
            ..StoreConfig::default()
        };
        Self { dir, config }
    }

    pub fn target(&self) -> PathBuf {
        self.config.target.clone()
    }

    pub fn backup(&self) -> PathBuf {
        self.config.backup_path(&self.config.target)
    }

    pub fn write_target(&self, content: &str) {
        std::fs::write(self.target(), content).unwrap();
    }
}

/// Unreadable files are readable anyway when the tests run as root.
pub fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

pub const SAMPLE: &str = "\
# begin build properties
ro.build.id=TQ3A.230805.001
ro.build.version.sdk=33
ro.product.model=Pixel 7
ro.debuggable=0
persist.sys.usb.config=mtp,adb
";
