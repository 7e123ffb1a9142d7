//! Privileged command surface.
//!
//! Every privileged operation is one opaque round trip through a
//! [`CommandChannel`](super::CommandChannel). Paths are shell-quoted.

use shell_escape::unix::escape;
use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

/// Mount table read by [`PrivilegedCommand::ReadMounts`].
pub const MOUNT_TABLE: &str = "/proc/mounts";

/// Read-write state of a mount point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountFlag {
    ReadWrite,
    ReadOnly,
}

impl MountFlag {
    /// The mount option string.
    pub fn as_str(self) -> &'static str {
        match self {
            MountFlag::ReadWrite => "rw",
            MountFlag::ReadOnly => "ro",
        }
    }
}

impl fmt::Display for MountFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command understood by the superuser shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivilegedCommand {
    /// Print the effective user id.
    RootCheck,
    /// Copy file bytes; the destination is truncated, keeping its inode.
    Copy { from: PathBuf, to: PathBuf },
    /// Change file mode (octal string).
    Chmod { path: PathBuf, mode: String },
    /// Change the access-control (SELinux) label.
    ChangeLabel { path: PathBuf, label: String },
    /// Rename a file.
    Move { from: PathBuf, to: PathBuf },
    /// Rename a file, leaving an existing destination alone.
    MoveNoClobber { from: PathBuf, to: PathBuf },
    /// Exit 0 if anything (a dangling symlink included) exists at `path`,
    /// 1 if nothing does.
    Exists { path: PathBuf },
    /// Create a directory and its parents.
    MakeDir { path: PathBuf },
    /// Remove a file.
    Remove { path: PathBuf },
    /// Dump the mount table.
    ReadMounts,
    /// Remount with the given flag.
    Remount { mount_point: PathBuf, flag: MountFlag },
    /// Reboot the device.
    Reboot,
}

fn quote(path: &Path) -> Cow<'_, str> {
    escape(path.to_string_lossy())
}

impl PrivilegedCommand {
    /// Render as a single shell command line.
    pub fn to_shell(&self) -> String {
        match self {
            PrivilegedCommand::RootCheck => "id -u".to_string(),
            PrivilegedCommand::Copy { from, to } => {
                format!("cat {} > {}", quote(from), quote(to))
            }
            PrivilegedCommand::Chmod { path, mode } => {
                format!("chmod {} {}", escape(mode.into()), quote(path))
            }
            PrivilegedCommand::ChangeLabel { path, label } => {
                format!("chcon {} {}", escape(label.into()), quote(path))
            }
            PrivilegedCommand::Move { from, to } => {
                format!("mv {} {}", quote(from), quote(to))
            }
            PrivilegedCommand::MoveNoClobber { from, to } => {
                format!("mv -n {} {}", quote(from), quote(to))
            }
            PrivilegedCommand::Exists { path } => {
                let path = quote(path);
                format!("test -e {} || test -L {}", path, path)
            }
            PrivilegedCommand::MakeDir { path } => format!("mkdir -p {}", quote(path)),
            PrivilegedCommand::Remove { path } => format!("rm -f {}", quote(path)),
            PrivilegedCommand::ReadMounts => format!("cat {}", MOUNT_TABLE),
            PrivilegedCommand::Remount { mount_point, flag } => {
                format!("mount -o remount,{} {}", flag, quote(mount_point))
            }
            PrivilegedCommand::Reboot => "reboot".to_string(),
        }
    }
}

impl fmt::Display for PrivilegedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_paths_unquoted() {
        let cmd = PrivilegedCommand::Move {
            from: PathBuf::from("/system/build.prop"),
            to: PathBuf::from("/system/build.prop.bak"),
        };
        assert_eq!(cmd.to_shell(), "mv /system/build.prop /system/build.prop.bak");
    }

    #[test]
    fn test_paths_with_spaces_quoted() {
        let cmd = PrivilegedCommand::Copy {
            from: PathBuf::from("/data/my app/build.prop"),
            to: PathBuf::from("/system/build.prop"),
        };
        assert_eq!(
            cmd.to_shell(),
            "cat '/data/my app/build.prop' > /system/build.prop"
        );
    }

    #[test]
    fn test_remount() {
        let cmd = PrivilegedCommand::Remount {
            mount_point: PathBuf::from("/system"),
            flag: MountFlag::ReadWrite,
        };
        assert_eq!(cmd.to_shell(), "mount -o remount,rw /system");
    }

    #[test]
    fn test_exists_checks_dangling_links() {
        let cmd = PrivilegedCommand::Exists {
            path: PathBuf::from("/system/build.prop.bak"),
        };
        assert_eq!(
            cmd.to_shell(),
            "test -e /system/build.prop.bak || test -L /system/build.prop.bak"
        );
    }

    #[test]
    fn test_label_with_colons() {
        let cmd = PrivilegedCommand::ChangeLabel {
            path: PathBuf::from("/data/tmp/build.prop"),
            label: "u:object_r:app_data_file:s0:c512,c768".to_string(),
        };
        assert_eq!(
            cmd.to_shell(),
            "chcon 'u:object_r:app_data_file:s0:c512,c768' /data/tmp/build.prop"
        );
    }
}
