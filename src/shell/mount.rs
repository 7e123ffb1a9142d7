//! Mount state inspection and remounting through the superuser shell.

use super::channel::CommandChannel;
use super::command::{MountFlag, PrivilegedCommand};
use log::{debug, info, warn};
use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

/// One line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub options: Vec<String>,
}

impl MountEntry {
    /// Whether the option list contains `flag`.
    pub fn has_flag(&self, flag: MountFlag) -> bool {
        self.options.iter().any(|o| o == flag.as_str())
    }
}

/// Parse `/proc/mounts` style lines, skipping any that are too short.
pub fn parse_mount_table<S: AsRef<str>>(lines: &[S]) -> Vec<MountEntry> {
    lines
        .iter()
        .filter_map(|line| {
            let parts: Vec<&str> = line.as_ref().split_whitespace().collect();
            if parts.len() < 4 {
                return None;
            }
            Some(MountEntry {
                device: String::from_utf8_lossy(&unescape_field(parts[0])).into_owned(),
                mount_point: PathBuf::from(OsString::from_vec(unescape_field(parts[1]))),
                fs_type: parts[2].to_string(),
                options: parts[3].split(',').map(str::to_string).collect(),
            })
        })
        .collect()
}

/// Decode the `\ooo` octal escapes the kernel writes for space, tab,
/// newline and backslash. Anything else is kept as is.
fn unescape_field(field: &str) -> Vec<u8> {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let value = bytes[i + 1..i + 4]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            out.push(value as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3
        && digits.iter().all(|b| (b'0'..=b'7').contains(b))
        && digits[0] <= b'3'
}

/// Find the effective entry for a mount point.
///
/// When a point is mounted more than once, the last entry is the one
/// visible to path lookups.
pub fn find_mount<'a>(table: &'a [MountEntry], mount_point: &Path) -> Option<&'a MountEntry> {
    table.iter().rev().find(|e| e.mount_point == mount_point)
}

/// Inspects and toggles the read-only flag of mount points.
///
/// State is never cached: other processes may remount at any time, so
/// callers check right before acting.
pub struct MountController<'a> {
    channel: &'a dyn CommandChannel,
}

impl<'a> MountController<'a> {
    pub fn new(channel: &'a dyn CommandChannel) -> Self {
        Self { channel }
    }

    /// Read the current mount table. `None` when the channel fails.
    pub fn mount_table(&self) -> Option<Vec<MountEntry>> {
        let output = self.channel.execute(&PrivilegedCommand::ReadMounts.to_shell());
        if !output.success {
            warn!("unable to read mount table");
            return None;
        }
        Some(parse_mount_table(&output.stdout))
    }

    /// Whether `mount_point` is currently mounted with `flag`.
    ///
    /// An unknown mount point or a channel failure reports `false`.
    pub fn check_mount_flags(&self, mount_point: &Path, flag: MountFlag) -> bool {
        let Some(table) = self.mount_table() else {
            return false;
        };
        match find_mount(&table, mount_point) {
            Some(entry) => {
                let set = entry.has_flag(flag);
                debug!(
                    "{} mounted {}",
                    mount_point.display(),
                    entry.options.join(",")
                );
                set
            }
            None => {
                debug!("{} is not a mount point", mount_point.display());
                false
            }
        }
    }

    /// Remount `mount_point` with `flag`.
    pub fn remount(&self, mount_point: &Path, flag: MountFlag) -> bool {
        let ok = self.channel.run(&PrivilegedCommand::Remount {
            mount_point: mount_point.to_path_buf(),
            flag,
        });
        if ok {
            info!("remounted {} {}", mount_point.display(), flag);
        } else {
            warn!("remount {} {} failed", mount_point.display(), flag);
        }
        ok
    }
}
