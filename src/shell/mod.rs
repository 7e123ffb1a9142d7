//! Superuser command plumbing.
//!
//! This module handles:
//! - The long-lived privileged shell and its command discipline
//! - Rendering privileged operations as shell commands
//! - Mount table inspection and remounting

mod channel;
mod command;
mod mount;

pub use channel::{find_su, running_as_root, CommandChannel, CommandOutput, ShellChannel};
pub use command::{MountFlag, PrivilegedCommand, MOUNT_TABLE};
pub use mount::{find_mount, parse_mount_table, MountController, MountEntry};
