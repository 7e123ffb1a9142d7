//! Privileged Property Editor
//!
//! Edits a single `key=value` property file (such as `/system/build.prop`)
//! that lives on a partition mounted read-only and is writable only by the
//! superuser.
//!
//! # Features
//!
//! - **Ordered Property Store**: Entries keep their file order; comments survive a rewrite
//! - **Superuser Shell**: One long-lived `su` session, strictly one command at a time
//! - **Transactional Save**: Staged write, `.bak` backup, remount handling, guaranteed read-only restore
//! - **Restore**: Put the backup back in place
//!
//! # Architecture
//!
//! ```text
//! Load:  file ──(direct read | su copy → staging)──→ PropertyStore
//! Save:  PropertyStore → staging → [remount rw] → mv original .bak → cat staging > file → [remount ro]
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use prop_editor::shell::ShellChannel;
//! use prop_editor::store::PropertyStore;
//! use prop_editor::transaction::{LoadTransaction, SaveTransaction};
//! use prop_editor::StoreConfig;
//! use std::time::Duration;
//!
//! let config = StoreConfig::default();
//! let shell = ShellChannel::new(None, Duration::from_secs(30));
//!
//! let mut store = PropertyStore::new();
//! LoadTransaction::new(&shell, &config, &config.target).run(&mut store).unwrap();
//!
//! store.insert("ro.debuggable", "1").unwrap();
//! SaveTransaction::new(&shell, &config, &config.target).run(&mut store).unwrap();
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod report;
pub mod shell;
pub mod store;
pub mod transaction;

pub use config::StoreConfig;
pub use context::AppContext;
pub use error::{Error, ErrorKind, Result};
pub use store::{Entry, PropertyStore};
pub use transaction::{Outcome, TransactionResult};
