//! Line-oriented `key=value` parsing and serialization.

use super::properties::{Line, PropertyStore};
use crate::error::{Error, Result};
use log::{debug, warn};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Options controlling how non-entry lines are handled.
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    /// Keep comment, blank and malformed lines for round-tripping.
    pub preserve_comments: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            preserve_comments: true,
        }
    }
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!')
}

/// Split a property line on its first `=`.
///
/// The key is trimmed, the value is kept as written. Returns `None` for
/// lines without `=` or with an empty key.
pub fn split_line(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        None
    } else {
        Some((key, value))
    }
}

impl PropertyStore {
    /// Parse property text.
    ///
    /// A later duplicate key overwrites the earlier value in the earlier
    /// position. Malformed lines never become entries.
    pub fn parse(text: &str, options: ParseOptions) -> Self {
        let mut store = PropertyStore::new();

        for (number, raw) in text.lines().enumerate() {
            let line = raw.strip_suffix('\r').unwrap_or(raw);

            if is_comment(line) {
                if options.preserve_comments {
                    store.push_verbatim(line.to_string());
                }
                continue;
            }

            match split_line(line) {
                Some((key, value)) => {
                    if store
                        .upsert(key.to_string(), value.to_string())
                        .is_some()
                    {
                        debug!("line {}: duplicate key {} overrides earlier value", number + 1, key);
                    }
                }
                None => {
                    warn!("line {}: skipping malformed property line", number + 1);
                    if options.preserve_comments {
                        store.push_verbatim(line.to_string());
                    }
                }
            }
        }

        store.set_modified(false);
        store
    }

    /// Read and parse a property file.
    ///
    /// Fails without producing a store: `NotFound` for a missing file,
    /// `Parse` for content that is not UTF-8, `Io` otherwise.
    pub fn load_from(path: &Path, options: ParseOptions) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path.to_path_buf()),
            _ => Error::Io(e),
        })?;

        let text = String::from_utf8(bytes).map_err(|e| Error::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(Self::parse(&text, options))
    }

    /// Serialize to text, one `\n`-terminated line per entry or kept line.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for line in self.lines() {
            match line {
                Line::Entry(entry) => {
                    out.push_str(&entry.key);
                    out.push('=');
                    out.push_str(&entry.value);
                }
                Line::Verbatim(text) => out.push_str(text),
            }
            out.push('\n');
        }
        out
    }

    /// Write the serialized store to `path`, replacing it, and sync.
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(self.serialize().as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Write the serialized store to a new file created with `mode`, and
    /// sync. Fails if anything, a symlink included, already exists at `path`.
    pub fn write_new(&self, path: &Path, mode: u32) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(path)?;
        file.write_all(self.serialize().as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}
