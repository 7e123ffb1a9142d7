//! Ordered key/value property set.

use crate::error::{Error, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// One `key=value` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub key: String,
    pub value: String,
}

impl Entry {
    /// Create a new entry.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A line of the property file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Line {
    Entry(Entry),
    /// Comment, blank or malformed line, kept as written.
    Verbatim(String),
}

/// In-memory ordered collection of properties.
///
/// Entries keep the order they were first inserted in; updating an existing
/// key keeps its position and new keys are appended. Non-entry lines are kept
/// in place so a rewritten file differs from the original only where it was
/// edited.
#[derive(Debug, Clone, Default)]
pub struct PropertyStore {
    lines: Vec<Line>,
    /// Key -> position in `lines`.
    index: HashMap<String, usize>,
    modified: bool,
}

impl PropertyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from entries, last duplicate winning. The result is
    /// unmodified.
    ///
    /// Entries are checked like [`insert`](Self::insert), so the store
    /// always survives a serialize and parse unchanged.
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = Entry>,
    {
        let mut store = Self::new();
        for entry in entries {
            let key = checked_key(&entry.key, &entry.value)?;
            store.upsert(key.to_string(), entry.value);
        }
        store.modified = false;
        Ok(store)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the store has no entries.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Whether the store changed since the last load or save.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Set or clear the modified flag.
    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    /// Look up a value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.index.get(key).and_then(|&pos| match &self.lines[pos] {
            Line::Entry(entry) => Some(entry.value.as_str()),
            Line::Verbatim(_) => None,
        })
    }

    /// Whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Add or update a property.
    ///
    /// Returns the previous value when the key already existed. The key is
    /// trimmed; neither part may contain a line break and the key may not
    /// contain `=`.
    pub fn insert(&mut self, key: &str, value: &str) -> Result<Option<String>> {
        let key = checked_key(key, value)?;
        let previous = self.upsert(key.to_string(), value.to_string());
        self.modified = true;
        Ok(previous)
    }

    /// Remove a property, returning it if present.
    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        let pos = self.index.remove(key)?;
        let removed = match self.lines.remove(pos) {
            Line::Entry(entry) => entry,
            Line::Verbatim(_) => unreachable!("index points at an entry line"),
        };
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        self.modified = true;
        Some(removed)
    }

    /// Entries in file order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.lines.iter().filter_map(|line| match line {
            Line::Entry(entry) => Some(entry),
            Line::Verbatim(_) => None,
        })
    }

    /// Keys in file order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|e| e.key.as_str())
    }

    /// Entries whose key or value contains `query`, ignoring ASCII case.
    pub fn search(&self, query: &str) -> Vec<&Entry> {
        let needle = query.to_ascii_lowercase();
        self.iter()
            .filter(|e| {
                e.key.to_ascii_lowercase().contains(&needle)
                    || e.value.to_ascii_lowercase().contains(&needle)
            })
            .collect()
    }

    /// Drop every line and clear the modified flag.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.index.clear();
        self.modified = false;
    }

    /// Replace the whole content with another store's.
    pub fn replace_with(&mut self, other: PropertyStore) {
        *self = other;
    }

    /// SHA-256 of the serialized content, hex encoded.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.serialize().as_bytes()))
    }

    pub(crate) fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub(crate) fn push_verbatim(&mut self, line: String) {
        self.lines.push(Line::Verbatim(line));
    }

    /// Insert without validation or touching the modified flag.
    pub(crate) fn upsert(&mut self, key: String, value: String) -> Option<String> {
        if let Some(&pos) = self.index.get(&key) {
            if let Line::Entry(entry) = &mut self.lines[pos] {
                return Some(std::mem::replace(&mut entry.value, value));
            }
        }
        self.index.insert(key.clone(), self.lines.len());
        self.lines.push(Line::Entry(Entry { key, value }));
        None
    }
}

/// Validate a property and return its trimmed key.
///
/// Rejects what the parser would read back differently: an empty key, a key
/// holding `=` or starting like a comment, and line breaks anywhere.
fn checked_key<'a>(key: &'a str, value: &str) -> Result<&'a str> {
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::InvalidEntry("key is empty".to_string()));
    }
    if key.contains('=') || key.starts_with('#') || key.starts_with('!') {
        return Err(Error::InvalidEntry(format!("invalid key: {}", key)));
    }
    if key.contains(['\n', '\r']) || value.contains(['\n', '\r']) {
        return Err(Error::InvalidEntry(format!(
            "line break in property {}",
            key
        )));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PropertyStore {
        PropertyStore::from_entries(vec![
            Entry::new("ro.build.id", "QP1A"),
            Entry::new("ro.product.model", "Pixel"),
            Entry::new("persist.sys.timezone", "UTC"),
        ])
        .unwrap()
    }

    #[test]
    fn test_from_entries_is_unmodified() {
        let store = sample();
        assert_eq!(store.len(), 3);
        assert!(!store.is_modified());
    }

    #[test]
    fn test_from_entries_rejects_unparseable_entries() {
        for entry in [
            Entry::new("#hidden", "x"),
            Entry::new("multi", "a\nsmuggled=1"),
            Entry::new("k=v", "x"),
            Entry::new("", "x"),
        ] {
            let key = entry.key.clone();
            assert!(
                matches!(PropertyStore::from_entries(vec![entry]), Err(Error::InvalidEntry(_))),
                "{:?} accepted",
                key
            );
        }
    }

    #[test]
    fn test_from_entries_trims_keys() {
        let store = PropertyStore::from_entries(vec![Entry::new(" padded.key ", " v")]).unwrap();
        assert_eq!(store.get("padded.key"), Some(" v"));
    }

    #[test]
    fn test_insert_new_key_appends() {
        let mut store = sample();
        let previous = store.insert("ro.debuggable", "1").unwrap();

        assert!(previous.is_none());
        assert!(store.is_modified());
        assert_eq!(store.keys().last(), Some("ro.debuggable"));
    }

    #[test]
    fn test_update_keeps_position() {
        let mut store = sample();
        let previous = store.insert("ro.product.model", "Pixel 4").unwrap();

        assert_eq!(previous.as_deref(), Some("Pixel"));
        assert_eq!(store.get("ro.product.model"), Some("Pixel 4"));
        let keys: Vec<_> = store.keys().collect();
        assert_eq!(
            keys,
            vec!["ro.build.id", "ro.product.model", "persist.sys.timezone"]
        );
    }

    #[test]
    fn test_remove_reindexes() {
        let mut store = sample();
        let removed = store.remove("ro.build.id").unwrap();

        assert_eq!(removed.value, "QP1A");
        assert!(store.is_modified());
        assert_eq!(store.len(), 2);
        // Remaining keys still resolve after the shift.
        assert_eq!(store.get("ro.product.model"), Some("Pixel"));
        assert_eq!(store.get("persist.sys.timezone"), Some("UTC"));
        assert!(store.remove("ro.build.id").is_none());
    }

    #[test]
    fn test_insert_rejects_bad_keys() {
        let mut store = PropertyStore::new();
        assert!(matches!(store.insert("  ", "x"), Err(Error::InvalidEntry(_))));
        assert!(matches!(store.insert("a=b", "x"), Err(Error::InvalidEntry(_))));
        assert!(matches!(
            store.insert("a", "line\nbreak"),
            Err(Error::InvalidEntry(_))
        ));
        assert!(!store.is_modified());
    }

    #[test]
    fn test_search_matches_key_or_value() {
        let store = sample();
        assert_eq!(store.search("PRODUCT").len(), 1);
        assert_eq!(store.search("utc").len(), 1);
        assert_eq!(store.search("ro.").len(), 2);
    }

    #[test]
    fn test_digest_tracks_content() {
        let mut store = sample();
        let before = store.digest();
        assert_eq!(before.len(), 64);

        store.insert("ro.secure", "0").unwrap();
        assert_ne!(store.digest(), before);
    }
}
