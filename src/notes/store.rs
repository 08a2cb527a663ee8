//! `NoteStore` — insertion-ordered key → text mapping with write-through
//! persistence to a pretty-printed JSON file.
//!
//! Every mutation (`add`, successful `update`, successful `remove`) is
//! followed by an autosave.  Autosave failures are logged and swallowed so
//! the in-memory mapping stays usable when the disk is not; call
//! [`NoteStore::persist`] directly to observe write errors.
//!
//! On-disk shape (UTF-8, 2-space indent, non-ASCII kept verbatim):
//!
//! ```json
//! {
//!   "shopping": "milk, bread",
//!   "планы": "волейбол в 20:00"
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Snapshot of the store contents, in insertion order.
pub type Notes = IndexMap<String, String>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no persist path configured")]
    NoPath,

    #[error("cannot read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("malformed {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("serialise notes: {0}")]
    Serialise(#[source] serde_json::Error),

    #[error("cannot write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
}

#[derive(Debug, Default)]
pub struct NoteStore {
    notes: Notes,
    path: Option<PathBuf>,
}

impl NoteStore {
    /// Purely in-memory store; `persist` returns [`StoreError::NoPath`].
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Store backed by `path`, hydrated from it when present.
    ///
    /// A missing, unreadable or malformed file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let mut store = Self {
            notes: Notes::new(),
            path: Some(path.into()),
        };
        store.hydrate();
        store
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Independent copy of the current mapping.
    pub fn list(&self) -> Notes {
        self.notes.clone()
    }

    /// Borrowed view for read-only consumers (composer, fallback).
    pub fn notes(&self) -> &Notes {
        &self.notes
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.notes.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Insert or overwrite.  An overwritten key keeps its original position.
    pub fn add(&mut self, key: impl Into<String>, text: impl Into<String>) {
        let key = key.into();
        debug!(key = %key, "note add");
        self.notes.insert(key, text.into());
        self.autosave();
    }

    /// Replace the text of an existing note.  Returns `false` when `key` is
    /// absent, in which case nothing changes and nothing is written.
    pub fn update(&mut self, key: &str, text: impl Into<String>) -> bool {
        match self.notes.get_mut(key) {
            Some(slot) => {
                *slot = text.into();
                debug!(key, "note update");
                self.autosave();
                true
            }
            None => false,
        }
    }

    /// Delete `key`, preserving the order of the remaining notes.
    pub fn remove(&mut self, key: &str) -> bool {
        if self.notes.shift_remove(key).is_none() {
            return false;
        }
        debug!(key, "note remove");
        self.autosave();
        true
    }

    /// Rewrite the whole persisted file from the in-memory mapping.
    pub fn persist(&self) -> Result<(), StoreError> {
        let path = self.path.as_ref().ok_or(StoreError::NoPath)?;
        let data = serde_json::to_string_pretty(&self.notes).map_err(StoreError::Serialise)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            })?;
        }
        fs::write(path, data).map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })
    }

    /// Startup load: replace the mapping with the persisted file if one
    /// exists.  Any failure resets to an empty mapping and is only logged.
    pub fn hydrate(&mut self) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        if !path.exists() {
            debug!(path = %path.display(), "no persisted notes yet");
            return;
        }
        match read_notes(path) {
            Ok(notes) => {
                debug!(path = %path.display(), count = notes.len(), "notes hydrated");
                self.notes = notes;
            }
            Err(e) => {
                warn!(error = %e, "discarding unreadable notes file");
                self.notes = Notes::new();
            }
        }
    }

    /// Manual reload.  Unlike [`hydrate`](Self::hydrate) this surfaces
    /// errors and leaves the in-memory mapping untouched when they occur.
    /// Returns the number of notes loaded.
    pub fn reload(&mut self) -> Result<usize, StoreError> {
        let path = self.path.as_deref().ok_or(StoreError::NoPath)?;
        let notes = read_notes(path)?;
        self.notes = notes;
        Ok(self.notes.len())
    }

    fn autosave(&self) {
        match self.persist() {
            Ok(()) | Err(StoreError::NoPath) => {}
            Err(e) => warn!(error = %e, "autosave failed; keeping notes in memory"),
        }
    }
}

fn read_notes(path: &Path) -> Result<Notes, StoreError> {
    let data = fs::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> NoteStore {
        NoteStore::open(dir.path().join("notes.json"))
    }

    #[test]
    fn add_update_remove_last_write_wins() {
        let mut store = NoteStore::in_memory();
        store.add("a", "1");
        store.add("b", "2");
        store.add("a", "3");
        assert!(store.update("b", "4"));
        assert!(store.remove("a"));
        store.add("c", "5");

        let notes = store.list();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes.get("b").map(String::as_str), Some("4"));
        assert_eq!(notes.get("c").map(String::as_str), Some("5"));
        assert!(!notes.contains_key("a"));
    }

    #[test]
    fn overwrite_keeps_insertion_position() {
        let mut store = NoteStore::in_memory();
        store.add("first", "x");
        store.add("second", "y");
        store.add("first", "z");
        let keys: Vec<_> = store.list().into_keys().collect();
        assert_eq!(keys, ["first", "second"]);
    }

    #[test]
    fn remove_preserves_order_of_rest() {
        let mut store = NoteStore::in_memory();
        for k in ["a", "b", "c", "d"] {
            store.add(k, k);
        }
        store.remove("b");
        let keys: Vec<_> = store.list().into_keys().collect();
        assert_eq!(keys, ["a", "c", "d"]);
    }

    #[test]
    fn update_missing_key_is_noop() {
        let mut store = NoteStore::in_memory();
        store.add("a", "1");
        assert!(!store.update("zzz", "2"));
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.get("a"), Some("1"));
    }

    #[test]
    fn remove_missing_key_is_noop() {
        let mut store = NoteStore::in_memory();
        store.add("a", "1");
        assert!(!store.remove("zzz"));
        assert_eq!(store.get("a"), Some("1"));
    }

    #[test]
    fn list_returns_independent_copy() {
        let mut store = NoteStore::in_memory();
        store.add("a", "1");
        let mut copy = store.list();
        copy.insert("b".into(), "2".into());
        copy.insert("a".into(), "changed".into());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a"), Some("1"));
    }

    #[test]
    fn mutation_writes_through() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.add("shopping", "milk, bread");

        let reopened = store_in(&dir);
        assert_eq!(reopened.get("shopping"), Some("milk, bread"));

        store.remove("shopping");
        assert!(store_in(&dir).is_empty());
    }

    #[test]
    fn persisted_file_is_indented_and_unescaped() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.add("покупки", "Молоко, хлеб");

        let raw = fs::read_to_string(dir.path().join("notes.json")).unwrap();
        assert!(raw.contains("\"покупки\": \"Молоко, хлеб\""));
        assert!(raw.contains("\n  \""), "expected two-space indentation: {raw}");
        assert!(!raw.contains("\\u"));
    }

    #[test]
    fn corrupt_file_hydrates_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.json"), "{ not json").unwrap();
        assert!(store_in(&dir).is_empty());
    }

    #[test]
    fn non_string_values_hydrate_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.json"), r#"{"a": 1}"#).unwrap();
        assert!(store_in(&dir).is_empty());
    }

    #[test]
    fn missing_file_hydrates_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.is_empty());
        assert!(!dir.path().join("notes.json").exists());
    }

    #[test]
    fn persist_without_path_errors() {
        let store = NoteStore::in_memory();
        assert!(matches!(store.persist(), Err(StoreError::NoPath)));
    }

    #[test]
    fn persist_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deeper/notes.json");
        let mut store = NoteStore::open(&path);
        store.add("k", "v");
        assert!(path.exists());
    }

    #[test]
    fn unwritable_path_keeps_memory_state() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes every write fail.
        let path = dir.path().join("notes.json");
        fs::create_dir(&path).unwrap();

        let mut store = NoteStore::open(&path);
        store.add("k", "v");
        assert_eq!(store.get("k"), Some("v"));
        assert!(matches!(store.persist(), Err(StoreError::Write { .. })));
    }

    #[test]
    fn reload_picks_up_external_edits() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.add("a", "1");
        fs::write(
            dir.path().join("notes.json"),
            r#"{ "a": "edited", "b": "new" }"#,
        )
        .unwrap();

        assert_eq!(store.reload().unwrap(), 2);
        assert_eq!(store.get("a"), Some("edited"));
        assert_eq!(store.get("b"), Some("new"));
    }

    #[test]
    fn reload_failure_keeps_current_notes() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.add("a", "1");
        fs::write(dir.path().join("notes.json"), "garbage").unwrap();

        assert!(matches!(store.reload(), Err(StoreError::Parse { .. })));
        assert_eq!(store.get("a"), Some("1"));
    }

    #[test]
    fn reload_without_path_errors() {
        let mut store = NoteStore::in_memory();
        assert!(matches!(store.reload(), Err(StoreError::NoPath)));
    }
}
