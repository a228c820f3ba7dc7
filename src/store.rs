//! File persistence for renders and JSON documents.
//!
//! Everything lives flat in one data directory, addressed by file name:
//! masters, renders, manual renders, [`SmartPhotoSpec`](crate::types::SmartPhotoSpec)
//! documents and shuffle manifests. Names are reduced to a single path
//! component before use, so a stored reference can never point outside the
//! directory.
//!
//! Writes are atomic: data goes to a hidden temporary file first and is then
//! renamed over the target, so readers see either the old or the new
//! content, never a torn file.

use crate::naming::{generate_file_name, sanitise_file_name};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid file name: {0:?}")]
    InvalidName(String),
}

/// A directory of named files.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a stored file, after sanitising the name.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        let safe = sanitise_file_name(name).ok_or_else(|| StoreError::InvalidName(name.into()))?;
        Ok(self.root.join(safe))
    }

    /// Whether `name` refers to an existing file. Blank or invalid names
    /// never exist.
    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        Ok(fs::read(self.path_for(name)?)?)
    }

    /// Atomically write `bytes` under `name`, replacing any existing file.
    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let target = self.path_for(name)?;
        let tmp = self.root.join(format!(".tmp-{}", Uuid::new_v4()));
        let result = (|| -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &target)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result?;
        debug!(file = %target.display(), bytes = bytes.len(), "wrote file");
        Ok(())
    }

    /// Write `bytes` under a freshly generated `<prefix>-<uuid>.<ext>` name.
    pub fn write_new(&self, prefix: &str, ext: &str, bytes: &[u8]) -> Result<String, StoreError> {
        let name = generate_file_name(prefix, ext);
        self.write(&name, bytes)?;
        Ok(name)
    }

    /// Delete `name`. Deleting a missing file is not an error.
    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(file = %path.display(), "deleted file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read and parse a JSON document. Returns `Ok(None)` when the file does
    /// not exist.
    pub fn load_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StoreError> {
        let path = self.path_for(name)?;
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Serialise `value` as pretty JSON and write it atomically.
    pub fn save_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(value)?;
        self.write(name, json.as_bytes())
    }
}

/// Notified after a change that affects what a widget displays.
pub trait RefreshSignal: Send + Sync {
    fn refresh(&self, reason: &str);
}

/// Default signal: records the refresh in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRefresh;

impl RefreshSignal for LogRefresh {
    fn refresh(&self, reason: &str) {
        info!(reason, "display refresh requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        n: u32,
    }

    fn store() -> (TempDir, FileStore) {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path().join("data")).unwrap();
        (tmp, store)
    }

    #[test]
    fn open_creates_directory() {
        let (_tmp, store) = store();
        assert!(store.root().is_dir());
    }

    #[test]
    fn write_read_delete() {
        let (_tmp, store) = store();
        store.write("a.jpg", b"abc").unwrap();
        assert!(store.exists("a.jpg"));
        assert_eq!(store.read("a.jpg").unwrap(), b"abc");
        store.delete("a.jpg").unwrap();
        assert!(!store.exists("a.jpg"));
        // Second delete is a no-op.
        store.delete("a.jpg").unwrap();
    }

    #[test]
    fn write_leaves_no_temporary_files() {
        let (_tmp, store) = store();
        store.write("a.jpg", b"1").unwrap();
        store.write("a.jpg", b"2").unwrap();
        let names: Vec<_> = fs::read_dir(store.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["a.jpg".to_string()]);
        assert_eq!(store.read("a.jpg").unwrap(), b"2");
    }

    #[test]
    fn names_cannot_escape_root() {
        let (tmp, store) = store();
        store.write("../escape.txt", b"x").unwrap();
        assert!(store.root().join("escape.txt").is_file());
        assert!(!tmp.path().join("escape.txt").exists());
    }

    #[test]
    fn invalid_names_are_rejected() {
        let (_tmp, store) = store();
        assert!(matches!(store.write("", b"x"), Err(StoreError::InvalidName(_))));
        assert!(matches!(store.read(".."), Err(StoreError::InvalidName(_))));
        assert!(!store.exists("   "));
    }

    #[test]
    fn write_new_generates_prefixed_name() {
        let (_tmp, store) = store();
        let name = store.write_new("smart-master", "jpg", b"x").unwrap();
        assert!(name.starts_with("smart-master-"));
        assert!(store.exists(&name));
    }

    #[test]
    fn json_round_trip_and_missing() {
        let (_tmp, store) = store();
        assert_eq!(store.load_json::<Doc>("doc.json").unwrap(), None);
        let doc = Doc { name: "x".into(), n: 3 };
        store.save_json("doc.json", &doc).unwrap();
        assert_eq!(store.load_json::<Doc>("doc.json").unwrap(), Some(doc));
    }

    #[test]
    fn corrupt_json_is_an_error() {
        let (_tmp, store) = store();
        store.write("doc.json", b"{ not json").unwrap();
        assert!(matches!(store.load_json::<Doc>("doc.json"), Err(StoreError::Json(_))));
    }
}
