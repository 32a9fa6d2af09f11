//! File-based backend for persistent sync state.

use crate::backend::StateBackend;
use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// A file-based sync-state backend.
///
/// The document lives in a single file. Next to it the backend keeps:
///
/// ```text
/// <path>        # JSON sync-state document
/// <path>.lock   # Advisory lock for single-writer access
/// <path>.tmp    # Scratch file for atomic rewrites
/// ```
///
/// # Durability
///
/// Every `store` writes the temporary file, syncs it, renames it over the
/// document and syncs the parent directory. A crash leaves either the old
/// or the new document, never a torn one.
///
/// # Example
///
/// ```no_run
/// use chanmirror_store::{FileBackend, SyncStateStore};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("sync-state.json")).unwrap();
/// let store = SyncStateStore::open(backend).unwrap();
/// println!("{} channels tracked", store.len());
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    temp_path: PathBuf,
    _lock_file: File,
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Opens the backend for the document at `path`.
    ///
    /// The document itself does not need to exist yet; it is created on the
    /// first `store`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another process holds the lock, or
    /// an I/O error if the lock file cannot be created.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let lock_path = sibling(path, ".lock");
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked(path.display().to_string()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            temp_path: sibling(path, ".tmp"),
            _lock_file: lock_file,
            write_lock: Mutex::new(()),
        })
    }

    /// Opens the backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the lock cannot
    /// be acquired.
    pub fn open_with_create_dirs(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Self::open(path)
    }

    /// Returns the path of the document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn sync_parent(&self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            let dir = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            File::open(dir)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_parent(&self) -> StoreResult<()> {
        Ok(())
    }
}

impl StateBackend for FileBackend {
    fn load(&self) -> StoreResult<Option<Vec<u8>>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(Some(data))
    }

    fn store(&self, data: &[u8]) -> StoreResult<()> {
        let _guard = self.write_lock.lock();

        let mut file = File::create(&self.temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.temp_path, &self.path)?;
        self.sync_parent()
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_document_loads_none() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("state.json")).unwrap();

        assert!(backend.load().unwrap().is_none());
        assert!(dir.path().join("state.json.lock").exists());
    }

    #[test]
    fn store_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let backend = FileBackend::open(&path).unwrap();

        backend.store(br#"{"syncHistory":{}}"#).unwrap();
        assert_eq!(backend.load().unwrap().unwrap(), br#"{"syncHistory":{}}"#);
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn rewrite_replaces_content() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("state.json")).unwrap();

        backend.store(b"a much longer first document").unwrap();
        backend.store(b"short").unwrap();
        assert_eq!(backend.load().unwrap().unwrap(), b"short");
    }

    #[test]
    fn second_writer_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let _first = FileBackend::open(&path).unwrap();
        let second = FileBackend::open(&path);
        assert!(matches!(second, Err(StoreError::Locked(_))));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.store(b"persisted").unwrap();
        }

        let reopened = FileBackend::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap().unwrap(), b"persisted");
    }

    #[test]
    fn create_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("state.json");

        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        backend.store(b"{}").unwrap();
        assert!(path.exists());
    }
}
