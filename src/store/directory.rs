//! File-per-session store.
//!
//! Each session is kept at `<dir>/<key>.session`. Saves write to a temporary
//! file in the same directory and rename it over the previous blob, so a
//! reader never observes a half-written archive.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{check_key, RemoteStore, StoreError};

/// File extension for stored blobs.
pub const BLOB_EXTENSION: &str = "session";

/// A [`RemoteStore`] that keeps one file per session in a directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    /// Use `dir` for storage. The directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the blob for `session`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] if the key is not a plain name.
    pub fn blob_path(&self, session: &str) -> Result<PathBuf, StoreError> {
        check_key(session)?;
        Ok(self.dir.join(format!("{session}.{BLOB_EXTENSION}")))
    }

    fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl RemoteStore for DirectoryStore {
    fn session_exists(&self, session: &str) -> Result<bool, StoreError> {
        let path = self.blob_path(session)?;
        path.try_exists().map_err(Self::io_err(&path))
    }

    fn save(&self, session: &str, payload: &[u8]) -> Result<(), StoreError> {
        let path = self.blob_path(session)?;
        fs::create_dir_all(&self.dir).map_err(Self::io_err(&self.dir))?;

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(Self::io_err(&self.dir))?;
        tmp.write_all(payload)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(Self::io_err(tmp.path()))?;
        tmp.persist(&path).map_err(|e| StoreError::Io {
            path: path.clone(),
            source: e.error,
        })?;
        log::trace!("Wrote {} bytes to {}", payload.len(), path.display());
        Ok(())
    }

    fn fetch(&self, session: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.blob_path(session)?;
        match fs::read(&path) {
            Ok(payload) => Ok(payload),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(session.to_string()))
            }
            Err(e) => Err(Self::io_err(&path)(e)),
        }
    }

    fn delete(&self, session: &str) -> Result<(), StoreError> {
        let path = self.blob_path(session)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_err(&path)(e)),
        }
    }
}
