//! Atomic JSON snapshots.

use std::fs::{self, File};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::PersistenceError;

/// Write `bytes` to `path` so readers see either the old or the new file.
///
/// Writes a sibling temp file, syncs it, then renames it over `path`.
///
/// # Errors
///
/// Returns [`PersistenceError::Io`] if any filesystem step fails.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = File::create(&tmp).map_err(|e| PersistenceError::io(&tmp, e))?;
    file.write_all(bytes)
        .map_err(|e| PersistenceError::io(&tmp, e))?;
    file.sync_all().map_err(|e| PersistenceError::io(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| PersistenceError::io(path, e))
}

/// A JSON document holding one `T`, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonSnapshot<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> JsonSnapshot<T> {
    /// Snapshot stored at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    /// File backing this snapshot.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn save(&self, value: &T) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec_pretty(value)?;
        write_atomic(&self.path, &json)
    }

    /// Load the stored value.
    ///
    /// Returns `Ok(None)` when no snapshot exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn load(&self) -> Result<Option<T>, PersistenceError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::io(&self.path, e)),
        }
    }
}
