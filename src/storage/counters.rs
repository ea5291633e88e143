//! A durable counter store backed by a directory of TOML files.
//!
//! Layout: `{root}/{scope}/{kind}.toml` holds the current value of each
//! counter. An increment takes two locks on its key only: an in-process
//! mutex, then an exclusive `{kind}.lock` file for other processes. The new
//! value is written to a temporary file and renamed over the old one, so a
//! crash never leaves a half-written counter.

use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    io::{self, Write},
    num::NonZeroU64,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::storage::{CounterKey, CounterStore, StoreError};

/// Counters persisted as one file per (scope, kind).
#[derive(Debug)]
pub struct DirectoryCounterStore {
    root: PathBuf,
    locks: Mutex<HashMap<CounterKey, Arc<Mutex<()>>>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_version")]
enum CounterFile {
    #[serde(rename = "1")]
    V1 { value: i64 },
}

impl DirectoryCounterStore {
    /// Opens a store rooted at `root`. Directories are created on first use.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            locks: Mutex::default(),
        }
    }

    /// The root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scope_dir(&self, key: &CounterKey) -> PathBuf {
        self.root.join(key.scope.as_str())
    }

    fn local_lock(&self, key: &CounterKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.clone()).or_default())
    }
}

impl CounterStore for DirectoryCounterStore {
    fn increment(&self, key: &CounterKey) -> Result<NonZeroU64, StoreError> {
        let local = self.local_lock(key);
        let _local = local.lock().unwrap_or_else(PoisonError::into_inner);

        let dir = self.scope_dir(key);
        fs::create_dir_all(&dir)?;
        let _lock = LockFile::acquire(dir.join(format!("{}.lock", key.kind)), key)?;

        let path = dir.join(format!("{}.toml", key.kind));
        let current = read_value(&path)?;
        let next = current
            .checked_add(1)
            .ok_or_else(|| StoreError::Overflow(key.clone()))?;
        write_value(&dir, &path, next)?;

        tracing::trace!(counter = %key, value = next, "counter incremented");
        u64::try_from(next)
            .ok()
            .and_then(NonZeroU64::new)
            .ok_or_else(|| StoreError::Overflow(key.clone()))
    }
}

fn read_value(path: &Path) -> Result<i64, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let corrupt = |reason: String| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };
    let CounterFile::V1 { value } = toml::from_str(&content).map_err(|e| corrupt(e.to_string()))?;
    if value < 0 {
        return Err(corrupt(format!("negative value {value}")));
    }
    Ok(value)
}

fn write_value(dir: &Path, path: &Path, value: i64) -> Result<(), StoreError> {
    let content = toml::to_string(&CounterFile::V1 { value }).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(content.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// An exclusive lock file, removed when dropped.
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(path: PathBuf, key: &CounterKey) -> Result<Self, StoreError> {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                // The owner's pid is informational only.
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(StoreError::Contention(key.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to release counter lock {}: {e}", self.path.display());
        }
    }
}
