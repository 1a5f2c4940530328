//! Local snapshot persistence
//!
//! Saves and loads the entity store's snapshot as JSON on the filesystem.
//! Uses atomic writes (write to temp file, then rename) to prevent corruption.
//!
//! Storage location: `~/.local/share/folio/store.json` (configurable via `Config`)

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::warn;

use super::error::{FileAction, StorageError, StorageResult};
use crate::config::Config;
use crate::models::Snapshot;

/// What the store file looked like when we last read or wrote it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

/// Persistence layer for the local snapshot
pub struct SnapshotPersistence {
    path: PathBuf,
    seen: Option<FileStamp>,
}

impl SnapshotPersistence {
    /// Create a persistence handler for a specific file
    pub fn new(path: PathBuf) -> Self {
        Self { path, seen: None }
    }

    /// Create a persistence handler for the configured store location
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.store_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if a store file exists on disk
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Whether another process wrote the file since our last load or save
    pub fn changed_on_disk(&self) -> bool {
        self.stamp() != self.seen
    }

    fn stamp(&self) -> Option<FileStamp> {
        fs::metadata(&self.path).ok().map(|meta| FileStamp {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }

    /// Save a snapshot using atomic write
    pub fn save(&mut self, snapshot: &Snapshot) -> StorageResult<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        atomic_write(&self.path, &json)?;
        self.seen = self.stamp();
        Ok(())
    }

    /// Load the snapshot from disk
    ///
    /// Returns `None` if the file doesn't exist. A file that exists but cannot
    /// be parsed is copied aside and reported as `CorruptStore`.
    pub fn load(&mut self) -> StorageResult<Option<Snapshot>> {
        if !self.path.exists() {
            self.seen = None;
            return Ok(None);
        }

        let stamp = self.stamp();
        let json = fs::read_to_string(&self.path)
            .map_err(|e| StorageError::io(FileAction::Read, &self.path, e))?;

        match Snapshot::from_json(&json) {
            Ok(snapshot) => {
                self.seen = stamp;
                Ok(Some(snapshot))
            }
            Err(e) => {
                let backup_path = self.backup_path();
                warn!("Local store {:?} is corrupt: {}", self.path, e);
                fs::copy(&self.path, &backup_path)
                    .map_err(|err| StorageError::io(FileAction::Copy, &backup_path, err))?;
                Err(StorageError::CorruptStore {
                    path: self.path.clone(),
                    backup_path,
                    details: e.to_string(),
                })
            }
        }
    }

    /// Remove the store file
    pub fn delete(&mut self) -> StorageResult<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .map_err(|e| StorageError::io(FileAction::Remove, &self.path, e))?;
        }
        self.seen = None;
        Ok(())
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".corrupt.backup");
        PathBuf::from(name)
    }
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| StorageError::io(FileAction::CreateDir, parent, e))?;
    }

    let temp_path = path.with_extension("tmp");

    let write_err = |e| StorageError::io(FileAction::Write, &temp_path, e);
    let mut file = File::create(&temp_path).map_err(write_err)?;
    file.write_all(data).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;

    fs::rename(&temp_path, path).map_err(|source| StorageError::Replace {
        temp: temp_path.clone(),
        target: path.to_path_buf(),
        source,
    })?;

    Ok(())
}
