//! Remote store backed by a shared directory
//!
//! Each container is a sub-directory holding one snapshot file. Useful with
//! any folder that another tool keeps in sync across machines.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::error::{SyncError, SyncResult};
use super::remote::{RemoteSnapshotClient, SnapshotHandle, SNAPSHOT_FILE_NAME};
use crate::models::Snapshot;

pub struct DirectoryRemote {
    root: PathBuf,
}

impl DirectoryRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn snapshot_path(&self, container_id: &str) -> PathBuf {
        self.root.join(container_id).join(SNAPSHOT_FILE_NAME)
    }
}

/// An unreachable shared directory behaves like an unreachable server
fn unavailable(path: &Path, err: io::Error) -> SyncError {
    SyncError::TransientNetwork(format!("{}: {}", path.display(), err))
}

#[async_trait]
impl RemoteSnapshotClient for DirectoryRemote {
    fn is_configured(&self) -> bool {
        !self.root.as_os_str().is_empty()
    }

    async fn find_snapshot_handle(&self, container_id: &str) -> SyncResult<Option<SnapshotHandle>> {
        let path = self.snapshot_path(container_id);
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| unavailable(&path, e))?;
        Ok(exists.then(|| SnapshotHandle::new(path.to_string_lossy())))
    }

    async fn read_snapshot(&self, handle: &SnapshotHandle) -> SyncResult<Snapshot> {
        let path = Path::new(handle.as_str());
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| unavailable(path, e))?;
        Ok(Snapshot::from_json(&json)?)
    }

    async fn write_snapshot(
        &self,
        container_id: &str,
        snapshot: &Snapshot,
    ) -> SyncResult<SnapshotHandle> {
        let path = self.snapshot_path(container_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| unavailable(parent, e))?;
        }

        let json = snapshot
            .to_json()
            .map_err(|e| SyncError::CorruptRemoteSnapshot(e.to_string()))?;

        // Write to a sibling temp file and rename so readers never see a partial document
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, json.as_bytes())
            .await
            .map_err(|e| unavailable(&temp_path, e))?;
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(unavailable(&path, e));
        }

        debug!("Wrote remote snapshot to {:?}", path);
        Ok(SnapshotHandle::new(path.to_string_lossy()))
    }

    async fn check_token_validity(&self) -> SyncResult<bool> {
        tokio::fs::try_exists(&self.root)
            .await
            .map_err(|e| unavailable(&self.root, e))
    }

    async fn logout(&self, container_id: &str, purge_remote: bool) -> SyncResult<()> {
        if purge_remote {
            let path = self.snapshot_path(container_id);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => info!("Removed remote snapshot {:?}", path),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(unavailable(&path, e)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClientId, Page};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_empty_directory_has_no_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let remote = DirectoryRemote::new(temp_dir.path());

        assert!(remote.find_snapshot_handle("folio").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_creates_container_and_reads_back() {
        let temp_dir = TempDir::new().unwrap();
        let remote = DirectoryRemote::new(temp_dir.path());
        let mut snapshot = Snapshot::default();
        snapshot.upsert(Page::with_id("p1", "Notes", "n1", None, &ClientId::from("a")).into());

        remote.write_snapshot("folio", &snapshot).await.unwrap();

        let handle = remote.find_snapshot_handle("folio").await.unwrap().unwrap();
        assert!(handle.as_str().ends_with(SNAPSHOT_FILE_NAME));
        assert_eq!(remote.read_snapshot(&handle).await.unwrap(), snapshot);
        assert!(!temp_dir.path().join("folio").join("folio-snapshot.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let container = temp_dir.path().join("folio");
        std::fs::create_dir_all(&container).unwrap();
        std::fs::write(container.join(SNAPSHOT_FILE_NAME), "{\"notebooks\": 5}").unwrap();
        let remote = DirectoryRemote::new(temp_dir.path());

        let handle = remote.find_snapshot_handle("folio").await.unwrap().unwrap();
        let err = remote.read_snapshot(&handle).await.unwrap_err();
        assert!(matches!(err, SyncError::CorruptRemoteSnapshot(_)));
    }

    #[tokio::test]
    async fn test_logout_purge_removes_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let remote = DirectoryRemote::new(temp_dir.path());
        remote.write_snapshot("folio", &Snapshot::default()).await.unwrap();

        remote.logout("folio", true).await.unwrap();
        assert!(remote.find_snapshot_handle("folio").await.unwrap().is_none());
        // Purging twice is fine
        remote.logout("folio", true).await.unwrap();
    }
}
