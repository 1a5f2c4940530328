//! Remote snapshot storage
//!
//! The remote side is a single JSON document per container. Backends only
//! move that document around; merging happens in the engine.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::error::{SyncError, SyncResult};
use crate::models::Snapshot;

/// File name of the snapshot document inside a container
pub const SNAPSHOT_FILE_NAME: &str = "folio-snapshot.json";

/// Opaque location of a remote snapshot document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotHandle(String);

impl SnapshotHandle {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client for the remote snapshot store
#[async_trait]
pub trait RemoteSnapshotClient: Send + Sync {
    /// Whether the client has what it needs to talk to the remote
    fn is_configured(&self) -> bool;

    /// Locate the snapshot document of a container, if one exists
    async fn find_snapshot_handle(&self, container_id: &str) -> SyncResult<Option<SnapshotHandle>>;

    /// Read and parse a snapshot document
    async fn read_snapshot(&self, handle: &SnapshotHandle) -> SyncResult<Snapshot>;

    /// Create or overwrite the snapshot document of a container
    async fn write_snapshot(
        &self,
        container_id: &str,
        snapshot: &Snapshot,
    ) -> SyncResult<SnapshotHandle>;

    /// Check whether the current credentials are still accepted
    async fn check_token_validity(&self) -> SyncResult<bool>;

    /// Drop credentials, optionally deleting the container's remote data
    async fn logout(&self, container_id: &str, purge_remote: bool) -> SyncResult<()>;
}

/// Failure to inject into a [`MemoryRemote`] operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Network,
    AuthExpired,
}

impl InjectedFailure {
    fn into_error(self) -> SyncError {
        match self {
            InjectedFailure::Network => SyncError::TransientNetwork("injected failure".into()),
            InjectedFailure::AuthExpired => SyncError::AuthExpired,
        }
    }
}

/// In-process remote store
///
/// Holds raw JSON per container so tests can plant corrupt documents, and
/// supports injected failures, latency and call counting.
#[derive(Debug)]
pub struct MemoryRemote {
    documents: Mutex<HashMap<String, String>>,
    fail_read: Mutex<Option<InjectedFailure>>,
    fail_write: Mutex<Option<InjectedFailure>>,
    latency: Mutex<Duration>,
    configured: AtomicBool,
    token_valid: AtomicBool,
    fetches: AtomicUsize,
    writes: AtomicUsize,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            fail_read: Mutex::new(None),
            fail_write: Mutex::new(None),
            latency: Mutex::new(Duration::ZERO),
            configured: AtomicBool::new(true),
            token_valid: AtomicBool::new(true),
            fetches: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot for a container
    pub fn put(&self, container_id: &str, snapshot: &Snapshot) {
        let json = serde_json::to_string(snapshot).unwrap_or_default();
        self.put_raw(container_id, json);
    }

    /// Store raw document text for a container
    pub fn put_raw(&self, container_id: &str, json: impl Into<String>) {
        lock(&self.documents).insert(container_id.to_string(), json.into());
    }

    /// Parsed snapshot of a container, if present and valid
    pub fn snapshot(&self, container_id: &str) -> Option<Snapshot> {
        let documents = lock(&self.documents);
        Snapshot::from_json(documents.get(container_id)?).ok()
    }

    /// Make the next fetch fail
    pub fn fail_next_read(&self, failure: InjectedFailure) {
        *lock(&self.fail_read) = Some(failure);
    }

    /// Make the next write fail
    pub fn fail_next_write(&self, failure: InjectedFailure) {
        *lock(&self.fail_write) = Some(failure);
    }

    /// Delay every lookup and write by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    pub fn set_token_valid(&self, valid: bool) {
        self.token_valid.store(valid, Ordering::SeqCst);
    }

    pub fn set_configured(&self, configured: bool) {
        self.configured.store(configured, Ordering::SeqCst);
    }

    async fn delay(&self) {
        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Number of snapshot lookups served so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSnapshotClient for MemoryRemote {
    fn is_configured(&self) -> bool {
        self.configured.load(Ordering::SeqCst)
    }

    async fn find_snapshot_handle(&self, container_id: &str) -> SyncResult<Option<SnapshotHandle>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if let Some(failure) = lock(&self.fail_read).take() {
            return Err(failure.into_error());
        }
        if !self.token_valid.load(Ordering::SeqCst) {
            return Err(SyncError::AuthExpired);
        }

        let exists = lock(&self.documents).contains_key(container_id);
        Ok(exists.then(|| SnapshotHandle::new(container_id)))
    }

    async fn read_snapshot(&self, handle: &SnapshotHandle) -> SyncResult<Snapshot> {
        let json = lock(&self.documents)
            .get(handle.as_str())
            .cloned()
            .ok_or_else(|| SyncError::TransientNetwork(format!("{} disappeared", handle)))?;
        Ok(Snapshot::from_json(&json)?)
    }

    async fn write_snapshot(
        &self,
        container_id: &str,
        snapshot: &Snapshot,
    ) -> SyncResult<SnapshotHandle> {
        self.delay().await;
        if let Some(failure) = lock(&self.fail_write).take() {
            return Err(failure.into_error());
        }
        if !self.token_valid.load(Ordering::SeqCst) {
            return Err(SyncError::AuthExpired);
        }

        let json = snapshot
            .to_json()
            .map_err(|e| SyncError::CorruptRemoteSnapshot(e.to_string()))?;
        self.put_raw(container_id, json);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(SnapshotHandle::new(container_id))
    }

    async fn check_token_validity(&self) -> SyncResult<bool> {
        Ok(self.token_valid.load(Ordering::SeqCst))
    }

    async fn logout(&self, container_id: &str, purge_remote: bool) -> SyncResult<()> {
        if purge_remote {
            lock(&self.documents).remove(container_id);
        }
        self.configured.store(false, Ordering::SeqCst);
        Ok(())
    }
}
