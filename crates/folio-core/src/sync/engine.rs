//! Sync engine
//!
//! One sync pass reads the remote snapshot, reconciles it with the local
//! store, applies the result locally and writes the merged snapshot back.
//! At most one pass runs at a time; the status channel doubles as the
//! in-flight guard.
//!
//! The store lock is only taken around local reads and writes, never across
//! a remote call, so the UI keeps editing while a pass is in flight. Edits
//! that land during a pass stay dirty and go out with the next one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::conflict::{ConflictChoice, ConflictResolver, PendingConflict};
use super::error::{SyncError, SyncResult};
use super::reconcile::reconcile;
use super::remote::RemoteSnapshotClient;
use crate::models::{ClientId, EntityId, Snapshot};
use crate::store::{EntityStore, SharedStore};

/// Externally observable sync state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Ready for the next pass
    Idle,
    /// A pass is in flight
    Syncing,
    /// Waiting for the user to resolve a conflict
    Conflict,
    /// Credentials expired; waiting for re-authentication
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// How a sync call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Another pass was in flight (or sync is suspended), nothing ran
    Skipped,
    /// The pass ran and the remote already matched
    UpToDate,
    /// The pass ran and changes were exchanged
    Merged,
    /// The pass ran and found conflicts, now pending
    Conflict,
}

/// Summary of one sync pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub adopted: Vec<EntityId>,
    pub pushed: Vec<EntityId>,
    pub conflicts: Vec<EntityId>,
    /// Tombstones learned from the remote
    pub deleted: Vec<EntityId>,
    /// Whether the remote document was rewritten
    pub wrote_remote: bool,
}

impl SyncReport {
    fn skipped() -> Self {
        Self {
            outcome: SyncOutcome::Skipped,
            adopted: Vec::new(),
            pushed: Vec::new(),
            conflicts: Vec::new(),
            deleted: Vec::new(),
            wrote_remote: false,
        }
    }

    pub fn ran(&self) -> bool {
        self.outcome != SyncOutcome::Skipped
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Bookkeeping for passes currently running
///
/// Forced passes may overlap, so the status only leaves `syncing` when the
/// last of them finishes.
#[derive(Debug, Default)]
struct InFlight {
    count: usize,
    /// Bumped when stuck passes are abandoned; their late finish is ignored
    epoch: u64,
    /// Start of the most recent pass
    since: Option<Instant>,
}

/// Orchestrates sync passes between the local store and the remote snapshot
pub struct SyncEngine {
    store: SharedStore,
    remote: Arc<dyn RemoteSnapshotClient>,
    container_id: String,
    client_id: ClientId,
    enabled: AtomicBool,
    status: watch::Sender<SyncStatus>,
    resolver: Mutex<ConflictResolver>,
    in_flight: StdMutex<InFlight>,
    last_error: StdMutex<Option<String>>,
}

impl SyncEngine {
    /// Create an engine that owns the store
    pub fn new(
        store: EntityStore,
        remote: Arc<dyn RemoteSnapshotClient>,
        container_id: impl Into<String>,
    ) -> Self {
        let client_id = store.client_id().clone();
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            store: store.into_shared(),
            remote,
            container_id: container_id.into(),
            client_id,
            enabled: AtomicBool::new(true),
            status,
            resolver: Mutex::new(ConflictResolver::new()),
            in_flight: StdMutex::new(InFlight::default()),
            last_error: StdMutex::new(None),
        }
    }

    /// The store, shared with the UI layer
    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    /// Watch status changes
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Message of the most recent failed pass, cleared by a successful one
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_configured(&self) -> bool {
        self.remote.is_configured()
    }

    /// Copy of the held conflict, if any
    pub async fn pending_conflict(&self) -> Option<PendingConflict> {
        self.resolver.lock().await.pending().cloned()
    }

    /// Run one sync pass
    ///
    /// Without `force` the call is skipped unless the engine is idle. With
    /// `force` it runs regardless of status; that is reserved for explicit
    /// user requests, conflict resolution and the exit guard.
    pub async fn sync(&self, force: bool) -> SyncResult<SyncReport> {
        if !self.is_enabled() {
            debug!("Sync disabled, skipping");
            return Ok(SyncReport::skipped());
        }
        if !self.remote.is_configured() {
            return Err(SyncError::NotConfigured);
        }
        let Some(epoch) = self.try_begin(force) else {
            debug!("Sync skipped, status is {}", self.status());
            return Ok(SyncReport::skipped());
        };

        let result = self.run_pass().await;
        self.finish(epoch, &result).await;
        result
    }

    /// Resolve the pending conflict and finish the interrupted write-back
    ///
    /// The choice applies to every conflicting entity. A forced pass runs
    /// right after so the resolution reaches the remote.
    pub async fn resolve_conflict(&self, choice: ConflictChoice) -> SyncResult<SyncReport> {
        {
            let mut resolver = self.resolver.lock().await;
            if !resolver.is_pending() {
                return Err(SyncError::NoPendingConflict);
            }
            let mut store = self.store.lock().await;
            store.reload_if_changed()?;
            let resolved = resolver
                .resolution(choice, &self.client_id, store.snapshot())
                .ok_or(SyncError::NoPendingConflict)?;
            store.apply_merge(&resolved.updates)?;
            drop(store);
            resolver.clear();
            info!(
                "Resolved conflict keeping {} copies of {} entities",
                choice,
                resolved.updates.len()
            );
        }

        if self.status() == SyncStatus::Conflict {
            self.status.send_replace(SyncStatus::Idle);
        }
        self.sync(true).await
    }

    /// Reset a pass that has been marked in flight for longer than `threshold`
    ///
    /// Returns whether a reset happened.
    pub fn recover_if_stuck(&self, threshold: Duration) -> bool {
        let reset = self.status.send_if_modified(|status| {
            if *status != SyncStatus::Syncing {
                return false;
            }
            let mut passes = lock(&self.in_flight);
            let stuck = passes
                .since
                .map_or(true, |started| started.elapsed() >= threshold);
            if !stuck {
                return false;
            }
            passes.count = 0;
            passes.epoch += 1;
            passes.since = None;
            *status = SyncStatus::Idle;
            true
        });
        if reset {
            warn!("Sync marked in flight for over {:?}, reset to idle", threshold);
        }
        reset
    }

    /// Check the remote credentials
    ///
    /// Rejected credentials move the engine to the error state; accepted
    /// ones move it back out.
    pub async fn check_credentials(&self) -> SyncResult<bool> {
        if !self.remote.is_configured() {
            return Ok(false);
        }
        match self.remote.check_token_validity().await {
            Ok(true) => {
                self.leave_error_state();
                Ok(true)
            }
            Ok(false) | Err(SyncError::AuthExpired) => {
                self.mark_auth_expired();
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Leave the error state after the user signed in again
    pub fn reauthenticated(&self) {
        *lock(&self.last_error) = None;
        self.leave_error_state();
    }

    fn leave_error_state(&self) {
        let changed = self.status.send_if_modified(|status| {
            if *status == SyncStatus::Error {
                *status = SyncStatus::Idle;
                true
            } else {
                false
            }
        });
        if changed {
            *lock(&self.last_error) = None;
            info!("Credentials accepted, sync resumed");
        }
    }

    /// Disconnect from the remote, optionally deleting this container's data
    pub async fn logout(&self, purge_remote: bool) -> SyncResult<()> {
        self.remote.logout(&self.container_id, purge_remote).await?;
        self.set_enabled(false);
        self.resolver.lock().await.clear();
        self.status.send_replace(SyncStatus::Idle);
        info!("Logged out of remote store");
        Ok(())
    }

    /// Claim an in-flight slot, returning the epoch the pass runs under
    fn try_begin(&self, force: bool) -> Option<u64> {
        let mut epoch = None;
        self.status.send_if_modified(|status| {
            if !force && *status != SyncStatus::Idle {
                return false;
            }
            let mut passes = lock(&self.in_flight);
            passes.count += 1;
            passes.since = Some(Instant::now());
            epoch = Some(passes.epoch);
            *status = SyncStatus::Syncing;
            true
        });
        epoch
    }

    async fn finish(&self, epoch: u64, result: &SyncResult<SyncReport>) {
        let conflict_pending = self.resolver.lock().await.is_pending();
        let next = match result {
            Err(SyncError::AuthExpired) => SyncStatus::Error,
            _ if conflict_pending => SyncStatus::Conflict,
            _ => SyncStatus::Idle,
        };

        match result {
            Ok(_) => *lock(&self.last_error) = None,
            Err(e) => {
                if e.is_transient() {
                    debug!("Sync pass failed, will retry: {}", e);
                } else {
                    warn!("Sync pass failed: {}", e);
                }
                *lock(&self.last_error) = Some(e.to_string());
            }
        }

        let settled = self.status.send_if_modified(|status| {
            let mut passes = lock(&self.in_flight);
            if passes.epoch != epoch {
                return false;
            }
            passes.count = passes.count.saturating_sub(1);
            if passes.count > 0 {
                return false;
            }
            passes.since = None;
            *status = next;
            true
        });
        if !settled {
            debug!("Another pass is still in flight, staying {}", self.status());
        }
    }

    fn mark_auth_expired(&self) {
        warn!("Remote credentials rejected, suspending sync");
        *lock(&self.last_error) = Some(SyncError::AuthExpired.to_string());
        self.status.send_replace(SyncStatus::Error);
    }

    async fn run_pass(&self) -> SyncResult<SyncReport> {
        let fetched = self.fetch_remote().await?;
        let remote_exists = fetched.is_some();
        let remote = fetched.unwrap_or_default();

        // Reconcile and apply under one lock so no local edit interleaves
        let (local, reconciliation, upload) = {
            let mut store = self.store.lock().await;
            store.reload_if_changed()?;
            let local = store.local_snapshot();
            let reconciliation = reconcile(&local, &remote, &self.client_id);
            store.apply_merge(&reconciliation.local_updates(&local))?;
            let upload = reconciliation.upload_snapshot(&remote, &self.client_id);
            (local, reconciliation, upload)
        };

        let deleted: Vec<EntityId> = reconciliation
            .merged
            .deleted_item_ids
            .difference(&local.deleted_item_ids)
            .cloned()
            .collect();

        if reconciliation.has_conflicts() {
            warn!(
                "{} entities changed both here and remotely, holding for resolution",
                reconciliation.conflicts.len()
            );
            self.resolver.lock().await.hold(
                local.clone(),
                remote.clone(),
                reconciliation.conflicts.clone(),
            );
        }

        let wrote_remote = if remote_exists && upload == remote {
            debug!("Remote snapshot already up to date");
            false
        } else {
            self.remote
                .write_snapshot(&self.container_id, &upload)
                .await?;
            true
        };

        let acknowledgements = reconciliation.acknowledgements(&local, &upload);
        if !acknowledgements.is_empty() {
            self.store.lock().await.apply_merge(&acknowledgements)?;
        }

        let outcome = if reconciliation.has_conflicts() {
            SyncOutcome::Conflict
        } else if wrote_remote || !reconciliation.adopted.is_empty() || !deleted.is_empty() {
            SyncOutcome::Merged
        } else {
            SyncOutcome::UpToDate
        };

        info!(
            "Sync pass done: {} adopted, {} pushed, {} deleted, {} conflicts",
            reconciliation.adopted.len(),
            reconciliation.pushes.len(),
            deleted.len(),
            reconciliation.conflicts.len()
        );

        Ok(SyncReport {
            outcome,
            adopted: reconciliation.adopted,
            pushed: reconciliation.pushes,
            conflicts: reconciliation.conflicts,
            deleted,
            wrote_remote,
        })
    }

    async fn fetch_remote(&self) -> SyncResult<Option<Snapshot>> {
        let Some(handle) = self.remote.find_snapshot_handle(&self.container_id).await? else {
            debug!("No remote snapshot for container {}", self.container_id);
            return Ok(None);
        };
        let snapshot = self.remote.read_snapshot(&handle).await?;
        Ok(Some(snapshot))
    }

    #[cfg(test)]
    pub(crate) fn force_status(&self, status: SyncStatus) {
        if status == SyncStatus::Syncing {
            lock(&self.in_flight).since = Some(Instant::now());
        }
        self.status.send_replace(status);
    }
}
