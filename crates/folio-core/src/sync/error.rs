//! Sync error types

use thiserror::Error;

use crate::models::InvalidSnapshot;
use crate::storage::StorageError;

/// Errors raised while talking to the remote store or merging its data
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or server trouble; retried on the next scheduled cycle
    #[error("Remote store unavailable: {0}")]
    TransientNetwork(String),

    /// Credentials rejected; sync stays suspended until re-authentication
    #[error("Remote session expired. Sign in again to resume syncing.")]
    AuthExpired,

    /// The remote document could not be parsed or has the wrong shape
    #[error("Remote snapshot is corrupt: {0}")]
    CorruptRemoteSnapshot(String),

    #[error("No remote store is configured")]
    NotConfigured,

    #[error("No conflict is waiting to be resolved")]
    NoPendingConflict,

    /// Applying merge results to the local store failed
    #[error("Local store error: {0}")]
    Storage(#[from] StorageError),
}

impl From<InvalidSnapshot> for SyncError {
    fn from(err: InvalidSnapshot) -> Self {
        SyncError::CorruptRemoteSnapshot(err.to_string())
    }
}

impl SyncError {
    /// Whether a later retry may succeed without user action
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientNetwork(_))
    }

    /// Whether the user has to sign in again
    pub fn requires_reauth(&self) -> bool {
        matches!(self, SyncError::AuthExpired)
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;
