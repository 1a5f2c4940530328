//! Snapshot sync with a remote store
//!
//! The whole notebook tree travels as one JSON snapshot. Each pass reads the
//! remote copy, reconciles it entity by entity against the local store, and
//! writes the merged result back.
//!
//! ## Usage
//!
//! ```ignore
//! let remote = sync::remote_from_config(&config)?.context("no remote")?;
//! let engine = Arc::new(SyncEngine::new(store, remote, &config.container_id));
//! let scheduler = Scheduler::start(engine.clone(), SchedulerConfig::from_config(&config)).await;
//! ```

mod conflict;
mod directory;
mod engine;
mod error;
mod http;
mod reconcile;
mod remote;
mod scheduler;

use std::sync::Arc;

pub use conflict::{ConflictChoice, ConflictEntry, ConflictResolver, PendingConflict, ResolvedConflict};
pub use directory::DirectoryRemote;
pub use engine::{SyncEngine, SyncOutcome, SyncReport, SyncStatus};
pub use error::{SyncError, SyncResult};
pub use http::HttpRemote;
pub use reconcile::{reconcile, stamp_push, Classification, Reconciliation};
pub use remote::{
    InjectedFailure, MemoryRemote, RemoteSnapshotClient, SnapshotHandle, SNAPSHOT_FILE_NAME,
};
pub use scheduler::{Scheduler, SchedulerConfig};

use crate::config::Config;

/// Build the remote client described by the configuration
///
/// An HTTP endpoint takes precedence over a shared directory. Returns
/// `None` when neither is configured.
pub fn remote_from_config(config: &Config) -> SyncResult<Option<Arc<dyn RemoteSnapshotClient>>> {
    if let Some(url) = &config.remote_url {
        let remote = HttpRemote::new(url, config.remote_token.clone())?;
        return Ok(Some(Arc::new(remote)));
    }
    if let Some(dir) = &config.remote_dir {
        return Ok(Some(Arc::new(DirectoryRemote::new(dir))));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_remote_configured() {
        let config = Config::default();
        assert!(remote_from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_url_takes_precedence() {
        let config = Config {
            remote_dir: Some("/tmp/folio-remote".into()),
            remote_url: Some("https://sync.example.com".into()),
            remote_token: None,
            ..Config::default()
        };
        let remote = remote_from_config(&config).unwrap().unwrap();
        // The HTTP client is not usable without a token
        assert!(!remote.is_configured());
    }

    #[test]
    fn test_directory_remote() {
        let config = Config {
            remote_dir: Some("/tmp/folio-remote".into()),
            ..Config::default()
        };
        let remote = remote_from_config(&config).unwrap().unwrap();
        assert!(remote.is_configured());
    }
}
