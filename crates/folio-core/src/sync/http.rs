//! Remote store served over HTTP
//!
//! Expects a small file API:
//!
//! - `HEAD|GET|PUT|DELETE {base}/containers/{container}/files/{name}`
//! - `GET {base}/session` answers 2xx while the bearer token is accepted
//!
//! 401 and 403 mean the session expired. Transport failures and 5xx
//! responses are transient.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, info};

use super::error::{SyncError, SyncResult};
use super::remote::{RemoteSnapshotClient, SnapshotHandle, SNAPSHOT_FILE_NAME};
use crate::models::Snapshot;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpRemote {
    client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl HttpRemote {
    pub fn new(base_url: &str, token: Option<String>) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::TransientNetwork(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(token),
        })
    }

    /// Replace the bearer token after the user signs in again
    pub fn set_token(&self, token: Option<String>) {
        *self.token_mut() = token;
    }

    fn token(&self) -> RwLockReadGuard<'_, Option<String>> {
        self.token.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn token_mut(&self) -> RwLockWriteGuard<'_, Option<String>> {
        self.token.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn file_url(&self, container_id: &str) -> String {
        format!(
            "{}/containers/{}/files/{}",
            self.base_url, container_id, SNAPSHOT_FILE_NAME
        )
    }

    fn session_url(&self) -> String {
        format!("{}/session", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> SyncResult<RequestBuilder> {
        match self.token().as_deref() {
            Some(token) => Ok(request.bearer_auth(token)),
            None => Err(SyncError::NotConfigured),
        }
    }

    async fn send(&self, request: RequestBuilder) -> SyncResult<Response> {
        self.authorized(request)?
            .send()
            .await
            .map_err(|e| SyncError::TransientNetwork(e.to_string()))
    }
}

/// Map a non-success HTTP status to a sync error
fn status_error(status: StatusCode) -> Option<SyncError> {
    if status.is_success() {
        None
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Some(SyncError::AuthExpired)
    } else {
        Some(SyncError::TransientNetwork(format!("HTTP {}", status)))
    }
}

fn check(response: Response) -> SyncResult<Response> {
    match status_error(response.status()) {
        Some(err) => Err(err),
        None => Ok(response),
    }
}

#[async_trait]
impl RemoteSnapshotClient for HttpRemote {
    fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && self.token().is_some()
    }

    async fn find_snapshot_handle(&self, container_id: &str) -> SyncResult<Option<SnapshotHandle>> {
        let url = self.file_url(container_id);
        let response = self.send(self.client.head(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("No remote snapshot at {}", url);
            return Ok(None);
        }
        check(response)?;
        Ok(Some(SnapshotHandle::new(url)))
    }

    async fn read_snapshot(&self, handle: &SnapshotHandle) -> SyncResult<Snapshot> {
        let response = check(self.send(self.client.get(handle.as_str())).await?)?;
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::TransientNetwork(e.to_string()))?;
        Ok(Snapshot::from_json(&body)?)
    }

    async fn write_snapshot(
        &self,
        container_id: &str,
        snapshot: &Snapshot,
    ) -> SyncResult<SnapshotHandle> {
        let url = self.file_url(container_id);
        check(self.send(self.client.put(&url).json(snapshot)).await?)?;
        debug!("Uploaded snapshot to {}", url);
        Ok(SnapshotHandle::new(url))
    }

    async fn check_token_validity(&self) -> SyncResult<bool> {
        if self.token().is_none() {
            return Ok(false);
        }
        let response = self.send(self.client.get(self.session_url())).await?;
        match status_error(response.status()) {
            None => Ok(true),
            Some(SyncError::AuthExpired) => Ok(false),
            Some(err) => Err(err),
        }
    }

    async fn logout(&self, container_id: &str, purge_remote: bool) -> SyncResult<()> {
        if purge_remote {
            let response = self.send(self.client.delete(self.file_url(container_id))).await?;
            if response.status() != StatusCode::NOT_FOUND {
                check(response)?;
            }
            info!("Purged remote snapshot for container {}", container_id);
        }
        self.set_token(None);
        Ok(())
    }
}
