//! Client identity management
//!
//! Every installation gets a stable random client id on first run. The id
//! is only used to attribute writes (`lastModifier`) and to tell this
//! client's own remote writes apart from other clients'; it never acts as
//! an ownership lock.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::models::ClientId;
use crate::storage::{atomic_write, FileAction, StorageError, StorageResult};

/// Identity manager for Folio
pub struct Identity {
    config: Config,
}

/// Result of initialization
#[derive(Debug)]
pub struct InitResult {
    /// The client id of this installation
    pub client_id: ClientId,
    /// Whether the id was just generated
    pub is_new: bool,
}

impl Identity {
    /// Create an identity manager with default configuration
    pub fn new() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        Ok(Self::with_config(config))
    }

    /// Create an identity manager with specific configuration
    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    /// Check if a client id has been generated for this installation
    pub fn is_initialized(&self) -> bool {
        self.config.client_id_path().exists()
    }

    /// Get the data directory path (for display purposes)
    pub fn data_dir(&self) -> &PathBuf {
        &self.config.data_dir
    }

    /// Read the stored client id, if any
    pub fn client_id(&self) -> StorageResult<Option<ClientId>> {
        let path = self.config.client_id_path();
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| StorageError::io(FileAction::Read, &path, e))?;
        let id = content.trim();
        if id.is_empty() {
            return Ok(None);
        }
        Ok(Some(ClientId::from(id)))
    }

    /// Generate and store a client id
    ///
    /// Returns an error if already initialized.
    pub fn initialize(&self) -> Result<InitResult> {
        if self.is_initialized() {
            anyhow::bail!("Already initialized. Use `folio status` to see your client id.");
        }

        let client_id = ClientId::generate();
        self.store(&client_id)
            .context("Failed to save client id")?;
        info!("Generated client id {}", client_id);

        Ok(InitResult {
            client_id,
            is_new: true,
        })
    }

    /// Return the stored client id, generating one on first use
    pub fn load_or_create(&self) -> StorageResult<ClientId> {
        if let Some(id) = self.client_id()? {
            return Ok(id);
        }

        let client_id = ClientId::generate();
        self.store(&client_id)?;
        info!("Generated client id {}", client_id);
        Ok(client_id)
    }

    fn store(&self, client_id: &ClientId) -> StorageResult<()> {
        atomic_write(&self.config.client_id_path(), client_id.as_str().as_bytes())
    }
}
