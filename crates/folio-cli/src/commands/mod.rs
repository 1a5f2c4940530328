//! Command handlers
//!
//! Store commands are plain functions over `&mut EntityStore`; `main`
//! takes the store lock and runs sync around them.

pub mod config;
pub mod folder;
pub mod notebook;
pub mod page;
pub mod status;
pub mod sync;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::debug;

use folio_core::sync::{remote_from_config, SyncEngine};
use folio_core::{Config, EntityId, EntityKind, EntityStore, Placement, SharedStore};

use crate::output::{short_id, Output};

/// Everything a command needs: configuration, the store and the sync engine
pub struct Session {
    pub config: Config,
    pub store: SharedStore,
    pub engine: Option<Arc<SyncEngine>>,
}

impl Session {
    /// Open the local store and, when a remote is configured, the sync engine
    pub fn open(config: Config) -> Result<Self> {
        let store = EntityStore::open_with_config(&config)?;
        let remote = remote_from_config(&config).context("Failed to set up remote store")?;

        let (store, engine) = match remote {
            Some(remote) => {
                let engine = SyncEngine::new(store, remote, config.container_id.clone());
                engine.set_enabled(config.sync_enabled);
                (engine.store(), Some(Arc::new(engine)))
            }
            None => (store.into_shared(), None),
        };

        Ok(Self {
            config,
            store,
            engine,
        })
    }

    /// The sync engine, or an error explaining how to configure one
    pub fn engine(&self) -> Result<&Arc<SyncEngine>> {
        match &self.engine {
            Some(engine) => Ok(engine),
            None => bail!(
                "No remote store configured. Set one with:\n  \
                 folio config set remote_dir /path/to/shared/folder\n  \
                 or\n  \
                 folio config set remote_url https://your-server/api"
            ),
        }
    }

    /// Sync if enabled, reporting failures without aborting the command
    pub async fn auto_sync(&self, output: &Output) {
        let Some(engine) = &self.engine else {
            return;
        };
        if !self.config.sync_enabled {
            return;
        }

        match engine.sync(false).await {
            Ok(report) => debug!("Auto-sync: {:?}", report.outcome),
            Err(e) => {
                if !output.is_quiet() {
                    eprintln!("⚠ Auto-sync failed: {}", e);
                }
            }
        }
    }
}

/// Resolve a full id or unique prefix to an entity id
///
/// With `kind` set, only entities of that kind are considered.
pub fn resolve_id(store: &EntityStore, id: &str, kind: Option<EntityKind>) -> Result<EntityId> {
    if let Some(entity) = store.get(id) {
        if kind.map_or(true, |k| entity.kind() == k) {
            return Ok(entity.id().to_string());
        }
    }

    let snapshot = store.snapshot();
    let candidates = snapshot
        .notebooks
        .iter()
        .map(|n| (EntityKind::Notebook, n.id.as_str(), n.name.as_str()))
        .chain(
            snapshot
                .folders
                .values()
                .map(|f| (EntityKind::Folder, f.id.as_str(), f.name.as_str())),
        )
        .chain(
            snapshot
                .pages
                .values()
                .map(|p| (EntityKind::Page, p.id.as_str(), p.name.as_str())),
        );

    let matches: Vec<_> = candidates
        .filter(|(k, candidate, _)| kind.map_or(true, |want| *k == want) && candidate.starts_with(id))
        .collect();

    let what = kind.map_or_else(|| "entity".to_string(), |k| k.to_string());
    match matches.len() {
        0 => {
            if store.is_deleted(id) {
                bail!("{} {} has been deleted", what, id);
            }
            bail!("No {} found matching: {}", what, id)
        }
        1 => Ok(matches[0].1.to_string()),
        _ => {
            eprintln!("Multiple entries match '{}':", id);
            for (k, candidate, name) in &matches {
                eprintln!("  {} {} - {}", k, short_id(candidate), name);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}

/// Work out where a new folder or page goes
///
/// `--folder` wins over `--notebook`; with neither, the active notebook is
/// used.
pub fn placement(
    store: &EntityStore,
    notebook: Option<&str>,
    folder: Option<&str>,
) -> Result<Placement> {
    if let Some(folder) = folder {
        return Ok(Placement::InFolder(resolve_id(
            store,
            folder,
            Some(EntityKind::Folder),
        )?));
    }
    if let Some(notebook) = notebook {
        return Ok(Placement::InNotebook(resolve_id(
            store,
            notebook,
            Some(EntityKind::Notebook),
        )?));
    }
    match &store.active_state().active_notebook_id {
        Some(active) if store.notebook(active).is_some() => {
            Ok(Placement::InNotebook(active.clone()))
        }
        _ => bail!("No active notebook. Pass --notebook <id> or open a notebook with `folio open`."),
    }
}
