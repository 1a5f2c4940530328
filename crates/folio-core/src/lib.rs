//! Folio Core Library
//!
//! Local-first storage and sync for Folio, a notebook editor whose content
//! lives in notebooks, nested folders and pages.
//!
//! # Architecture
//!
//! - The local store is the source of truth for the UI. Every edit marks the
//!   entity dirty and is persisted to a JSON file right away.
//! - Sync exchanges one snapshot document with a remote store and merges it
//!   per entity using version counters, tombstones and a dirty flag.
//!   Conflicts are held for the user instead of being merged silently.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let mut store = EntityStore::open_with_config(&config)?;
//!
//! let notebook = store.create_notebook("Work")?;
//! store.create_page("Ideas", Placement::InNotebook(notebook.id.clone()))?;
//! ```
//!
//! # Modules
//!
//! - `store`: Local entity store (main entry point)
//! - `models`: Notebooks, folders, pages and the snapshot format
//! - `sync`: Reconciliation, remote clients, the sync engine and scheduler
//! - `storage`: JSON persistence
//! - `identity`: Per-installation client id
//! - `config`: Application configuration

pub mod config;
pub mod identity;
pub mod models;
pub mod storage;
pub mod store;
pub mod sync;

pub use config::Config;
pub use identity::{Identity, InitResult};
pub use models::{
    ActiveState, ClientId, Entity, EntityId, EntityKind, Folder, Notebook, Page, Snapshot,
};
pub use storage::{SnapshotPersistence, StorageError};
pub use store::{EntityStore, MergeUpdate, Placement, SharedStore, StoreEvent};
