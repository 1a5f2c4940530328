//! Storage layer
//!
//! Handles local persistence of the entity store.
//!
//! The store's full snapshot is written as a single JSON file using atomic
//! writes, in the same shape that is exchanged with the remote store.

pub mod error;
pub mod persistence;

pub use error::{FileAction, StorageError, StorageResult};
pub use persistence::SnapshotPersistence;

pub(crate) use persistence::atomic_write;
