//! Entity store
//!
//! The `EntityStore` owns the local snapshot of notebooks, folders and pages.
//! It is mutated by the UI layer (local edits, which mark entities dirty)
//! and by the sync engine (`apply_merge`, which adopts remote copies,
//! records tombstones and acknowledges pushes).
//!
//! Every mutation is persisted to disk and announced on a broadcast channel
//! so the sync scheduler can react to local edits without polling.
//!
//! ## Usage
//!
//! ```ignore
//! let mut store = EntityStore::open_with_config(&config)?;
//!
//! let notebook = store.create_notebook("Work")?;
//! let page = store.create_page("Plan", Placement::InNotebook(notebook.id.clone()))?;
//! store.set_page_content(&page.id, serde_json::json!({"shapes": []}))?;
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::config::Config;
use crate::identity::Identity;
use crate::models::{
    is_inherited_color, ActiveState, ClientId, Entity, EntityId, EntityKind, Folder, Notebook,
    Page, Snapshot,
};
use crate::storage::{SnapshotPersistence, StorageError, StorageResult};

/// Capacity of the store event channel
const EVENT_CAPACITY: usize = 256;

/// Store shared between the UI layer and the sync engine
pub type SharedStore = Arc<Mutex<EntityStore>>;

/// Change notifications emitted by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A local edit created or changed an entity (it is now dirty)
    EntityChanged { id: EntityId, kind: EntityKind },
    /// A local delete tombstoned an entity
    EntityDeleted { id: EntityId },
    /// The active cursor moved
    ActiveStateChanged,
    /// The sync engine applied merge results
    MergeApplied,
    /// Changes saved by another process were folded in
    ReloadedFromDisk,
}

impl StoreEvent {
    /// Whether this event came from a local edit that should trigger a sync
    pub fn is_local_mutation(&self) -> bool {
        !matches!(self, StoreEvent::MergeApplied)
    }
}

/// Where a folder or page lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Directly under a notebook
    InNotebook(EntityId),
    /// Inside a folder (the notebook is derived from the folder)
    InFolder(EntityId),
}

/// One per-entity update produced by the sync engine
#[derive(Debug, Clone, PartialEq)]
pub enum MergeUpdate {
    /// Overwrite (or insert) with the given copy
    Replace(Entity),
    /// Remove the entity and record its tombstone
    Tombstone(EntityId),
    /// The remote accepted `pushed`, which was stamped from `base`
    Acknowledge { pushed: Entity, base: Entity },
    /// Replace the active-cursor record
    ActiveState(ActiveState),
}

/// Current time at the precision the snapshot format stores
fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Local entity store
pub struct EntityStore {
    snapshot: Snapshot,
    client_id: ClientId,
    persistence: Option<SnapshotPersistence>,
    events: broadcast::Sender<StoreEvent>,
}

impl EntityStore {
    /// Create an empty store that is never written to disk
    pub fn in_memory(client_id: ClientId) -> Self {
        Self::from_snapshot(Snapshot::default(), client_id)
    }

    /// Create an in-memory store seeded with a snapshot
    pub fn from_snapshot(snapshot: Snapshot, client_id: ClientId) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            snapshot,
            client_id,
            persistence: None,
            events,
        }
    }

    /// Open the store from the configured data directory
    ///
    /// Generates the client id on first run and starts from an empty
    /// snapshot when no store file exists yet.
    pub fn open_with_config(config: &Config) -> Result<Self> {
        let client_id = Identity::with_config(config.clone())
            .load_or_create()
            .context("Failed to load client id")?;
        let persistence = SnapshotPersistence::from_config(config);
        Self::open(persistence, client_id).context("Failed to open local store")
    }

    /// Open a store backed by a specific persistence handler
    pub fn open(mut persistence: SnapshotPersistence, client_id: ClientId) -> StorageResult<Self> {
        let snapshot = persistence.load()?.unwrap_or_default();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        debug!(
            "Opened store at {:?} with {} entities",
            persistence.path(),
            snapshot.entity_count()
        );
        Ok(Self {
            snapshot,
            client_id,
            persistence: Some(persistence),
            events,
        })
    }

    /// Wrap the store for sharing with the sync engine
    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Read-only view of the current snapshot
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Copy of the current snapshot, for reconciliation
    pub fn local_snapshot(&self) -> Snapshot {
        self.snapshot.clone()
    }

    /// Fold in whatever another process saved to the store file since this
    /// store last read or wrote it
    ///
    /// Several `folio` processes share one data directory, so this runs
    /// before every save. Returns whether the file was read.
    pub fn reload_if_changed(&mut self) -> StorageResult<bool> {
        let Some(persistence) = self.persistence.as_mut() else {
            return Ok(false);
        };
        if !persistence.changed_on_disk() {
            return Ok(false);
        }
        let Some(disk) = persistence.load()? else {
            return Ok(false);
        };

        debug!("Store file changed on disk, merging {} entities", disk.entity_count());
        self.snapshot = absorb_external(&self.snapshot, disk);
        let _ = self.events.send(StoreEvent::ReloadedFromDisk);
        Ok(true)
    }

    // ==================== Queries ====================

    /// Notebooks sorted by their `order` key
    pub fn notebooks(&self) -> Vec<&Notebook> {
        let mut notebooks: Vec<&Notebook> = self.snapshot.notebooks.iter().collect();
        notebooks.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        notebooks
    }

    pub fn notebook(&self, id: &str) -> Option<&Notebook> {
        self.snapshot.notebook(id)
    }

    pub fn folder(&self, id: &str) -> Option<&Folder> {
        self.snapshot.folders.get(id)
    }

    pub fn page(&self, id: &str) -> Option<&Page> {
        self.snapshot.pages.get(id)
    }

    pub fn get(&self, id: &str) -> Option<Entity> {
        self.snapshot.entity(id)
    }

    /// Folders owned by a notebook, sorted by `order`
    pub fn folders_in(&self, notebook_id: &str) -> Vec<&Folder> {
        let mut folders: Vec<&Folder> = self
            .snapshot
            .folders
            .values()
            .filter(|f| f.notebook_id == notebook_id)
            .collect();
        folders.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        folders
    }

    /// Pages owned by a notebook
    pub fn pages_in(&self, notebook_id: &str) -> Vec<&Page> {
        self.snapshot
            .pages
            .values()
            .filter(|p| p.notebook_id == notebook_id)
            .collect()
    }

    pub fn active_state(&self) -> &ActiveState {
        &self.snapshot.active
    }

    pub fn is_deleted(&self, id: &str) -> bool {
        self.snapshot.is_tombstoned(id)
    }

    /// Number of entities with unsynced local changes
    pub fn dirty_count(&self) -> usize {
        self.snapshot.dirty_ids().len()
    }

    pub fn has_unsynced_changes(&self) -> bool {
        self.dirty_count() > 0
    }

    /// Effective color of an entity, following `auto`/`black` up the tree
    pub fn resolved_color(&self, id: &str) -> Option<String> {
        let mut current = self.snapshot.entity(id)?;
        // Bounded walk: remote data may contain parent cycles
        for _ in 0..=self.snapshot.entity_count() {
            let (color, parent) = current.color_and_parent();
            if !is_inherited_color(color) {
                return color.map(str::to_string);
            }
            let parent = parent?.to_string();
            current = self.snapshot.entity(&parent)?;
        }
        None
    }

    // ==================== Local edits ====================

    /// Create a notebook at the end of the notebook list
    pub fn create_notebook(&mut self, name: &str) -> StorageResult<Notebook> {
        let mut notebook = Notebook::new(name, &self.client_id);
        notebook.order = self
            .snapshot
            .notebooks
            .iter()
            .map(|n| n.order + 1)
            .max()
            .unwrap_or(0);
        self.snapshot.notebooks.push(notebook.clone());
        self.commit(StoreEvent::EntityChanged {
            id: notebook.id.clone(),
            kind: EntityKind::Notebook,
        })?;
        Ok(notebook)
    }

    /// Create a folder at the given placement
    pub fn create_folder(&mut self, name: &str, placement: Placement) -> StorageResult<Folder> {
        let (notebook_id, parent_id) = self.resolve_placement(&placement)?;
        let mut folder = Folder::new(name, notebook_id, parent_id, &self.client_id);
        folder.order = self
            .snapshot
            .folders
            .values()
            .filter(|f| f.notebook_id == folder.notebook_id && f.parent_id == folder.parent_id)
            .map(|f| f.order + 1)
            .max()
            .unwrap_or(0);
        self.snapshot.folders.insert(folder.id.clone(), folder.clone());
        self.commit(StoreEvent::EntityChanged {
            id: folder.id.clone(),
            kind: EntityKind::Folder,
        })?;
        Ok(folder)
    }

    /// Create an empty page at the given placement
    pub fn create_page(&mut self, name: &str, placement: Placement) -> StorageResult<Page> {
        let (notebook_id, parent_id) = self.resolve_placement(&placement)?;
        let page = Page::new(name, notebook_id, parent_id, &self.client_id);
        self.snapshot.pages.insert(page.id.clone(), page.clone());
        self.commit(StoreEvent::EntityChanged {
            id: page.id.clone(),
            kind: EntityKind::Page,
        })?;
        Ok(page)
    }

    pub fn rename(&mut self, id: &str, name: &str) -> StorageResult<()> {
        self.edit(id, |entity| match entity {
            EntityMut::Notebook(n) => n.name = name.to_string(),
            EntityMut::Folder(f) => f.name = name.to_string(),
            EntityMut::Page(p) => p.name = name.to_string(),
        })
    }

    pub fn set_color(&mut self, id: &str, color: Option<String>) -> StorageResult<()> {
        self.edit(id, |entity| match entity {
            EntityMut::Notebook(n) => n.color = color,
            EntityMut::Folder(f) => f.color = color,
            EntityMut::Page(p) => p.color = color,
        })
    }

    /// Change the sort key of a notebook or folder
    pub fn set_order(&mut self, id: &str, order: i64) -> StorageResult<()> {
        if self.snapshot.pages.contains_key(id) {
            return Err(StorageError::InvalidMove {
                details: format!("page '{}' has no sort order", id),
            });
        }
        self.edit(id, |entity| match entity {
            EntityMut::Notebook(n) => n.order = order,
            EntityMut::Folder(f) => f.order = order,
            EntityMut::Page(_) => {}
        })
    }

    /// Replace a page's canvas content
    pub fn set_page_content(&mut self, id: &str, content: serde_json::Value) -> StorageResult<()> {
        if !self.snapshot.pages.contains_key(id) {
            return Err(self.missing(id));
        }
        self.edit(id, |entity| {
            if let EntityMut::Page(p) = entity {
                p.content = content;
            }
        })
    }

    /// Move a folder or page to a new placement
    ///
    /// Moving a folder re-derives `notebookId` for its whole subtree.
    pub fn move_entity(&mut self, id: &str, placement: Placement) -> StorageResult<()> {
        self.ensure_live(id)?;
        let (notebook_id, parent_id) = self.resolve_placement(&placement)?;

        if self.snapshot.folders.contains_key(id) {
            let subtree = self.folder_subtree(id);
            if let Some(parent) = &parent_id {
                if subtree.contains(parent) {
                    return Err(StorageError::InvalidMove {
                        details: format!("folder '{}' cannot be moved into its own subtree", id),
                    });
                }
            }
            if let Some(folder) = self.snapshot.folders.get_mut(id) {
                folder.parent_id = parent_id;
                folder.notebook_id = notebook_id.clone();
                folder.dirty = true;
            }
            let mut events = vec![StoreEvent::EntityChanged {
                id: id.to_string(),
                kind: EntityKind::Folder,
            }];
            events.extend(self.reassign_notebook(&subtree, id, &notebook_id));
            return self.commit_all(events);
        }

        match self.snapshot.pages.get_mut(id) {
            Some(page) => {
                page.parent_id = parent_id;
                page.notebook_id = notebook_id;
                page.dirty = true;
            }
            None => {
                return Err(StorageError::InvalidMove {
                    details: format!("notebook '{}' cannot be moved", id),
                })
            }
        }
        self.commit(StoreEvent::EntityChanged {
            id: id.to_string(),
            kind: EntityKind::Page,
        })
    }

    /// Delete an entity and everything it contains
    ///
    /// Every removed id is recorded in the tombstone set. Returns the ids
    /// that were removed.
    pub fn delete(&mut self, id: &str) -> StorageResult<Vec<EntityId>> {
        self.ensure_live(id)?;

        let mut doomed: BTreeSet<EntityId> = BTreeSet::new();
        doomed.insert(id.to_string());
        if self.snapshot.notebook(id).is_some() {
            doomed.extend(
                self.snapshot
                    .folders
                    .values()
                    .filter(|f| f.notebook_id == id)
                    .map(|f| f.id.clone()),
            );
            doomed.extend(
                self.snapshot
                    .pages
                    .values()
                    .filter(|p| p.notebook_id == id)
                    .map(|p| p.id.clone()),
            );
        } else if self.snapshot.folders.contains_key(id) {
            let subtree = self.folder_subtree(id);
            doomed.extend(
                self.snapshot
                    .pages
                    .values()
                    .filter(|p| p.parent_id.as_ref().is_some_and(|parent| subtree.contains(parent)))
                    .map(|p| p.id.clone()),
            );
            doomed.extend(subtree);
        }

        for doomed_id in &doomed {
            self.snapshot.remove(doomed_id);
            self.snapshot.deleted_item_ids.insert(doomed_id.clone());
        }

        let mut events: Vec<StoreEvent> = doomed
            .iter()
            .map(|id| StoreEvent::EntityDeleted { id: id.clone() })
            .collect();

        let active = &mut self.snapshot.active;
        let notebook_gone = active.active_notebook_id.as_ref().is_some_and(|n| doomed.contains(n));
        let page_gone = active.active_page_id.as_ref().is_some_and(|p| doomed.contains(p));
        if notebook_gone || page_gone {
            if notebook_gone {
                active.active_notebook_id = None;
            }
            active.active_page_id = None;
            active.updated_at = Some(now_millis());
            events.push(StoreEvent::ActiveStateChanged);
        }

        debug!("Deleted {} entities starting at {}", doomed.len(), id);
        self.commit_all(events)?;
        Ok(doomed.into_iter().collect())
    }

    /// Move the active cursor and stamp its timestamp
    pub fn set_active(
        &mut self,
        notebook_id: Option<EntityId>,
        page_id: Option<EntityId>,
    ) -> StorageResult<()> {
        for id in notebook_id.iter().chain(page_id.iter()) {
            self.ensure_live(id)?;
        }
        self.snapshot.active = ActiveState {
            active_notebook_id: notebook_id,
            active_page_id: page_id,
            updated_at: Some(now_millis()),
        };
        self.commit(StoreEvent::ActiveStateChanged)
    }

    /// Flag an entity as having unsynced changes
    pub fn mark_dirty(&mut self, id: &str) -> StorageResult<()> {
        self.edit(id, |_| {})
    }

    // ==================== Sync engine ====================

    /// Apply merge results from the sync engine
    ///
    /// The new snapshot is computed and persisted in full before it replaces
    /// the current one, so a failure leaves the store untouched. Tombstoned
    /// ids are never re-inserted.
    pub fn apply_merge(&mut self, updates: &[MergeUpdate]) -> StorageResult<()> {
        if updates.is_empty() {
            return Ok(());
        }

        self.reload_if_changed()?;
        let mut next = self.snapshot.clone();
        for update in updates {
            match update {
                MergeUpdate::Replace(entity) => {
                    if !next.is_tombstoned(entity.id()) {
                        next.upsert(entity.clone());
                    }
                }
                MergeUpdate::Tombstone(id) => {
                    next.remove(id);
                    next.deleted_item_ids.insert(id.clone());
                }
                MergeUpdate::Acknowledge { pushed, base } => match next.entity(pushed.id()) {
                    Some(current) if current == *base => next.upsert(pushed.clone()),
                    Some(mut current) => {
                        // Edited while the upload was in flight: keep the new
                        // content dirty on top of the acknowledged version.
                        current.set_version(pushed.version());
                        current.set_last_modifier(pushed.last_modifier().clone());
                        next.upsert(current);
                    }
                    None => {}
                },
                MergeUpdate::ActiveState(state) => next.active = state.clone(),
            }
        }

        if let Some(persistence) = self.persistence.as_mut() {
            persistence.save(&next)?;
        }
        self.snapshot = next;
        let _ = self.events.send(StoreEvent::MergeApplied);
        Ok(())
    }

    // ==================== Internals ====================

    fn missing(&self, id: &str) -> StorageError {
        if self.snapshot.is_tombstoned(id) {
            StorageError::Tombstoned { id: id.to_string() }
        } else {
            StorageError::UnknownEntity { id: id.to_string() }
        }
    }

    fn ensure_live(&self, id: &str) -> StorageResult<()> {
        if self.snapshot.contains(id) {
            Ok(())
        } else {
            Err(self.missing(id))
        }
    }

    /// Resolve a placement to `(notebook_id, parent_id)`
    fn resolve_placement(&self, placement: &Placement) -> StorageResult<(EntityId, Option<EntityId>)> {
        match placement {
            Placement::InNotebook(notebook_id) => match self.snapshot.notebook(notebook_id) {
                Some(n) => Ok((n.id.clone(), None)),
                None => Err(self.missing(notebook_id)),
            },
            Placement::InFolder(folder_id) => match self.snapshot.folders.get(folder_id) {
                Some(f) => Ok((f.notebook_id.clone(), Some(f.id.clone()))),
                None => Err(self.missing(folder_id)),
            },
        }
    }

    /// A folder and all folders nested below it
    fn folder_subtree(&self, root: &str) -> BTreeSet<EntityId> {
        let mut subtree = BTreeSet::new();
        subtree.insert(root.to_string());
        loop {
            let before = subtree.len();
            for folder in self.snapshot.folders.values() {
                if folder.parent_id.as_ref().is_some_and(|p| subtree.contains(p)) {
                    subtree.insert(folder.id.clone());
                }
            }
            if subtree.len() == before {
                return subtree;
            }
        }
    }

    /// Point everything below a moved folder at its new notebook
    fn reassign_notebook(
        &mut self,
        subtree: &BTreeSet<EntityId>,
        root: &str,
        notebook_id: &str,
    ) -> Vec<StoreEvent> {
        let mut events = Vec::new();
        for folder in self.snapshot.folders.values_mut() {
            if folder.id != root && subtree.contains(&folder.id) && folder.notebook_id != notebook_id {
                folder.notebook_id = notebook_id.to_string();
                folder.dirty = true;
                events.push(StoreEvent::EntityChanged {
                    id: folder.id.clone(),
                    kind: EntityKind::Folder,
                });
            }
        }
        for page in self.snapshot.pages.values_mut() {
            let inside = page.parent_id.as_ref().is_some_and(|p| subtree.contains(p));
            if inside && page.notebook_id != notebook_id {
                page.notebook_id = notebook_id.to_string();
                page.dirty = true;
                events.push(StoreEvent::EntityChanged {
                    id: page.id.clone(),
                    kind: EntityKind::Page,
                });
            }
        }
        events
    }

    /// Apply a local edit, mark the entity dirty and commit
    fn edit(&mut self, id: &str, f: impl FnOnce(EntityMut<'_>)) -> StorageResult<()> {
        let kind = if let Some(n) = self.snapshot.notebook_mut(id) {
            f(EntityMut::Notebook(n));
            n.dirty = true;
            EntityKind::Notebook
        } else if let Some(folder) = self.snapshot.folders.get_mut(id) {
            f(EntityMut::Folder(folder));
            folder.dirty = true;
            EntityKind::Folder
        } else if let Some(page) = self.snapshot.pages.get_mut(id) {
            f(EntityMut::Page(page));
            page.dirty = true;
            EntityKind::Page
        } else {
            return Err(self.missing(id));
        };

        self.commit(StoreEvent::EntityChanged {
            id: id.to_string(),
            kind,
        })
    }

    fn commit(&mut self, event: StoreEvent) -> StorageResult<()> {
        self.commit_all(vec![event])
    }

    fn commit_all(&mut self, events: Vec<StoreEvent>) -> StorageResult<()> {
        self.reload_if_changed()?;
        if let Some(persistence) = self.persistence.as_mut() {
            persistence.save(&self.snapshot)?;
        }
        for event in events {
            let _ = self.events.send(event);
        }
        Ok(())
    }
}

/// Fold a snapshot saved by another process into ours
///
/// Tombstones are unioned and always win. For an entity both sides hold,
/// an unsynced edit here is kept; otherwise the disk copy is taken when it
/// carries an unsynced edit or a newer synced version. A dirty disk copy
/// never goes below our version, so a push acknowledged here is not later
/// mistaken for a newer remote write.
fn absorb_external(ours: &Snapshot, disk: Snapshot) -> Snapshot {
    let Snapshot {
        notebooks,
        folders,
        pages,
        deleted_item_ids,
        active,
    } = disk;

    let mut merged = ours.clone();
    merged.deleted_item_ids.extend(deleted_item_ids);

    let entities = notebooks
        .into_iter()
        .map(Entity::from)
        .chain(folders.into_values().map(Entity::from))
        .chain(pages.into_values().map(Entity::from));
    for mut theirs in entities {
        if merged.is_tombstoned(theirs.id()) {
            continue;
        }
        match merged.entity(theirs.id()) {
            None => merged.upsert(theirs),
            Some(mine) if mine.is_dirty() => {}
            Some(mine) => {
                if theirs.is_dirty() && mine.version() > theirs.version() {
                    theirs.set_version(mine.version());
                    theirs.set_last_modifier(mine.last_modifier().clone());
                    merged.upsert(theirs);
                } else if theirs.is_dirty() || theirs.version() > mine.version() {
                    merged.upsert(theirs);
                }
            }
        }
    }

    let buried: Vec<EntityId> = merged
        .deleted_item_ids
        .iter()
        .filter(|id| merged.contains(id))
        .cloned()
        .collect();
    for id in buried {
        merged.remove(&id);
    }

    merged.active = ours.active.newer(&active).clone();
    merged
}

/// Mutable view of one entity during a local edit
enum EntityMut<'a> {
    Notebook(&'a mut Notebook),
    Folder(&'a mut Folder),
    Page(&'a mut Page),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> EntityStore {
        EntityStore::in_memory(ClientId::from("client-a"))
    }

    fn clean(store: &mut EntityStore) {
        let updates: Vec<MergeUpdate> = store
            .snapshot()
            .dirty_ids()
            .into_iter()
            .filter_map(|id| store.get(&id))
            .map(|mut e| {
                e.set_dirty(false);
                MergeUpdate::Replace(e)
            })
            .collect();
        store.apply_merge(&updates).unwrap();
    }

    #[test]
    fn test_create_entities() {
        let mut store = store();
        let notebook = store.create_notebook("Work").unwrap();
        let folder = store
            .create_folder("Drafts", Placement::InNotebook(notebook.id.clone()))
            .unwrap();
        let page = store
            .create_page("Plan", Placement::InFolder(folder.id.clone()))
            .unwrap();

        assert_eq!(page.notebook_id, notebook.id);
        assert_eq!(page.parent_id.as_deref(), Some(folder.id.as_str()));
        assert_eq!(page.version, 0);
        assert!(page.dirty);
        assert_eq!(page.last_modifier, ClientId::from("client-a"));
        assert_eq!(store.dirty_count(), 3);
    }

    #[test]
    fn test_notebooks_are_appended_in_order() {
        let mut store = store();
        let a = store.create_notebook("A").unwrap();
        let b = store.create_notebook("B").unwrap();
        assert!(b.order > a.order);

        store.set_order(&b.id, -1).unwrap();
        let names: Vec<&str> = store.notebooks().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
    }

    #[test]
    fn test_nested_folder_inherits_notebook() {
        let mut store = store();
        let notebook = store.create_notebook("Work").unwrap();
        let outer = store
            .create_folder("Outer", Placement::InNotebook(notebook.id.clone()))
            .unwrap();
        let inner = store
            .create_folder("Inner", Placement::InFolder(outer.id.clone()))
            .unwrap();
        assert_eq!(inner.notebook_id, notebook.id);
        assert_eq!(store.folders_in(&notebook.id).len(), 2);
    }

    #[test]
    fn test_edit_marks_dirty_without_bumping_version() {
        let mut store = store();
        let notebook = store.create_notebook("Work").unwrap();
        clean(&mut store);
        assert!(!store.has_unsynced_changes());

        store.rename(&notebook.id, "Projects").unwrap();
        let updated = store.notebook(&notebook.id).unwrap();
        assert_eq!(updated.name, "Projects");
        assert!(updated.dirty);
        assert_eq!(updated.version, 0);
    }

    #[test]
    fn test_edit_emits_event() {
        let mut store = store();
        let mut events = store.subscribe();
        let notebook = store.create_notebook("Work").unwrap();

        let event = events.try_recv().unwrap();
        assert_eq!(
            event,
            StoreEvent::EntityChanged {
                id: notebook.id.clone(),
                kind: EntityKind::Notebook
            }
        );
        assert!(event.is_local_mutation());
        assert!(!StoreEvent::MergeApplied.is_local_mutation());
    }

    #[test]
    fn test_delete_notebook_cascades() {
        let mut store = store();
        let notebook = store.create_notebook("Work").unwrap();
        let folder = store
            .create_folder("Drafts", Placement::InNotebook(notebook.id.clone()))
            .unwrap();
        let page = store
            .create_page("Plan", Placement::InFolder(folder.id.clone()))
            .unwrap();
        let other = store.create_notebook("Other").unwrap();

        let removed = store.delete(&notebook.id).unwrap();
        assert_eq!(removed.len(), 3);
        for id in [&notebook.id, &folder.id, &page.id] {
            assert!(store.get(id).is_none());
            assert!(store.is_deleted(id));
        }
        assert!(store.notebook(&other.id).is_some());
    }

    #[test]
    fn test_delete_folder_cascades_to_nested_pages() {
        let mut store = store();
        let notebook = store.create_notebook("Work").unwrap();
        let outer = store
            .create_folder("Outer", Placement::InNotebook(notebook.id.clone()))
            .unwrap();
        let inner = store
            .create_folder("Inner", Placement::InFolder(outer.id.clone()))
            .unwrap();
        let deep_page = store
            .create_page("Deep", Placement::InFolder(inner.id.clone()))
            .unwrap();
        let top_page = store
            .create_page("Top", Placement::InNotebook(notebook.id.clone()))
            .unwrap();

        store.delete(&outer.id).unwrap();
        assert!(store.is_deleted(&inner.id));
        assert!(store.is_deleted(&deep_page.id));
        assert!(store.page(&top_page.id).is_some());
    }

    #[test]
    fn test_deleted_entity_cannot_be_edited() {
        let mut store = store();
        let notebook = store.create_notebook("Work").unwrap();
        store.delete(&notebook.id).unwrap();

        let err = store.rename(&notebook.id, "Back").unwrap_err();
        assert!(matches!(err, StorageError::Tombstoned { .. }));
        let err = store.rename("nope", "x").unwrap_err();
        assert!(matches!(err, StorageError::UnknownEntity { .. }));
    }

    #[test]
    fn test_delete_clears_active_cursor() {
        let mut store = store();
        let notebook = store.create_notebook("Work").unwrap();
        let page = store
            .create_page("Plan", Placement::InNotebook(notebook.id.clone()))
            .unwrap();
        store
            .set_active(Some(notebook.id.clone()), Some(page.id.clone()))
            .unwrap();

        store.delete(&page.id).unwrap();
        let active = store.active_state();
        assert_eq!(active.active_notebook_id.as_deref(), Some(notebook.id.as_str()));
        assert!(active.active_page_id.is_none());
    }

    #[test]
    fn test_move_folder_between_notebooks_updates_subtree() {
        let mut store = store();
        let first = store.create_notebook("First").unwrap();
        let second = store.create_notebook("Second").unwrap();
        let folder = store
            .create_folder("Moving", Placement::InNotebook(first.id.clone()))
            .unwrap();
        let child = store
            .create_folder("Child", Placement::InFolder(folder.id.clone()))
            .unwrap();
        let page = store
            .create_page("Page", Placement::InFolder(child.id.clone()))
            .unwrap();

        store
            .move_entity(&folder.id, Placement::InNotebook(second.id.clone()))
            .unwrap();

        assert_eq!(store.folder(&folder.id).unwrap().notebook_id, second.id);
        assert!(store.folder(&folder.id).unwrap().parent_id.is_none());
        assert_eq!(store.folder(&child.id).unwrap().notebook_id, second.id);
        assert_eq!(store.page(&page.id).unwrap().notebook_id, second.id);
    }

    #[test]
    fn test_move_folder_into_itself_is_rejected() {
        let mut store = store();
        let notebook = store.create_notebook("Work").unwrap();
        let outer = store
            .create_folder("Outer", Placement::InNotebook(notebook.id.clone()))
            .unwrap();
        let inner = store
            .create_folder("Inner", Placement::InFolder(outer.id.clone()))
            .unwrap();

        let err = store
            .move_entity(&outer.id, Placement::InFolder(inner.id.clone()))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidMove { .. }));
    }

    #[test]
    fn test_resolved_color_walks_ancestors() {
        let mut store = store();
        let notebook = store.create_notebook("Work").unwrap();
        store.set_color(&notebook.id, Some("blue".into())).unwrap();
        let folder = store
            .create_folder("Drafts", Placement::InNotebook(notebook.id.clone()))
            .unwrap();
        store.set_color(&folder.id, Some("auto".into())).unwrap();
        let page = store
            .create_page("Plan", Placement::InFolder(folder.id.clone()))
            .unwrap();
        store.set_color(&page.id, Some("black".into())).unwrap();

        assert_eq!(store.resolved_color(&page.id).as_deref(), Some("blue"));

        store.set_color(&folder.id, Some("green".into())).unwrap();
        assert_eq!(store.resolved_color(&page.id).as_deref(), Some("green"));
    }

    #[test]
    fn test_apply_merge_never_resurrects_tombstones() {
        let mut store = store();
        let notebook = store.create_notebook("Work").unwrap();
        store.delete(&notebook.id).unwrap();

        let mut remote_copy = notebook.clone();
        remote_copy.version = 9;
        store
            .apply_merge(&[MergeUpdate::Replace(remote_copy.into())])
            .unwrap();
        assert!(store.notebook(&notebook.id).is_none());
    }

    #[test]
    fn test_acknowledge_respects_concurrent_edit() {
        let mut store = store();
        let notebook = store.create_notebook("Work").unwrap();
        let base: Entity = store.get(&notebook.id).unwrap();
        let mut pushed = base.clone();
        pushed.set_version(1);
        pushed.set_dirty(false);

        // Edited while the push was in flight
        store.rename(&notebook.id, "Edited").unwrap();
        store
            .apply_merge(&[MergeUpdate::Acknowledge {
                pushed: pushed.clone(),
                base: base.clone(),
            }])
            .unwrap();

        let current = store.notebook(&notebook.id).unwrap();
        assert_eq!(current.name, "Edited");
        assert_eq!(current.version, 1);
        assert!(current.dirty);
    }

    #[test]
    fn test_acknowledge_clears_dirty() {
        let mut store = store();
        let notebook = store.create_notebook("Work").unwrap();
        let base: Entity = store.get(&notebook.id).unwrap();
        let mut pushed = base.clone();
        pushed.set_version(1);
        pushed.set_dirty(false);

        store
            .apply_merge(&[MergeUpdate::Acknowledge { pushed, base }])
            .unwrap();
        let current = store.notebook(&notebook.id).unwrap();
        assert_eq!(current.version, 1);
        assert!(!current.dirty);
    }

    fn open_at(path: &std::path::Path) -> EntityStore {
        EntityStore::open(
            SnapshotPersistence::new(path.to_path_buf()),
            ClientId::from("client-a"),
        )
        .unwrap()
    }

    #[test]
    fn test_saves_keep_changes_from_another_process() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.json");

        // Long-lived store, e.g. `folio watch`
        let mut watcher = open_at(&path);
        let notebook = watcher.create_notebook("Work").unwrap();
        let old = watcher
            .create_page("Old", Placement::InNotebook(notebook.id.clone()))
            .unwrap();
        clean(&mut watcher);
        let stale_old = watcher.get(&old.id).unwrap();

        // A short-lived command whose own sync failed
        let mut command = open_at(&path);
        let added = command
            .create_page("New", Placement::InNotebook(notebook.id.clone()))
            .unwrap();
        command.delete(&old.id).unwrap();

        let mut adopted = watcher.get(&notebook.id).unwrap();
        adopted.set_version(3);
        watcher
            .apply_merge(&[
                MergeUpdate::Replace(adopted),
                MergeUpdate::Replace(stale_old),
            ])
            .unwrap();

        for store in [&watcher, &open_at(&path)] {
            assert!(store.page(&added.id).unwrap().dirty);
            assert!(store.page(&old.id).is_none());
            assert!(store.is_deleted(&old.id));
            assert_eq!(store.notebook(&notebook.id).unwrap().version, 3);
        }
    }

    #[test]
    fn test_absorbed_edit_keeps_acknowledged_version() {
        let client = ClientId::from("client-a");
        let mut disk_page = Page::with_id("p1", "Edited elsewhere", "n1", None, &client);
        disk_page.version = 2;
        let mut ours = Snapshot::default();
        let mut our_page = disk_page.clone();
        our_page.name = "Pushed".into();
        our_page.version = 3;
        our_page.dirty = false;
        ours.upsert(our_page.into());
        let mut disk = Snapshot::default();
        disk.upsert(disk_page.into());

        let merged = absorb_external(&ours, disk);

        let page = &merged.pages["p1"];
        assert_eq!(page.name, "Edited elsewhere");
        assert_eq!(page.version, 3);
        assert!(page.dirty);
    }

    #[test]
    fn test_store_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };

        let (notebook_id, client_id) = {
            let mut store = EntityStore::open_with_config(&config).unwrap();
            let notebook = store.create_notebook("Persistent").unwrap();
            let gone = store.create_notebook("Gone").unwrap();
            store.delete(&gone.id).unwrap();
            (notebook.id, store.client_id().clone())
        };

        let store = EntityStore::open_with_config(&config).unwrap();
        assert_eq!(store.client_id(), &client_id);
        assert_eq!(store.notebook(&notebook_id).unwrap().name, "Persistent");
        assert_eq!(store.snapshot().deleted_item_ids.len(), 1);
    }
}
