//! Data models for Folio
//!
//! Defines the synchronized entities (Notebook, Folder, Page) and the
//! `Snapshot` that is exchanged with the remote store as one JSON document.
//!
//! Every entity carries the same sync metadata: a monotone `version`, a
//! `dirty` flag and the `lastModifier` client id. The `SyncEntity` trait
//! exposes that metadata so the reconciler can treat all three kinds alike.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Stable entity identifier
///
/// Ids are opaque strings on the wire. Locally created entities get a v4 UUID.
pub type EntityId = String;

/// Colors that mean "inherit from the nearest ancestor"
const INHERITED_COLORS: &[&str] = &["auto", "black"];

/// Identifier of one installation of the app
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Generate a fresh random client id
    pub fn generate() -> Self {
        Self(format!("folio-{}", &Uuid::new_v4().simple().to_string()[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Kind of a synchronized entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Notebook,
    Folder,
    Page,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Notebook => "notebook",
            EntityKind::Folder => "folder",
            EntityKind::Page => "page",
        };
        f.write_str(name)
    }
}

/// Sync metadata shared by every entity kind
pub trait SyncEntity: Clone + PartialEq {
    const KIND: EntityKind;

    fn id(&self) -> &str;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
    fn is_dirty(&self) -> bool;
    fn set_dirty(&mut self, dirty: bool);
    fn last_modifier(&self) -> &ClientId;
    fn set_last_modifier(&mut self, client_id: ClientId);
}

macro_rules! impl_sync_entity {
    ($ty:ty, $kind:expr) => {
        impl SyncEntity for $ty {
            const KIND: EntityKind = $kind;

            fn id(&self) -> &str {
                &self.id
            }

            fn version(&self) -> u64 {
                self.version
            }

            fn set_version(&mut self, version: u64) {
                self.version = version;
            }

            fn is_dirty(&self) -> bool {
                self.dirty
            }

            fn set_dirty(&mut self, dirty: bool) {
                self.dirty = dirty;
            }

            fn last_modifier(&self) -> &ClientId {
                &self.last_modifier
            }

            fn set_last_modifier(&mut self, client_id: ClientId) {
                self.last_modifier = client_id;
            }
        }
    };
}

/// Top-level container of folders and pages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notebook {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub dirty: bool,
    #[serde(default)]
    pub last_modifier: ClientId,
    /// Sort key among sibling notebooks
    #[serde(default)]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Notebook {
    /// Create a new, unsynced notebook
    pub fn new(name: impl Into<String>, client_id: &ClientId) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), name, client_id)
    }

    /// Create a notebook with a specific ID
    pub fn with_id(id: impl Into<EntityId>, name: impl Into<String>, client_id: &ClientId) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: 0,
            dirty: true,
            last_modifier: client_id.clone(),
            order: 0,
            color: None,
        }
    }
}

impl_sync_entity!(Notebook, EntityKind::Notebook);

/// A folder inside a notebook, optionally nested in another folder
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub dirty: bool,
    #[serde(default)]
    pub last_modifier: ClientId,
    #[serde(default)]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Containing folder, or `None` when directly under the notebook
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EntityId>,
    pub notebook_id: EntityId,
}

impl Folder {
    pub fn new(
        name: impl Into<String>,
        notebook_id: impl Into<EntityId>,
        parent_id: Option<EntityId>,
        client_id: &ClientId,
    ) -> Self {
        Self::with_id(
            Uuid::new_v4().to_string(),
            name,
            notebook_id,
            parent_id,
            client_id,
        )
    }

    pub fn with_id(
        id: impl Into<EntityId>,
        name: impl Into<String>,
        notebook_id: impl Into<EntityId>,
        parent_id: Option<EntityId>,
        client_id: &ClientId,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: 0,
            dirty: true,
            last_modifier: client_id.clone(),
            order: 0,
            color: None,
            parent_id,
            notebook_id: notebook_id.into(),
        }
    }
}

impl_sync_entity!(Folder, EntityKind::Folder);

/// A page of canvas content
///
/// The content model belongs to the presentation layer; the engine only
/// stores and moves it around as an opaque JSON value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub dirty: bool,
    #[serde(default)]
    pub last_modifier: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EntityId>,
    pub notebook_id: EntityId,
    #[serde(default)]
    pub content: serde_json::Value,
}

impl Page {
    pub fn new(
        name: impl Into<String>,
        notebook_id: impl Into<EntityId>,
        parent_id: Option<EntityId>,
        client_id: &ClientId,
    ) -> Self {
        Self::with_id(
            Uuid::new_v4().to_string(),
            name,
            notebook_id,
            parent_id,
            client_id,
        )
    }

    pub fn with_id(
        id: impl Into<EntityId>,
        name: impl Into<String>,
        notebook_id: impl Into<EntityId>,
        parent_id: Option<EntityId>,
        client_id: &ClientId,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: 0,
            dirty: true,
            last_modifier: client_id.clone(),
            color: None,
            parent_id,
            notebook_id: notebook_id.into(),
            content: serde_json::Value::Null,
        }
    }
}

impl_sync_entity!(Page, EntityKind::Page);

/// Any one of the synchronized entities
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Notebook(Notebook),
    Folder(Folder),
    Page(Page),
}

impl Entity {
    pub fn id(&self) -> &str {
        match self {
            Entity::Notebook(n) => &n.id,
            Entity::Folder(f) => &f.id,
            Entity::Page(p) => &p.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Notebook(_) => EntityKind::Notebook,
            Entity::Folder(_) => EntityKind::Folder,
            Entity::Page(_) => EntityKind::Page,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            Entity::Notebook(n) => n.version,
            Entity::Folder(f) => f.version,
            Entity::Page(p) => p.version,
        }
    }

    pub fn is_dirty(&self) -> bool {
        match self {
            Entity::Notebook(n) => n.dirty,
            Entity::Folder(f) => f.dirty,
            Entity::Page(p) => p.dirty,
        }
    }

    pub fn last_modifier(&self) -> &ClientId {
        match self {
            Entity::Notebook(n) => &n.last_modifier,
            Entity::Folder(f) => &f.last_modifier,
            Entity::Page(p) => &p.last_modifier,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Entity::Notebook(n) => &n.name,
            Entity::Folder(f) => &f.name,
            Entity::Page(p) => &p.name,
        }
    }

    pub fn set_version(&mut self, version: u64) {
        match self {
            Entity::Notebook(n) => n.version = version,
            Entity::Folder(f) => f.version = version,
            Entity::Page(p) => p.version = version,
        }
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        match self {
            Entity::Notebook(n) => n.dirty = dirty,
            Entity::Folder(f) => f.dirty = dirty,
            Entity::Page(p) => p.dirty = dirty,
        }
    }

    pub fn set_last_modifier(&mut self, client_id: ClientId) {
        match self {
            Entity::Notebook(n) => n.last_modifier = client_id,
            Entity::Folder(f) => f.last_modifier = client_id,
            Entity::Page(p) => p.last_modifier = client_id,
        }
    }

    /// Color tag and structural parent, used for color inheritance
    pub(crate) fn color_and_parent(&self) -> (Option<&str>, Option<&str>) {
        match self {
            Entity::Notebook(n) => (n.color.as_deref(), None),
            Entity::Folder(f) => (
                f.color.as_deref(),
                Some(f.parent_id.as_deref().unwrap_or(f.notebook_id.as_str())),
            ),
            Entity::Page(p) => (
                p.color.as_deref(),
                Some(p.parent_id.as_deref().unwrap_or(p.notebook_id.as_str())),
            ),
        }
    }
}

impl From<Notebook> for Entity {
    fn from(n: Notebook) -> Self {
        Entity::Notebook(n)
    }
}

impl From<Folder> for Entity {
    fn from(f: Folder) -> Self {
        Entity::Folder(f)
    }
}

impl From<Page> for Entity {
    fn from(p: Page) -> Self {
        Entity::Page(p)
    }
}

/// Whether a color tag means "inherit from ancestor"
pub fn is_inherited_color(color: Option<&str>) -> bool {
    match color {
        None => true,
        Some(c) => INHERITED_COLORS.contains(&c),
    }
}

/// The active-cursor record (UI state, not content)
///
/// Reconciled as one value, last writer wins by `updated_at`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveState {
    #[serde(default)]
    pub active_notebook_id: Option<EntityId>,
    #[serde(default)]
    pub active_page_id: Option<EntityId>,
    #[serde(
        default,
        rename = "activeStateUpdatedAt",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ActiveState {
    /// Pick the more recently written of two cursor records
    ///
    /// Ties keep `self`.
    pub fn newer<'a>(&'a self, other: &'a ActiveState) -> &'a ActiveState {
        if other.updated_at > self.updated_at {
            other
        } else {
            self
        }
    }
}

/// Errors produced when parsing or validating a snapshot document
#[derive(Error, Debug)]
pub enum InvalidSnapshot {
    #[error("malformed snapshot JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unexpected snapshot shape: {0}")]
    Shape(String),
}

/// Full state exchanged with the remote store
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub notebooks: Vec<Notebook>,
    #[serde(default)]
    pub folders: BTreeMap<EntityId, Folder>,
    #[serde(default)]
    pub pages: BTreeMap<EntityId, Page>,
    /// Tombstones: ids of permanently deleted entities
    #[serde(default)]
    pub deleted_item_ids: BTreeSet<EntityId>,
    #[serde(flatten)]
    pub active: ActiveState,
}

impl Snapshot {
    /// Parse and validate a snapshot document
    pub fn from_json(json: &str) -> Result<Self, InvalidSnapshot> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Check structural invariants that serde alone cannot express
    pub fn validate(&self) -> Result<(), InvalidSnapshot> {
        let mut seen = BTreeSet::new();
        for notebook in &self.notebooks {
            if !seen.insert(notebook.id.as_str()) {
                return Err(InvalidSnapshot::Shape(format!(
                    "duplicate notebook id '{}'",
                    notebook.id
                )));
            }
        }
        for (key, folder) in &self.folders {
            if key != &folder.id {
                return Err(InvalidSnapshot::Shape(format!(
                    "folder stored under '{}' has id '{}'",
                    key, folder.id
                )));
            }
        }
        for (key, page) in &self.pages {
            if key != &page.id {
                return Err(InvalidSnapshot::Shape(format!(
                    "page stored under '{}' has id '{}'",
                    key, page.id
                )));
            }
        }
        Ok(())
    }

    pub fn notebook(&self, id: &str) -> Option<&Notebook> {
        self.notebooks.iter().find(|n| n.id == id)
    }

    pub fn notebook_mut(&mut self, id: &str) -> Option<&mut Notebook> {
        self.notebooks.iter_mut().find(|n| n.id == id)
    }

    /// Look up any entity by id
    pub fn entity(&self, id: &str) -> Option<Entity> {
        if let Some(n) = self.notebook(id) {
            return Some(Entity::Notebook(n.clone()));
        }
        if let Some(f) = self.folders.get(id) {
            return Some(Entity::Folder(f.clone()));
        }
        self.pages.get(id).map(|p| Entity::Page(p.clone()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.notebook(id).is_some() || self.folders.contains_key(id) || self.pages.contains_key(id)
    }

    pub fn is_tombstoned(&self, id: &str) -> bool {
        self.deleted_item_ids.contains(id)
    }

    /// Insert or replace an entity in its container
    pub fn upsert(&mut self, entity: Entity) {
        match entity {
            Entity::Notebook(n) => match self.notebook_mut(&n.id) {
                Some(existing) => *existing = n,
                None => self.notebooks.push(n),
            },
            Entity::Folder(f) => {
                self.folders.insert(f.id.clone(), f);
            }
            Entity::Page(p) => {
                self.pages.insert(p.id.clone(), p);
            }
        }
    }

    /// Remove an entity from its container, returning it
    pub fn remove(&mut self, id: &str) -> Option<Entity> {
        if let Some(pos) = self.notebooks.iter().position(|n| n.id == id) {
            return Some(Entity::Notebook(self.notebooks.remove(pos)));
        }
        if let Some(f) = self.folders.remove(id) {
            return Some(Entity::Folder(f));
        }
        self.pages.remove(id).map(Entity::Page)
    }

    /// Ids of all entities with unsynced local changes
    pub fn dirty_ids(&self) -> Vec<EntityId> {
        let notebooks = self.notebooks.iter().filter(|n| n.dirty).map(|n| n.id.clone());
        let folders = self.folders.values().filter(|f| f.dirty).map(|f| f.id.clone());
        let pages = self.pages.values().filter(|p| p.dirty).map(|p| p.id.clone());
        notebooks.chain(folders).chain(pages).collect()
    }

    pub fn entity_count(&self) -> usize {
        self.notebooks.len() + self.folders.len() + self.pages.len()
    }
}
