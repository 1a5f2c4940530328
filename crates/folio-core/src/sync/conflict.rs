//! Held conflicts and their resolution
//!
//! When reconciliation finds entities that both this client and another
//! client changed, the engine parks both snapshots here until the user picks
//! a side. Resolution is all-or-nothing: one choice applies to every
//! conflicting entity.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ClientId, Entity, EntityId, EntityKind, Snapshot};
use crate::store::MergeUpdate;

/// Which side wins a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictChoice {
    Local,
    Remote,
}

impl fmt::Display for ConflictChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictChoice::Local => write!(f, "local"),
            ConflictChoice::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for ConflictChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" | "mine" => Ok(ConflictChoice::Local),
            "remote" | "theirs" => Ok(ConflictChoice::Remote),
            other => Err(format!("expected 'local' or 'remote', got '{}'", other)),
        }
    }
}

/// Conflict waiting for a user decision
#[derive(Debug, Clone, PartialEq)]
pub struct PendingConflict {
    pub local: Snapshot,
    pub remote: Snapshot,
    pub conflicting_ids: Vec<EntityId>,
    pub detected_at: DateTime<Utc>,
}

/// Both copies of one conflicting entity, for display
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictEntry {
    pub id: EntityId,
    pub kind: EntityKind,
    pub local: Entity,
    pub remote: Entity,
}

impl PendingConflict {
    /// Side-by-side copies of every conflicting entity
    pub fn entries(&self) -> Vec<ConflictEntry> {
        self.conflicting_ids
            .iter()
            .filter_map(|id| {
                let local = self.local.entity(id)?;
                let remote = self.remote.entity(id)?;
                Some(ConflictEntry {
                    id: id.clone(),
                    kind: local.kind(),
                    local,
                    remote,
                })
            })
            .collect()
    }
}

/// Outcome of resolving a conflict
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConflict {
    pub choice: ConflictChoice,
    /// Updates for the local store
    pub updates: Vec<MergeUpdate>,
    /// Entities whose local copy must now be uploaded
    pub pushes: Vec<EntityId>,
}

/// Holds at most one pending conflict
#[derive(Debug, Default)]
pub struct ConflictResolver {
    pending: Option<PendingConflict>,
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&PendingConflict> {
        self.pending.as_ref()
    }

    /// Park a newly detected conflict, replacing any older one
    ///
    /// A later sync pass sees the same dirty entities again, so the fresh
    /// snapshots supersede whatever was held before.
    pub fn hold(&mut self, local: Snapshot, remote: Snapshot, conflicting_ids: Vec<EntityId>) {
        self.pending = Some(PendingConflict {
            local,
            remote,
            conflicting_ids,
            detected_at: Utc::now(),
        });
    }

    /// Compute the resolution for `choice` without clearing the conflict
    ///
    /// Returns `None` when nothing is pending. `current` is the local store
    /// as it is now: keeping local copies keeps what the user sees, edits
    /// made while the conflict was pending included, and gives each a
    /// version above both sides so it wins the next pass. Keeping remote
    /// copies adopts them. Entities deleted locally in the meantime stay
    /// deleted.
    pub fn resolution(
        &self,
        choice: ConflictChoice,
        client_id: &ClientId,
        current: &Snapshot,
    ) -> Option<ResolvedConflict> {
        let pending = self.pending.as_ref()?;
        let mut updates = Vec::with_capacity(pending.conflicting_ids.len());
        let mut pushes = Vec::new();

        for entry in pending.entries() {
            if current.is_tombstoned(&entry.id) {
                continue;
            }
            let mut winner = match choice {
                ConflictChoice::Local => {
                    let mut local = current
                        .entity(&entry.id)
                        .unwrap_or_else(|| entry.local.clone());
                    let version = local
                        .version()
                        .max(entry.local.version())
                        .max(entry.remote.version());
                    local.set_version(version + 1);
                    local.set_last_modifier(client_id.clone());
                    pushes.push(entry.id);
                    local
                }
                ConflictChoice::Remote => entry.remote,
            };
            winner.set_dirty(false);
            updates.push(MergeUpdate::Replace(winner));
        }

        Some(ResolvedConflict {
            choice,
            updates,
            pushes,
        })
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Folder;

    fn folder(version: u64, name: &str, by: &str) -> Folder {
        let mut f = Folder::with_id("f1", name, "n1", None, &ClientId::from(by));
        f.version = version;
        f.dirty = false;
        f
    }

    fn held() -> ConflictResolver {
        let mut local = Snapshot::default();
        let mut mine = folder(4, "mine", "client-a");
        mine.dirty = true;
        local.upsert(mine.into());
        let mut remote = Snapshot::default();
        remote.upsert(folder(6, "theirs", "other").into());

        let mut resolver = ConflictResolver::new();
        resolver.hold(local, remote, vec!["f1".to_string()]);
        resolver
    }

    #[test]
    fn test_nothing_pending_initially() {
        let resolver = ConflictResolver::new();
        assert!(!resolver.is_pending());
        assert!(resolver
            .resolution(ConflictChoice::Local, &ClientId::from("a"), &Snapshot::default())
            .is_none());
    }

    #[test]
    fn test_keep_local_outversions_both_sides() {
        let resolver = held();
        let me = ClientId::from("client-a");

        let current = resolver.pending().unwrap().local.clone();
        let resolved = resolver
            .resolution(ConflictChoice::Local, &me, &current)
            .unwrap();
        assert_eq!(resolved.pushes, vec!["f1".to_string()]);
        match &resolved.updates[0] {
            MergeUpdate::Replace(Entity::Folder(f)) => {
                assert_eq!(f.version, 7);
                assert_eq!(f.name, "mine");
                assert_eq!(f.last_modifier, me);
                assert!(!f.dirty);
            }
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[test]
    fn test_keep_local_uses_edits_made_while_pending() {
        let resolver = held();
        let me = ClientId::from("client-a");
        let mut current = Snapshot::default();
        let mut edited = folder(4, "mine, edited later", "client-a");
        edited.dirty = true;
        current.upsert(edited.into());

        let resolved = resolver
            .resolution(ConflictChoice::Local, &me, &current)
            .unwrap();
        match &resolved.updates[0] {
            MergeUpdate::Replace(Entity::Folder(f)) => {
                assert_eq!(f.name, "mine, edited later");
                assert_eq!(f.version, 7);
            }
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[test]
    fn test_locally_deleted_entity_stays_deleted() {
        let resolver = held();
        let mut current = Snapshot::default();
        current.deleted_item_ids.insert("f1".to_string());

        for choice in [ConflictChoice::Local, ConflictChoice::Remote] {
            let resolved = resolver
                .resolution(choice, &ClientId::from("client-a"), &current)
                .unwrap();
            assert!(resolved.updates.is_empty());
            assert!(resolved.pushes.is_empty());
        }
    }

    #[test]
    fn test_keep_remote_adopts_remote_copy() {
        let resolver = held();

        let resolved = resolver
            .resolution(
                ConflictChoice::Remote,
                &ClientId::from("client-a"),
                &Snapshot::default(),
            )
            .unwrap();
        assert!(resolved.pushes.is_empty());
        match &resolved.updates[0] {
            MergeUpdate::Replace(Entity::Folder(f)) => {
                assert_eq!(f.version, 6);
                assert_eq!(f.name, "theirs");
                assert!(!f.dirty);
            }
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[test]
    fn test_resolution_does_not_clear() {
        let mut resolver = held();
        resolver.resolution(ConflictChoice::Remote, &ClientId::from("a"), &Snapshot::default());
        assert!(resolver.is_pending());
        resolver.clear();
        assert!(!resolver.is_pending());
    }

    #[test]
    fn test_entries_pair_both_copies() {
        let resolver = held();
        let entries = resolver.pending().unwrap().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntityKind::Folder);
        assert_eq!(entries[0].local.name(), "mine");
        assert_eq!(entries[0].remote.name(), "theirs");
    }

    #[test]
    fn test_choice_parsing() {
        assert_eq!("local".parse::<ConflictChoice>(), Ok(ConflictChoice::Local));
        assert_eq!("Remote".parse::<ConflictChoice>(), Ok(ConflictChoice::Remote));
        assert!("both".parse::<ConflictChoice>().is_err());
    }
}
