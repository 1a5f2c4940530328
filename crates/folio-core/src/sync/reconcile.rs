//! Snapshot reconciliation
//!
//! `reconcile` compares the local snapshot with the remote one and decides,
//! per entity, whether to adopt the remote copy, push the local copy, do
//! nothing, or report a conflict. It is pure: no I/O, no clock, and the same
//! inputs always produce the same result.
//!
//! Tombstones are applied first, so a deletion on either side always wins
//! over a concurrent edit. The active-cursor record is reconciled on its own,
//! last writer wins by timestamp.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{ClientId, Entity, EntityId, Notebook, Snapshot, SyncEntity};
use crate::store::MergeUpdate;

/// Per-entity reconciliation decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Take the remote copy
    AcceptRemote,
    /// Upload the local copy
    PushLocal,
    /// Both sides agree (or the local copy is clean and not older)
    NoOp,
    /// Both sides advanced independently
    Conflict,
    /// Deleted on at least one side
    Tombstoned,
}

/// Result of reconciling two snapshots
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Local view after the merge; conflicting entities keep their local copy
    pub merged: Snapshot,
    /// Entities that need a human decision
    pub conflicts: Vec<EntityId>,
    /// Entities to upload
    pub pushes: Vec<EntityId>,
    /// Entities whose remote copy was adopted
    pub adopted: Vec<EntityId>,
    /// Decision for every entity present on either side
    pub classifications: BTreeMap<EntityId, Classification>,
}

/// Reconcile a local snapshot against the remote one
pub fn reconcile(local: &Snapshot, remote: &Snapshot, client_id: &ClientId) -> Reconciliation {
    let tombstones: BTreeSet<EntityId> = local
        .deleted_item_ids
        .union(&remote.deleted_item_ids)
        .cloned()
        .collect();

    let mut result = Reconciliation {
        merged: Snapshot {
            deleted_item_ids: tombstones.clone(),
            active: local.active.newer(&remote.active).clone(),
            ..Snapshot::default()
        },
        conflicts: Vec::new(),
        pushes: Vec::new(),
        adopted: Vec::new(),
        classifications: BTreeMap::new(),
    };

    let local_notebooks = index_notebooks(&local.notebooks);
    let remote_notebooks = index_notebooks(&remote.notebooks);
    let merged_notebooks = merge_entities(
        &local_notebooks,
        &remote_notebooks,
        &tombstones,
        client_id,
        &mut result,
    );
    // Keep the local sequence, then append remote-only notebooks in remote order
    let mut ordered: Vec<Notebook> = Vec::with_capacity(merged_notebooks.len());
    for notebook in local.notebooks.iter().chain(remote.notebooks.iter()) {
        if ordered.iter().any(|n| n.id == notebook.id) {
            continue;
        }
        if let Some(merged) = merged_notebooks.get(&notebook.id) {
            ordered.push(merged.clone());
        }
    }
    result.merged.notebooks = ordered;

    result.merged.folders = merge_entities(
        &local.folders,
        &remote.folders,
        &tombstones,
        client_id,
        &mut result,
    );
    result.merged.pages = merge_entities(
        &local.pages,
        &remote.pages,
        &tombstones,
        client_id,
        &mut result,
    );

    result
}

impl Reconciliation {
    pub fn classification(&self, id: &str) -> Option<Classification> {
        self.classifications.get(id).copied()
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Updates to apply to the local store right away
    ///
    /// Remote adoptions, new tombstones and the active cursor. Pushes are
    /// acknowledged separately once the remote write succeeds.
    pub fn local_updates(&self, local: &Snapshot) -> Vec<MergeUpdate> {
        let mut updates = Vec::new();

        for id in &self.merged.deleted_item_ids {
            if !local.deleted_item_ids.contains(id) {
                updates.push(MergeUpdate::Tombstone(id.clone()));
            }
        }
        for id in &self.adopted {
            if let Some(entity) = self.merged.entity(id) {
                updates.push(MergeUpdate::Replace(entity));
            }
        }
        if self.merged.active != local.active {
            updates.push(MergeUpdate::ActiveState(self.merged.active.clone()));
        }

        updates
    }

    /// The snapshot to write back to the remote store
    ///
    /// Pushed entities are stamped, conflicting entities keep their remote
    /// copy until the conflict is resolved, and every entity is clean.
    pub fn upload_snapshot(&self, remote: &Snapshot, client_id: &ClientId) -> Snapshot {
        let mut upload = self.merged.clone();

        for id in &self.pushes {
            if let Some(mut entity) = upload.entity(id) {
                stamp_push(&mut entity, client_id);
                upload.upsert(entity);
            }
        }
        for id in &self.conflicts {
            if let Some(entity) = remote.entity(id) {
                upload.upsert(entity);
            }
        }

        for notebook in &mut upload.notebooks {
            notebook.dirty = false;
        }
        for folder in upload.folders.values_mut() {
            folder.dirty = false;
        }
        for page in upload.pages.values_mut() {
            page.dirty = false;
        }

        upload
    }

    /// Acknowledgements to apply after `upload` was written
    pub fn acknowledgements(&self, local: &Snapshot, upload: &Snapshot) -> Vec<MergeUpdate> {
        self.pushes
            .iter()
            .filter_map(|id| match (upload.entity(id), local.entity(id)) {
                (Some(pushed), Some(base)) => Some(MergeUpdate::Acknowledge { pushed, base }),
                _ => None,
            })
            .collect()
    }
}

/// Stamp an entity that is being uploaded
///
/// A dirty copy gets the next version; a clean local-only copy is uploaded
/// as-is. Either way the upload is attributed to `client_id` only when it
/// carries a new version.
pub fn stamp_push(entity: &mut Entity, client_id: &ClientId) {
    if entity.is_dirty() {
        entity.set_version(entity.version() + 1);
        entity.set_last_modifier(client_id.clone());
    }
    entity.set_dirty(false);
}

fn index_notebooks(notebooks: &[Notebook]) -> BTreeMap<EntityId, Notebook> {
    notebooks.iter().map(|n| (n.id.clone(), n.clone())).collect()
}

/// Merge one entity kind, recording decisions in `result`
fn merge_entities<T: SyncEntity>(
    local: &BTreeMap<EntityId, T>,
    remote: &BTreeMap<EntityId, T>,
    tombstones: &BTreeSet<EntityId>,
    client_id: &ClientId,
    result: &mut Reconciliation,
) -> BTreeMap<EntityId, T> {
    let ids: BTreeSet<&EntityId> = local.keys().chain(remote.keys()).collect();
    let mut merged = BTreeMap::new();

    for id in ids {
        if tombstones.contains(id) {
            result
                .classifications
                .insert(id.clone(), Classification::Tombstoned);
            continue;
        }

        let (classification, copy) = classify(local.get(id), remote.get(id), client_id);
        match classification {
            Classification::AcceptRemote => result.adopted.push(id.clone()),
            Classification::PushLocal => result.pushes.push(id.clone()),
            Classification::Conflict => result.conflicts.push(id.clone()),
            Classification::NoOp | Classification::Tombstoned => {}
        }
        result.classifications.insert(id.clone(), classification);
        if let Some(copy) = copy {
            merged.insert(id.clone(), copy);
        }
    }

    merged
}

/// Decide the fate of one entity and pick the copy to keep locally
fn classify<T: SyncEntity>(
    local: Option<&T>,
    remote: Option<&T>,
    client_id: &ClientId,
) -> (Classification, Option<T>) {
    match (local, remote) {
        (None, None) => (Classification::NoOp, None),
        (None, Some(remote)) => (Classification::AcceptRemote, Some(adopt(remote))),
        (Some(local), None) => (Classification::PushLocal, Some(local.clone())),
        (Some(local), Some(remote)) => {
            let remote_newer = remote.version() > local.version();
            if !local.is_dirty() {
                if remote_newer {
                    (Classification::AcceptRemote, Some(adopt(remote)))
                } else {
                    (Classification::NoOp, Some(local.clone()))
                }
            } else if !remote_newer {
                (Classification::PushLocal, Some(local.clone()))
            } else if remote.last_modifier() != client_id {
                (Classification::Conflict, Some(local.clone()))
            } else {
                // Our own earlier push whose acknowledgement was lost
                (Classification::AcceptRemote, Some(adopt(remote)))
            }
        }
    }
}

fn adopt<T: SyncEntity>(remote: &T) -> T {
    let mut copy = remote.clone();
    copy.set_dirty(false);
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActiveState, Folder, Page};
    use chrono::{TimeZone, Utc};

    fn me() -> ClientId {
        ClientId::from("client-a")
    }

    fn other() -> ClientId {
        ClientId::from("other-client")
    }

    fn notebook(id: &str, name: &str, version: u64, dirty: bool, by: &ClientId) -> Notebook {
        let mut n = Notebook::with_id(id, name, by);
        n.version = version;
        n.dirty = dirty;
        n
    }

    fn folder(id: &str, version: u64, dirty: bool, by: &ClientId) -> Folder {
        let mut f = Folder::with_id(id, format!("folder {id}"), "n1", None, by);
        f.version = version;
        f.dirty = dirty;
        f
    }

    fn page(id: &str, content: &str, version: u64, dirty: bool, by: &ClientId) -> Page {
        let mut p = Page::with_id(id, format!("page {id}"), "n1", None, by);
        p.version = version;
        p.dirty = dirty;
        p.content = serde_json::json!({ "text": content });
        p
    }

    fn snapshot(entities: Vec<Entity>) -> Snapshot {
        let mut s = Snapshot::default();
        for e in entities {
            s.upsert(e);
        }
        s
    }

    #[test]
    fn test_scenario_a_clean_local_adopts_newer_remote() {
        let local = snapshot(vec![page("p1", "old", 3, false, &me()).into()]);
        let remote = snapshot(vec![page("p1", "new", 5, false, &other()).into()]);

        let result = reconcile(&local, &remote, &me());

        assert_eq!(result.classification("p1"), Some(Classification::AcceptRemote));
        let merged = &result.merged.pages["p1"];
        assert_eq!(merged.version, 5);
        assert_eq!(merged.content, serde_json::json!({ "text": "new" }));
        assert!(!merged.dirty);
        assert_eq!(result.adopted, vec!["p1".to_string()]);
    }

    #[test]
    fn test_scenario_b_dirty_local_with_unchanged_remote_is_pushed() {
        let local = snapshot(vec![notebook("n1", "X", 2, true, &me()).into()]);
        let remote = snapshot(vec![notebook("n1", "original", 2, false, &other()).into()]);

        let result = reconcile(&local, &remote, &me());
        assert_eq!(result.pushes, vec!["n1".to_string()]);

        let upload = result.upload_snapshot(&remote, &me());
        let pushed = upload.notebook("n1").unwrap();
        assert_eq!(pushed.name, "X");
        assert_eq!(pushed.version, 3);
        assert_eq!(pushed.last_modifier, me());
        assert!(!pushed.dirty);
    }

    #[test]
    fn test_scenario_c_conflict_when_other_client_advanced() {
        let local = snapshot(vec![folder("f1", 4, true, &me()).into()]);
        let remote = snapshot(vec![folder("f1", 6, false, &other()).into()]);

        let result = reconcile(&local, &remote, &me());

        assert_eq!(result.conflicts, vec!["f1".to_string()]);
        assert!(result.pushes.is_empty());
        // Held back: the local view keeps the local copy
        assert_eq!(result.merged.folders["f1"].version, 4);
        assert!(result.merged.folders["f1"].dirty);
        // The upload must not overwrite the other client's write
        let upload = result.upload_snapshot(&remote, &me());
        assert_eq!(upload.folders["f1"].version, 6);
        assert_eq!(upload.folders["f1"].last_modifier, other());
    }

    #[test]
    fn test_scenario_d_remote_tombstone_wins_over_local_edit() {
        let local = snapshot(vec![page("x", "edit", 1, true, &me()).into()]);
        let mut remote = Snapshot::default();
        remote.deleted_item_ids.insert("x".to_string());

        let result = reconcile(&local, &remote, &me());

        assert!(!result.merged.contains("x"));
        assert!(result.merged.deleted_item_ids.contains("x"));
        assert_eq!(result.classification("x"), Some(Classification::Tombstoned));
        assert!(result.pushes.is_empty());

        let updates = result.local_updates(&local);
        assert!(updates.contains(&MergeUpdate::Tombstone("x".to_string())));
    }

    #[test]
    fn test_local_tombstone_is_not_resurrected_by_remote_copy() {
        let mut local = Snapshot::default();
        local.deleted_item_ids.insert("n1".to_string());
        let remote = snapshot(vec![notebook("n1", "still here", 9, false, &other()).into()]);

        let result = reconcile(&local, &remote, &me());
        assert!(result.merged.notebook("n1").is_none());
        assert!(result.adopted.is_empty());
        assert!(result.upload_snapshot(&remote, &me()).notebook("n1").is_none());
    }

    #[test]
    fn test_tombstones_merge_by_union() {
        let mut local = Snapshot::default();
        local.deleted_item_ids.insert("a".to_string());
        let mut remote = Snapshot::default();
        remote.deleted_item_ids.insert("b".to_string());

        let result = reconcile(&local, &remote, &me());
        let expected: BTreeSet<EntityId> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(result.merged.deleted_item_ids, expected);
    }

    #[test]
    fn test_remote_only_entity_is_adopted_clean() {
        let local = Snapshot::default();
        let remote = snapshot(vec![page("p9", "theirs", 2, true, &other()).into()]);

        let result = reconcile(&local, &remote, &me());
        assert_eq!(result.classification("p9"), Some(Classification::AcceptRemote));
        assert!(!result.merged.pages["p9"].dirty);
    }

    #[test]
    fn test_local_only_entity_is_pushed() {
        let local = snapshot(vec![page("new", "mine", 0, true, &me()).into()]);
        let remote = Snapshot::default();

        let result = reconcile(&local, &remote, &me());
        assert_eq!(result.pushes, vec!["new".to_string()]);
        let upload = result.upload_snapshot(&remote, &me());
        assert_eq!(upload.pages["new"].version, 1);
    }

    #[test]
    fn test_clean_local_only_entity_is_uploaded_as_is() {
        let local = snapshot(vec![page("p1", "synced", 4, false, &other()).into()]);
        let remote = Snapshot::default();

        let result = reconcile(&local, &remote, &me());
        let upload = result.upload_snapshot(&remote, &me());
        assert_eq!(upload.pages["p1"].version, 4);
        assert_eq!(upload.pages["p1"].last_modifier, other());
    }

    #[test]
    fn test_clean_local_newer_than_remote_is_noop() {
        let local = snapshot(vec![page("p1", "mine", 7, false, &me()).into()]);
        let remote = snapshot(vec![page("p1", "theirs", 6, false, &other()).into()]);

        let result = reconcile(&local, &remote, &me());
        assert_eq!(result.classification("p1"), Some(Classification::NoOp));
        assert_eq!(result.merged.pages["p1"].version, 7);
    }

    #[test]
    fn test_own_earlier_push_is_adopted_not_conflict() {
        let local = snapshot(vec![page("p1", "mine", 2, true, &me()).into()]);
        let remote = snapshot(vec![page("p1", "mine", 3, false, &me()).into()]);

        let result = reconcile(&local, &remote, &me());
        assert!(result.conflicts.is_empty());
        assert_eq!(result.classification("p1"), Some(Classification::AcceptRemote));
        assert!(!result.merged.pages["p1"].dirty);
    }

    #[test]
    fn test_conflict_for_any_remote_advance_by_other_client() {
        for k in 1..5 {
            let local = snapshot(vec![page("p1", "mine", 3, true, &me()).into()]);
            let remote = snapshot(vec![page("p1", "theirs", 3 + k, false, &other()).into()]);
            let result = reconcile(&local, &remote, &me());
            assert_eq!(result.conflicts, vec!["p1".to_string()], "k = {k}");
        }
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let local = snapshot(vec![
            notebook("n1", "mine", 2, true, &me()).into(),
            folder("f1", 4, true, &me()).into(),
            page("p1", "old", 1, false, &me()).into(),
        ]);
        let mut remote = snapshot(vec![
            notebook("n2", "theirs", 1, false, &other()).into(),
            folder("f1", 6, false, &other()).into(),
            page("p1", "new", 2, false, &other()).into(),
        ]);
        remote.deleted_item_ids.insert("gone".to_string());

        let first = reconcile(&local, &remote, &me());
        let second = reconcile(&local, &remote, &me());
        assert_eq!(first, second);
    }

    #[test]
    fn test_notebook_order_keeps_local_sequence() {
        let local = snapshot(vec![
            notebook("b", "B", 1, false, &me()).into(),
            notebook("a", "A", 1, false, &me()).into(),
        ]);
        let remote = snapshot(vec![
            notebook("c", "C", 1, false, &other()).into(),
            notebook("a", "A", 1, false, &me()).into(),
        ]);

        let result = reconcile(&local, &remote, &me());
        let ids: Vec<&str> = result.merged.notebooks.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_active_state_last_writer_wins() {
        let mut local = Snapshot::default();
        local.active = ActiveState {
            active_page_id: Some("p-local".into()),
            updated_at: Some(Utc.timestamp_millis_opt(5_000).unwrap()),
            ..Default::default()
        };
        let mut remote = Snapshot::default();
        remote.active = ActiveState {
            active_page_id: Some("p-remote".into()),
            updated_at: Some(Utc.timestamp_millis_opt(9_000).unwrap()),
            ..Default::default()
        };

        let result = reconcile(&local, &remote, &me());
        assert_eq!(result.merged.active, remote.active);
        assert!(result
            .local_updates(&local)
            .contains(&MergeUpdate::ActiveState(remote.active.clone())));

        let result = reconcile(&remote, &local, &me());
        assert_eq!(result.merged.active, remote.active);
    }

    #[test]
    fn test_acknowledgements_pair_upload_with_base() {
        let local = snapshot(vec![page("p1", "mine", 0, true, &me()).into()]);
        let remote = Snapshot::default();

        let result = reconcile(&local, &remote, &me());
        let upload = result.upload_snapshot(&remote, &me());
        let acks = result.acknowledgements(&local, &upload);

        assert_eq!(acks.len(), 1);
        match &acks[0] {
            MergeUpdate::Acknowledge { pushed, base } => {
                assert_eq!(pushed.version(), 1);
                assert!(!pushed.is_dirty());
                assert_eq!(base.version(), 0);
                assert!(base.is_dirty());
            }
            other => panic!("unexpected update: {other:?}"),
        }
    }
}
