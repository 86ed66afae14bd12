//! # Catalog Reconciler
//!
//! Merges a [`SyncSnapshot`] into the local store.
//!
//! The merge is computed in memory by [`plan_merge`] and written with a
//! single [`StoreAccessor::write_items`] call, so a reconciliation is either
//! fully applied or not at all.
//!
//! ## Rules
//!
//! - Remote-only items are inserted, parents before children. An item whose
//!   parent is not a folder after the merge is skipped.
//! - Local-only items are deleted, unless their progress was written after
//!   the snapshot was captured. Those are kept and flagged for upload. A
//!   folder is kept while anything below it is kept.
//! - Items on both sides take the remote metadata. Progress moves to the
//!   remote value only when the remote progress is strictly newer.
//! - The remote last-played item wins over the local pointer and produces a
//!   [`SyncSignal`] for the player, as long as that item still exists
//!   after the merge.

use crate::error::Result;
use crate::snapshot::SyncSnapshot;
use core_library::models::{
    is_descendant, CatalogDiff, CatalogItem, CatalogScope, LastPlayedPointer, PointerChange,
};
use core_library::store::StoreAccessor;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};

/// Part of the library a reconciliation covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileScope {
    AllLibrary,
    /// Direct children of a folder; `None` is the top level
    Folder(Option<String>),
}

impl ReconcileScope {
    pub fn contains(&self, relative_path: &str) -> bool {
        self.catalog_scope().contains(relative_path)
    }

    fn catalog_scope(&self) -> CatalogScope {
        match self {
            ReconcileScope::AllLibrary => CatalogScope::Library,
            ReconcileScope::Folder(folder) => CatalogScope::Children(folder.clone()),
        }
    }
}

/// What the player should do about the last-played item after a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncSignal {
    #[default]
    None,
    /// The remote last-played item was not in the library before the merge
    ReloadLastBook(String),
    /// The remote last-played item existed locally but was not the pointer
    DifferentLastBook(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub inserted_count: u64,
    pub updated_count: u64,
    pub deleted_count: u64,
    /// Local-only items newly kept because of unsynced local progress
    pub deferred_count: u64,
    pub signal: SyncSignal,
}

impl ReconcileResult {
    pub fn changed_anything(&self) -> bool {
        self.inserted_count + self.updated_count + self.deleted_count + self.deferred_count > 0
    }
}

/// Local state a merge is planned against.
#[derive(Debug, Clone, Default)]
pub struct LocalView {
    /// Local items in scope plus, for folder scopes, everything below a
    /// local-only folder
    pub items: Vec<CatalogItem>,
    pub last_played: Option<LastPlayedPointer>,
    /// Whether the remote last-played item exists locally, anywhere
    pub remote_last_played_exists: bool,
    /// Whether the folder named by a `Folder(Some(_))` scope exists locally
    pub scope_folder_exists: bool,
}

/// A computed merge: the diff to write and the result to report.
#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    pub diff: CatalogDiff,
    pub result: ReconcileResult,
}

/// Merge `remote` into `local` within `scope`.
#[instrument(skip(local, remote), fields(remote_items = remote.len()))]
pub async fn reconcile(
    local: &dyn StoreAccessor,
    remote: &SyncSnapshot,
    scope: &ReconcileScope,
) -> Result<ReconcileResult> {
    let view = load_local_view(local, remote, scope).await?;
    let plan = plan_merge(&view, remote, scope);

    if !plan.diff.is_empty() {
        local.write_items(&plan.diff).await?;
    }

    info!(
        inserted = plan.result.inserted_count,
        updated = plan.result.updated_count,
        deleted = plan.result.deleted_count,
        deferred = plan.result.deferred_count,
        signal = ?plan.result.signal,
        "Reconciled remote snapshot"
    );
    Ok(plan.result)
}

async fn load_local_view(
    local: &dyn StoreAccessor,
    remote: &SyncSnapshot,
    scope: &ReconcileScope,
) -> Result<LocalView> {
    let mut items = local.read_items(&scope.catalog_scope()).await?;

    if let ReconcileScope::Folder(_) = scope {
        let orphaned_folders: Vec<String> = items
            .iter()
            .filter(|item| item.is_folder() && remote.get(&item.relative_path).is_none())
            .map(|item| item.relative_path.clone())
            .collect();
        for folder in orphaned_folders {
            items.extend(local.read_items(&CatalogScope::Subtree(folder)).await?);
        }
    }

    let remote_last_played_exists = match remote.last_played_path() {
        Some(path) => local.find_item(path).await?.is_some(),
        None => false,
    };

    let scope_folder_exists = match scope {
        ReconcileScope::Folder(Some(folder)) => local
            .find_item(folder)
            .await?
            .map_or(false, |item| item.is_folder()),
        _ => false,
    };

    Ok(LocalView {
        items,
        last_played: local.read_last_played().await?,
        remote_last_played_exists,
        scope_folder_exists,
    })
}

/// Compute the merge without touching the store.
pub fn plan_merge(local: &LocalView, remote: &SyncSnapshot, scope: &ReconcileScope) -> MergePlan {
    let local_items: BTreeMap<&str, &CatalogItem> = local
        .items
        .iter()
        .map(|item| (item.relative_path.as_str(), item))
        .collect();
    let remote_items: BTreeMap<&str, &CatalogItem> = remote
        .items()
        .filter(|item| scope.contains(&item.relative_path))
        .map(|item| (item.relative_path.as_str(), item))
        .collect();

    let mut diff = CatalogDiff::default();
    let mut result = ReconcileResult::default();

    // Folders an inserted item may be placed in.
    let mut folders: BTreeSet<&str> = local_items
        .values()
        .filter(|item| item.is_folder())
        .map(|item| item.relative_path.as_str())
        .collect();
    if let ReconcileScope::Folder(Some(folder)) = scope {
        if local.scope_folder_exists {
            folders.insert(folder.as_str());
        }
    }

    let mut ordered: Vec<&CatalogItem> = remote_items.values().copied().collect();
    ordered.sort_by_key(|item| item.depth());

    let mut accepted: BTreeSet<&str> = BTreeSet::new();
    for remote_item in ordered {
        let path = remote_item.relative_path.as_str();
        match local_items.get(path) {
            None => {
                let has_parent = remote_item
                    .parent_path()
                    .map_or(true, |parent| folders.contains(parent));
                if !has_parent {
                    warn!(path, "Skipped remote item without a parent folder");
                    continue;
                }
                diff.inserts.push(remote_item.clone());
            }
            Some(local_item) => {
                let merged = merge_item(local_item, remote_item);
                if &merged != *local_item {
                    diff.updates.push(merged);
                }
            }
        }

        accepted.insert(path);
        if remote_item.is_folder() {
            folders.insert(path);
        } else {
            folders.remove(path);
        }
    }

    // Everything that exists after the merge unless deleted below.
    let mut surviving: BTreeSet<&str> = local_items.keys().copied().collect();
    surviving.extend(accepted);

    let mut candidates: Vec<&CatalogItem> = local_items
        .iter()
        .filter(|(path, _)| !remote_items.contains_key(*path))
        .map(|(_, item)| *item)
        .collect();
    candidates.sort_by_key(|item| std::cmp::Reverse(item.depth()));

    let mut deleted: BTreeSet<&str> = BTreeSet::new();
    for item in candidates {
        let path = item.relative_path.as_str();
        let newer_locally = item
            .progress_updated_at
            .map_or(false, |updated| updated > remote.captured_at());
        let keeps_descendant = item.is_folder() && has_descendant(&surviving, path);

        if newer_locally || keeps_descendant {
            if !item.pending_upload {
                diff.pending_upload.push(path.to_string());
                result.deferred_count += 1;
            }
            debug!(path, newer_locally, keeps_descendant, "Deferred deletion");
        } else {
            surviving.remove(path);
            deleted.insert(path);
            diff.deletions.push(path.to_string());
        }
    }

    let (signal, pointer) = resolve_last_played(local, remote, &surviving, &deleted);
    diff.last_played = pointer;

    result.inserted_count = diff.inserts.len() as u64;
    result.updated_count = diff.updates.len() as u64;
    result.deleted_count = diff.deletions.len() as u64;
    result.signal = signal;

    MergePlan { diff, result }
}

/// Remote metadata, local progress unless the remote progress is strictly newer.
fn merge_item(local: &CatalogItem, remote: &CatalogItem) -> CatalogItem {
    let mut merged = local.clone();
    merged.kind = remote.kind;
    merged.title = remote.title.clone();
    merged.details = remote.details.clone();
    merged.duration = remote.duration;
    merged.order_rank = remote.order_rank;

    if remote.progress().is_newer_than(&local.progress()) {
        merged.set_progress(remote.progress());
    }
    merged
}

fn has_descendant(paths: &BTreeSet<&str>, folder: &str) -> bool {
    let prefix = format!("{}/", folder);
    paths
        .range::<str, _>((std::ops::Bound::Included(prefix.as_str()), std::ops::Bound::Unbounded))
        .next()
        .map_or(false, |candidate| is_descendant(candidate, folder))
}

fn resolve_last_played(
    local: &LocalView,
    remote: &SyncSnapshot,
    surviving: &BTreeSet<&str>,
    deleted: &BTreeSet<&str>,
) -> (SyncSignal, PointerChange) {
    let local_pointer = local.last_played.as_ref().map(|p| p.relative_path.as_str());
    let local_pointer_deleted = local_pointer.map_or(false, |path| deleted.contains(path));
    let fallback = if local_pointer_deleted {
        PointerChange::Clear
    } else {
        PointerChange::Keep
    };

    let Some(remote_pointer) = remote.last_played_path() else {
        return (SyncSignal::None, fallback);
    };
    if Some(remote_pointer) == local_pointer {
        return (SyncSignal::None, fallback);
    }

    let exists_after = if surviving.contains(remote_pointer) {
        true
    } else {
        local.remote_last_played_exists && !deleted.contains(remote_pointer)
    };
    if !exists_after {
        debug!(remote_pointer, "Remote last-played item is gone after the merge");
        return (SyncSignal::None, fallback);
    }

    let signal = if local.remote_last_played_exists {
        SyncSignal::DifferentLastBook(remote_pointer.to_string())
    } else {
        SyncSignal::ReloadLastBook(remote_pointer.to_string())
    };
    (signal, PointerChange::Set(remote_pointer.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPTURED_AT: i64 = 1_000;

    fn snapshot(items: Vec<CatalogItem>, last_played: Option<&str>) -> SyncSnapshot {
        SyncSnapshot::new(items, last_played.map(str::to_string), CAPTURED_AT).unwrap()
    }

    fn view(items: Vec<CatalogItem>, last_played: Option<&str>) -> LocalView {
        LocalView {
            items,
            last_played: last_played.map(LastPlayedPointer::new),
            remote_last_played_exists: false,
            scope_folder_exists: false,
        }
    }

    #[test]
    fn test_remote_only_items_are_inserted() {
        let remote = snapshot(
            vec![
                CatalogItem::folder("Books", "Books"),
                CatalogItem::book("Books/a.mp3", "A", 10.0),
            ],
            None,
        );
        let plan = plan_merge(&view(vec![], None), &remote, &ReconcileScope::AllLibrary);

        assert_eq!(plan.result.inserted_count, 2);
        assert_eq!(plan.diff.inserts.len(), 2);
        assert_eq!(plan.result.signal, SyncSignal::None);
    }

    #[test]
    fn test_local_only_items_are_deleted_unless_progress_is_newer() {
        let stale = CatalogItem::book("old.mp3", "Old", 10.0).with_progress(1.0, CAPTURED_AT - 1);
        let fresh =
            CatalogItem::book("fresh.mp3", "Fresh", 10.0).with_progress(1.0, CAPTURED_AT + 1);
        let at_capture =
            CatalogItem::book("tie.mp3", "Tie", 10.0).with_progress(1.0, CAPTURED_AT);

        let plan = plan_merge(
            &view(vec![stale, fresh, at_capture], None),
            &snapshot(vec![], None),
            &ReconcileScope::AllLibrary,
        );

        assert_eq!(plan.result.deleted_count, 2);
        assert_eq!(plan.result.deferred_count, 1);
        assert_eq!(plan.diff.pending_upload, vec!["fresh.mp3".to_string()]);
        assert!(plan.diff.deletions.contains(&"old.mp3".to_string()));
        assert!(plan.diff.deletions.contains(&"tie.mp3".to_string()));
    }

    #[test]
    fn test_already_flagged_item_is_not_counted_again() {
        let mut fresh =
            CatalogItem::book("fresh.mp3", "Fresh", 10.0).with_progress(1.0, CAPTURED_AT + 1);
        fresh.pending_upload = true;

        let plan = plan_merge(
            &view(vec![fresh], None),
            &snapshot(vec![], None),
            &ReconcileScope::AllLibrary,
        );

        assert_eq!(plan.result.deferred_count, 0);
        assert!(plan.diff.is_empty());
    }

    #[test]
    fn test_folder_with_deferred_child_is_kept() {
        let local = vec![
            CatalogItem::folder("Books", "Books"),
            CatalogItem::book("Books/fresh.mp3", "Fresh", 10.0).with_progress(1.0, CAPTURED_AT + 5),
            CatalogItem::book("Books/old.mp3", "Old", 10.0),
        ];

        let plan = plan_merge(
            &view(local, None),
            &snapshot(vec![], None),
            &ReconcileScope::AllLibrary,
        );

        assert_eq!(plan.diff.deletions, vec!["Books/old.mp3".to_string()]);
        assert_eq!(plan.result.deferred_count, 2);
        assert!(plan.diff.pending_upload.contains(&"Books".to_string()));
    }

    #[test]
    fn test_folder_holding_remote_children_is_kept() {
        let local = vec![CatalogItem::folder("Books", "Books")];
        let remote = snapshot(vec![CatalogItem::book("Books/a.mp3", "A", 10.0)], None);

        let plan = plan_merge(&view(local, None), &remote, &ReconcileScope::AllLibrary);

        assert!(plan.diff.deletions.is_empty());
        assert_eq!(plan.result.inserted_count, 1);
    }

    #[test]
    fn test_folder_scope_ignores_remote_items_outside_it() {
        let remote = snapshot(
            vec![
                CatalogItem::book("Books/a.mp3", "A", 10.0),
                CatalogItem::book("Books/Deep/b.mp3", "B", 10.0),
                CatalogItem::book("top.mp3", "Top", 10.0),
            ],
            None,
        );

        let mut local = view(vec![], None);
        local.scope_folder_exists = true;
        let plan = plan_merge(
            &local,
            &remote,
            &ReconcileScope::Folder(Some("Books".to_string())),
        );

        let inserted: Vec<_> = plan.diff.inserts.iter().map(|i| i.relative_path.as_str()).collect();
        assert_eq!(inserted, vec!["Books/a.mp3"]);
    }

    #[test]
    fn test_items_without_a_parent_folder_are_skipped() {
        let remote = snapshot(
            vec![
                CatalogItem::book("a.mp3", "A", 10.0),
                CatalogItem::book("Missing/b.mp3", "B", 10.0),
                CatalogItem::folder("Missing/Deep", "Deep"),
                CatalogItem::book("Missing/Deep/c.mp3", "C", 10.0),
                CatalogItem::folder("Books", "Books"),
                CatalogItem::book("Books/d.mp3", "D", 10.0),
            ],
            Some("Missing/b.mp3"),
        );

        let plan = plan_merge(&view(vec![], None), &remote, &ReconcileScope::AllLibrary);

        let inserted: Vec<_> = plan.diff.inserts.iter().map(|i| i.relative_path.as_str()).collect();
        assert_eq!(inserted, vec!["Books", "a.mp3", "Books/d.mp3"]);
        assert_eq!(plan.result.inserted_count, 3);
        assert_eq!(plan.result.signal, SyncSignal::None);
        assert_eq!(plan.diff.last_played, PointerChange::Keep);
    }

    #[test]
    fn test_folder_scope_without_local_folder_inserts_nothing() {
        let remote = snapshot(vec![CatalogItem::book("Books/a.mp3", "A", 10.0)], None);

        let plan = plan_merge(
            &view(vec![], None),
            &remote,
            &ReconcileScope::Folder(Some("Books".to_string())),
        );

        assert!(plan.diff.is_empty());
        assert_eq!(plan.result.inserted_count, 0);
    }

    #[test]
    fn test_progress_merge_prefers_strictly_newer_remote() {
        let local = CatalogItem::book("a.mp3", "A", 100.0).with_progress(10.0, 500);

        let newer = CatalogItem::book("a.mp3", "A", 100.0).with_progress(60.0, 600);
        let merged = merge_item(&local, &newer);
        assert_eq!(merged.current_time, 60.0);
        assert_eq!(merged.progress_updated_at, Some(600));

        let tie = CatalogItem::book("a.mp3", "A", 100.0).with_progress(90.0, 500);
        assert_eq!(merge_item(&local, &tie).current_time, 10.0);

        let older = CatalogItem::book("a.mp3", "A (new title)", 100.0).with_progress(5.0, 100);
        let merged = merge_item(&local, &older);
        assert_eq!(merged.current_time, 10.0);
        assert_eq!(merged.title, "A (new title)");
    }

    #[test]
    fn test_unchanged_item_is_not_an_update() {
        let item = CatalogItem::book("a.mp3", "A", 100.0).with_progress(10.0, 500);
        let plan = plan_merge(
            &view(vec![item.clone()], None),
            &snapshot(vec![item], None),
            &ReconcileScope::AllLibrary,
        );
        assert!(plan.diff.is_empty());
        assert!(!plan.result.changed_anything());
    }

    #[test]
    fn test_remote_pointer_to_new_item_requests_reload() {
        let remote = snapshot(
            vec![
                CatalogItem::book("a.mp3", "A", 10.0),
                CatalogItem::book("b.mp3", "B", 10.0),
            ],
            Some("b.mp3"),
        );
        let local = view(vec![CatalogItem::book("a.mp3", "A", 10.0)], Some("a.mp3"));

        let plan = plan_merge(&local, &remote, &ReconcileScope::AllLibrary);

        assert_eq!(plan.result.signal, SyncSignal::ReloadLastBook("b.mp3".to_string()));
        assert_eq!(plan.diff.last_played, PointerChange::Set("b.mp3".to_string()));
    }

    #[test]
    fn test_remote_pointer_to_existing_item_is_a_different_book() {
        let items = vec![
            CatalogItem::book("a.mp3", "A", 10.0),
            CatalogItem::book("b.mp3", "B", 10.0),
        ];
        let remote = snapshot(items.clone(), Some("b.mp3"));
        let mut local = view(items, Some("a.mp3"));
        local.remote_last_played_exists = true;

        let plan = plan_merge(&local, &remote, &ReconcileScope::AllLibrary);

        assert_eq!(
            plan.result.signal,
            SyncSignal::DifferentLastBook("b.mp3".to_string())
        );
        assert_eq!(plan.diff.last_played, PointerChange::Set("b.mp3".to_string()));
    }

    #[test]
    fn test_matching_or_absent_remote_pointer_changes_nothing() {
        let items = vec![CatalogItem::book("a.mp3", "A", 10.0)];

        let mut same = view(items.clone(), Some("a.mp3"));
        same.remote_last_played_exists = true;
        let plan = plan_merge(
            &same,
            &snapshot(items.clone(), Some("a.mp3")),
            &ReconcileScope::AllLibrary,
        );
        assert_eq!(plan.result.signal, SyncSignal::None);
        assert_eq!(plan.diff.last_played, PointerChange::Keep);

        let plan = plan_merge(
            &view(items.clone(), Some("a.mp3")),
            &snapshot(items, None),
            &ReconcileScope::AllLibrary,
        );
        assert_eq!(plan.result.signal, SyncSignal::None);
        assert_eq!(plan.diff.last_played, PointerChange::Keep);
    }

    #[test]
    fn test_remote_pointer_to_deleted_item_is_ignored() {
        let local_items = vec![
            CatalogItem::book("a.mp3", "A", 10.0),
            CatalogItem::book("c.mp3", "C", 10.0),
        ];
        let mut local = view(local_items, Some("a.mp3"));
        local.remote_last_played_exists = true;
        let remote = snapshot(vec![CatalogItem::book("a.mp3", "A", 10.0)], Some("c.mp3"));

        let plan = plan_merge(&local, &remote, &ReconcileScope::AllLibrary);

        assert_eq!(plan.diff.deletions, vec!["c.mp3".to_string()]);
        assert_eq!(plan.result.signal, SyncSignal::None);
        assert_eq!(plan.diff.last_played, PointerChange::Keep);
    }

    #[test]
    fn test_deleted_pointer_target_is_cleared() {
        let local = view(vec![CatalogItem::book("gone.mp3", "Gone", 10.0)], Some("gone.mp3"));

        let plan = plan_merge(&local, &snapshot(vec![], None), &ReconcileScope::AllLibrary);

        assert_eq!(plan.diff.deletions, vec!["gone.mp3".to_string()]);
        assert_eq!(plan.diff.last_played, PointerChange::Clear);
    }
}
