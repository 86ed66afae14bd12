//! Immutable remote catalog state used as the input of a merge.

use crate::error::{Result, SyncError};
use bridge_traits::remote::{RemoteCatalogItem, RemoteItemKind, RemoteSnapshot};
use core_library::models::{validate_relative_path, CatalogItem, ItemKind};
use std::collections::BTreeMap;

/// Validated remote snapshot keyed by relative path.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    items: BTreeMap<String, CatalogItem>,
    last_played_path: Option<String>,
    captured_at: i64,
}

impl SyncSnapshot {
    /// A parent may be absent from the snapshot (folder fetches only carry
    /// children), but when it is present it must be a folder.
    ///
    /// # Errors
    /// `SyncError::InvalidSnapshot` if an item is invalid, two items share
    /// a relative path, or an item sits below a book.
    pub fn new(
        items: Vec<CatalogItem>,
        last_played_path: Option<String>,
        captured_at: i64,
    ) -> Result<Self> {
        let mut by_path = BTreeMap::new();
        for item in items {
            item.validate().map_err(SyncError::InvalidSnapshot)?;
            let path = item.relative_path.clone();
            if by_path.insert(path.clone(), item).is_some() {
                return Err(SyncError::InvalidSnapshot(format!(
                    "duplicate relative path '{}'",
                    path
                )));
            }
        }

        for item in by_path.values() {
            let Some(parent) = item.parent_path() else {
                continue;
            };
            if by_path.get(parent).map_or(false, |p| !p.is_folder()) {
                return Err(SyncError::InvalidSnapshot(format!(
                    "'{}' is inside '{}', which is not a folder",
                    item.relative_path, parent
                )));
            }
        }

        if let Some(path) = &last_played_path {
            validate_relative_path(path).map_err(SyncError::InvalidSnapshot)?;
        }

        Ok(Self {
            items: by_path,
            last_played_path,
            captured_at,
        })
    }

    pub fn from_remote(remote: RemoteSnapshot) -> Result<Self> {
        let items = remote.items.into_iter().map(remote_to_item).collect();
        Self::new(items, remote.last_played_path, remote.captured_at)
    }

    /// Items ordered by relative path.
    pub fn items(&self) -> impl Iterator<Item = &CatalogItem> {
        self.items.values()
    }

    pub fn get(&self, relative_path: &str) -> Option<&CatalogItem> {
        self.items.get(relative_path)
    }

    pub fn last_played_path(&self) -> Option<&str> {
        self.last_played_path.as_deref()
    }

    /// Unix millis at which the remote state was captured.
    pub fn captured_at(&self) -> i64 {
        self.captured_at
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn remote_to_item(remote: RemoteCatalogItem) -> CatalogItem {
    CatalogItem {
        relative_path: remote.relative_path,
        kind: match remote.kind {
            RemoteItemKind::Folder => ItemKind::Folder,
            RemoteItemKind::Book => ItemKind::Book,
        },
        title: remote.title,
        details: remote.details,
        duration: remote.duration,
        current_time: remote.current_time,
        percent_completed: remote.percent_completed,
        is_finished: remote.is_finished,
        order_rank: remote.order_rank,
        progress_updated_at: remote.progress_updated_at,
        pending_upload: false,
    }
}
