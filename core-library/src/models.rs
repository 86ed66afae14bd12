//! Domain models for the media catalog
//!
//! A catalog is a tree of folders and playable books keyed by their relative
//! path. Containment is derived from the path itself, so the tree can never
//! contain a cycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Store Version
// =============================================================================

/// Schema version of a persisted store.
///
/// `0` is an empty store with no catalog schema. Versions only ever move
/// forward, one migration step at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreVersion(pub u32);

impl StoreVersion {
    /// Empty store, no schema.
    pub const EMPTY: StoreVersion = StoreVersion(0);

    pub const fn new(version: u32) -> Self {
        Self(version)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    /// The version a single step moves this one to, `None` past `u32::MAX`.
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(version) => Some(Self(version)),
            None => None,
        }
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for StoreVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<u32> for StoreVersion {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

// =============================================================================
// Paths
// =============================================================================

/// Parent folder of a relative path, `None` for top-level items.
pub fn parent_path(relative_path: &str) -> Option<&str> {
    relative_path.rsplit_once('/').map(|(parent, _)| parent)
}

/// Whether `path` sits strictly below `ancestor`.
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// Number of segments in a relative path.
pub fn path_depth(relative_path: &str) -> usize {
    relative_path.split('/').count()
}

/// Reject paths that cannot name a catalog item.
pub fn validate_relative_path(relative_path: &str) -> Result<(), String> {
    if relative_path.is_empty() {
        return Err("Relative path cannot be empty".to_string());
    }

    if relative_path.starts_with('/') || relative_path.ends_with('/') {
        return Err(format!(
            "Relative path '{}' cannot start or end with '/'",
            relative_path
        ));
    }

    for segment in relative_path.split('/') {
        match segment {
            "" => {
                return Err(format!(
                    "Relative path '{}' contains an empty segment",
                    relative_path
                ))
            }
            "." | ".." => {
                return Err(format!(
                    "Relative path '{}' contains a '{}' segment",
                    relative_path, segment
                ))
            }
            _ => {}
        }
    }

    Ok(())
}

// =============================================================================
// Catalog Items
// =============================================================================

/// Folder or playable book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Folder,
    Book,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Folder => "folder",
            ItemKind::Book => "book",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "folder" => Ok(ItemKind::Folder),
            "book" => Ok(ItemKind::Book),
            other => Err(format!("Unknown item kind '{}'", other)),
        }
    }
}

/// Playback progress of a single item.
///
/// `updated_at` is the millisecond timestamp of the last local progress
/// write (the last play date). `None` means the item was never played here.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ItemProgress {
    /// Position in seconds
    pub current_time: f64,
    pub percent_completed: f64,
    pub is_finished: bool,
    pub updated_at: Option<i64>,
}

impl ItemProgress {
    /// Whether this progress was written strictly after `other`.
    ///
    /// Unplayed progress is never newer than anything.
    pub fn is_newer_than(&self, other: &ItemProgress) -> bool {
        match (self.updated_at, other.updated_at) {
            (Some(mine), Some(theirs)) => mine > theirs,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Folder or book in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Path relative to the library root; primary key
    pub relative_path: String,
    pub kind: ItemKind,
    pub title: String,
    /// Author or free-form description
    pub details: String,
    /// Duration in seconds (0 for folders)
    pub duration: f64,
    /// Position in seconds
    pub current_time: f64,
    pub percent_completed: f64,
    pub is_finished: bool,
    /// Position among siblings
    pub order_rank: i64,
    /// Last local progress write, milliseconds since epoch
    pub progress_updated_at: Option<i64>,
    /// Flagged for a future push to the remote
    pub pending_upload: bool,
}

impl CatalogItem {
    fn new(relative_path: impl Into<String>, kind: ItemKind, title: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            kind,
            title: title.into(),
            details: String::new(),
            duration: 0.0,
            current_time: 0.0,
            percent_completed: 0.0,
            is_finished: false,
            order_rank: 0,
            progress_updated_at: None,
            pending_upload: false,
        }
    }

    /// Create an empty folder
    pub fn folder(relative_path: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(relative_path, ItemKind::Folder, title)
    }

    /// Create an unplayed book
    pub fn book(relative_path: impl Into<String>, title: impl Into<String>, duration: f64) -> Self {
        let mut item = Self::new(relative_path, ItemKind::Book, title);
        item.duration = duration;
        item
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    pub fn with_order_rank(mut self, rank: i64) -> Self {
        self.order_rank = rank;
        self
    }

    /// Record playback at `current_time` seconds, written at `updated_at` ms.
    pub fn with_progress(mut self, current_time: f64, updated_at: i64) -> Self {
        self.current_time = current_time;
        self.percent_completed = if self.duration > 0.0 {
            (current_time / self.duration * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        self.progress_updated_at = Some(updated_at);
        self
    }

    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    pub fn parent_path(&self) -> Option<&str> {
        parent_path(&self.relative_path)
    }

    pub fn depth(&self) -> usize {
        path_depth(&self.relative_path)
    }

    pub fn is_descendant_of(&self, ancestor: &str) -> bool {
        is_descendant(&self.relative_path, ancestor)
    }

    pub fn progress(&self) -> ItemProgress {
        ItemProgress {
            current_time: self.current_time,
            percent_completed: self.percent_completed,
            is_finished: self.is_finished,
            updated_at: self.progress_updated_at,
        }
    }

    pub fn set_progress(&mut self, progress: ItemProgress) {
        self.current_time = progress.current_time;
        self.percent_completed = progress.percent_completed;
        self.is_finished = progress.is_finished;
        self.progress_updated_at = progress.updated_at;
    }

    /// Validate item data
    pub fn validate(&self) -> Result<(), String> {
        validate_relative_path(&self.relative_path)?;

        if self.title.trim().is_empty() {
            return Err(format!("Item '{}' has an empty title", self.relative_path));
        }

        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(format!(
                "Item '{}' has an invalid duration {}",
                self.relative_path, self.duration
            ));
        }

        if !self.current_time.is_finite() || self.current_time < 0.0 {
            return Err(format!(
                "Item '{}' has an invalid position {}",
                self.relative_path, self.current_time
            ));
        }

        if !(0.0..=100.0).contains(&self.percent_completed) {
            return Err(format!(
                "Item '{}' has percent_completed {} outside 0..=100",
                self.relative_path, self.percent_completed
            ));
        }

        Ok(())
    }
}

/// The single store-wide reference to the most recently played item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LastPlayedPointer {
    pub relative_path: String,
}

impl LastPlayedPointer {
    pub fn new(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
        }
    }
}

// =============================================================================
// Reads and Writes
// =============================================================================

/// Which part of the catalog a read covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogScope {
    /// Every item
    Library,
    /// Direct children of a folder; `None` is the top level
    Children(Option<String>),
    /// Strict descendants of a folder
    Subtree(String),
}

impl CatalogScope {
    pub fn contains(&self, relative_path: &str) -> bool {
        match self {
            CatalogScope::Library => true,
            CatalogScope::Children(folder) => parent_path(relative_path) == folder.as_deref(),
            CatalogScope::Subtree(folder) => is_descendant(relative_path, folder),
        }
    }
}

/// What a write does to the last-played pointer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerChange {
    #[default]
    Keep,
    Set(String),
    Clear,
}

/// A set of catalog changes applied as one atomic write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogDiff {
    pub inserts: Vec<CatalogItem>,
    pub updates: Vec<CatalogItem>,
    /// Relative paths to delete
    pub deletions: Vec<String>,
    /// Relative paths whose `pending_upload` flag is raised
    pub pending_upload: Vec<String>,
    pub last_played: PointerChange,
}

impl CatalogDiff {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.deletions.is_empty()
            && self.pending_upload.is_empty()
            && self.last_played == PointerChange::Keep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_version_ordering() {
        assert!(StoreVersion::EMPTY.is_empty());
        assert_eq!(StoreVersion::EMPTY.next(), Some(StoreVersion(1)));
        assert_eq!(StoreVersion(u32::MAX).next(), None);
        assert!(StoreVersion(2) < StoreVersion(3));
        assert_eq!(StoreVersion(4).to_string(), "v4");
    }

    #[test]
    fn test_parent_path_and_descendants() {
        assert_eq!(parent_path("Books"), None);
        assert_eq!(parent_path("Books/Tolkien/hobbit.m4b"), Some("Books/Tolkien"));

        assert!(is_descendant("Books/Tolkien/hobbit.m4b", "Books"));
        assert!(is_descendant("Books/Tolkien", "Books"));
        assert!(!is_descendant("Books", "Books"));
        assert!(!is_descendant("Bookshelf/a.mp3", "Books"));
    }

    #[test]
    fn test_path_validation() {
        assert!(validate_relative_path("Books/a.mp3").is_ok());
        assert!(validate_relative_path("").is_err());
        assert!(validate_relative_path("Books/").is_err());
        assert!(validate_relative_path("/Books").is_err());
        assert!(validate_relative_path("Books//a.mp3").is_err());
        assert!(validate_relative_path("Books/../a.mp3").is_err());
        assert!(validate_relative_path("./a.mp3").is_err());
    }

    #[test]
    fn test_item_kind_parse() {
        assert_eq!("folder".parse::<ItemKind>().unwrap(), ItemKind::Folder);
        assert_eq!("book".parse::<ItemKind>().unwrap(), ItemKind::Book);
        assert!("track".parse::<ItemKind>().is_err());
        assert_eq!(
            serde_json::to_string(&ItemKind::Book).unwrap(),
            "\"book\""
        );
    }

    #[test]
    fn test_item_validation() {
        let book = CatalogItem::book("Books/a.mp3", "A", 100.0).with_progress(25.0, 1_000);
        assert!(book.validate().is_ok());
        assert_eq!(book.percent_completed, 25.0);
        assert_eq!(book.parent_path(), Some("Books"));

        let mut untitled = CatalogItem::folder("Books", "  ");
        assert!(untitled.validate().is_err());
        untitled.title = "Books".to_string();
        assert!(untitled.validate().is_ok());

        let mut negative = CatalogItem::book("b.mp3", "B", 10.0);
        negative.current_time = -1.0;
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_progress_recency() {
        let played = ItemProgress {
            updated_at: Some(20),
            ..Default::default()
        };
        let earlier = ItemProgress {
            updated_at: Some(10),
            ..Default::default()
        };
        let unplayed = ItemProgress::default();

        assert!(played.is_newer_than(&earlier));
        assert!(!earlier.is_newer_than(&played));
        assert!(!played.is_newer_than(&played.clone()));
        assert!(played.is_newer_than(&unplayed));
        assert!(!unplayed.is_newer_than(&earlier));
    }

    #[test]
    fn test_scope_membership() {
        assert!(CatalogScope::Library.contains("a/b/c"));

        let top = CatalogScope::Children(None);
        assert!(top.contains("Books"));
        assert!(!top.contains("Books/a.mp3"));

        let children = CatalogScope::Children(Some("Books".to_string()));
        assert!(children.contains("Books/a.mp3"));
        assert!(!children.contains("Books/Tolkien/hobbit.m4b"));

        let subtree = CatalogScope::Subtree("Books".to_string());
        assert!(subtree.contains("Books/Tolkien/hobbit.m4b"));
        assert!(!subtree.contains("Books"));
    }

    #[test]
    fn test_empty_diff() {
        let mut diff = CatalogDiff::default();
        assert!(diff.is_empty());
        diff.last_played = PointerChange::Clear;
        assert!(!diff.is_empty());
    }
}
