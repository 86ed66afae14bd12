//! Remote catalog abstraction.
//!
//! The transport (HTTP API, CloudKit, a test fixture) is the host's business.
//! The core only needs two reads: the contents of one folder, or the whole
//! library. Both return a [`RemoteSnapshot`], an immutable picture of the
//! remote catalog taken at `captured_at`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FetchResult;

/// Kind of a remote catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteItemKind {
    Folder,
    Book,
}

/// One catalog entry as reported by the remote.
///
/// `relative_path` uses `/` separators and is unique within a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCatalogItem {
    pub relative_path: String,
    pub kind: RemoteItemKind,
    pub title: String,
    #[serde(default)]
    pub details: String,
    /// Total duration in seconds
    #[serde(default)]
    pub duration: f64,
    /// Playback position in seconds
    #[serde(default)]
    pub current_time: f64,
    #[serde(default)]
    pub percent_completed: f64,
    #[serde(default)]
    pub is_finished: bool,
    #[serde(default)]
    pub order_rank: i64,
    /// Unix millis of the last progress write on the remote side
    #[serde(default)]
    pub progress_updated_at: Option<i64>,
}

/// Remote catalog state at a single instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    pub items: Vec<RemoteCatalogItem>,
    /// Relative path of the item the remote considers last played
    pub last_played_path: Option<String>,
    /// Unix millis at which the remote state was captured
    pub captured_at: i64,
}

/// Source of remote catalog snapshots.
///
/// Implementations must not retry internally beyond their own transport
/// policy; the sync coordinator owns timeouts and cancellation.
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// Fetch the direct children of `scope`. `None` means the top level.
    async fn fetch_snapshot(&self, scope: Option<&str>) -> FetchResult<RemoteSnapshot>;

    /// Fetch every item of the library.
    async fn fetch_full_catalog(&self) -> FetchResult<RemoteSnapshot>;
}
