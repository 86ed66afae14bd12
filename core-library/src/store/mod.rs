//! # Store Accessor
//!
//! The only way the rest of the engine reads or writes the catalog. The
//! migration orchestrator uses it to read the store version and to open the
//! store once the schema is current; the reconciler uses it for every read
//! and for the single atomic write of a merge.

mod sqlite;
pub(crate) mod version;

pub use sqlite::SqliteCatalogStore;
pub use version::MIGRATIONS_TABLE;

use crate::error::{OpenError, Result};
use crate::models::{CatalogDiff, CatalogItem, CatalogScope, LastPlayedPointer, StoreVersion};
use async_trait::async_trait;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Tables a loadable store must contain.
pub const REQUIRED_TABLES: &[&str] = &["catalog_items", "library_state"];

/// Catalog access contract.
#[async_trait]
pub trait StoreAccessor: Send + Sync {
    /// Verify the store is reachable and carries the catalog schema.
    async fn open_store(&self) -> std::result::Result<(), OpenError>;

    async fn get_version(&self) -> Result<StoreVersion>;

    /// Items within `scope`, ordered by relative path.
    async fn read_items(&self, scope: &CatalogScope) -> Result<Vec<CatalogItem>>;

    async fn find_item(&self, relative_path: &str) -> Result<Option<CatalogItem>>;

    /// Apply every change in `diff` as one transaction.
    ///
    /// # Errors
    /// Returns error if:
    /// - an inserted or updated item fails validation
    /// - an updated item does not exist
    /// - the pointer is set to an item that does not exist after the write
    ///
    /// Nothing is written when an error is returned.
    async fn write_items(&self, diff: &CatalogDiff) -> Result<()>;

    async fn read_last_played(&self) -> Result<Option<LastPlayedPointer>>;

    /// Point at `relative_path`, or clear the pointer with `None`.
    ///
    /// # Errors
    /// `LibraryError::NotFound` if no item exists at `relative_path`.
    async fn write_last_played(&self, relative_path: Option<&str>) -> Result<()>;

    async fn count_items(&self) -> Result<i64>;
}

/// Delete a store database and its `-wal` / `-shm` companions.
///
/// Missing files are skipped. Returns the files that were removed. The store
/// must be closed before calling this.
pub async fn cleanup_store_files(database_path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let database_path = database_path.as_ref();
    let mut removed = Vec::new();

    for candidate in store_files(database_path) {
        match tokio::fs::remove_file(&candidate).await {
            Ok(()) => removed.push(candidate),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = ?candidate, error = %err, "Failed to remove store file");
                return Err(err.into());
            }
        }
    }

    info!(path = ?database_path, removed = removed.len(), "Cleaned up store files");
    Ok(removed)
}

fn store_files(database_path: &Path) -> [PathBuf; 3] {
    let with_suffix = |suffix: &str| {
        let mut name = OsString::from(database_path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    };
    [
        database_path.to_path_buf(),
        with_suffix("-wal"),
        with_suffix("-shm"),
    ]
}
