//! # Catalog Store
//!
//! Owns the local catalog database: the folder/book tree, the last-played
//! pointer and the schema migration chain that keeps older stores loadable.
//!
//! ## Overview
//!
//! - [`models`]: catalog items, scopes and atomic diffs
//! - [`store`]: the [`StoreAccessor`](store::StoreAccessor) contract and its
//!   SQLite implementation
//! - [`migration`]: planner, executor and orchestrator that bring a store to
//!   the latest version before anything reads it
//! - [`adapters`]: `sqlx` implementation of the bridge `DatabaseAdapter`

pub mod adapters;
pub mod db;
pub mod error;
pub mod migration;
pub mod models;
pub mod store;

pub use error::{LibraryError, OpenError, Result};
pub use migration::{MigrationError, MigrationOrchestrator, ReadyStore};
pub use store::{cleanup_store_files, SqliteCatalogStore, StoreAccessor};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::migration::{steps::catalog_steps, MigrationExecutor};
    use crate::store::SqliteCatalogStore;
    use bridge_traits::database::DatabaseConfig;

    /// In-memory store with the whole built-in chain applied.
    pub async fn migrated_store() -> SqliteCatalogStore {
        let store = SqliteCatalogStore::open(DatabaseConfig::in_memory())
            .await
            .unwrap();
        let executor = MigrationExecutor::new(store.adapter());
        for step in catalog_steps() {
            executor.apply(step.as_ref()).await.unwrap();
        }
        store
    }
}
