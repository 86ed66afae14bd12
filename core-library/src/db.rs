//! # Database Connection Pool Module
//!
//! SQLite connection pooling for the catalog store.
//!
//! ## Features
//!
//! - **WAL Mode**: one writer, many readers; produces the `-wal` / `-shm`
//!   companion files removed by [`cleanup_store_files`](crate::store::cleanup_store_files)
//! - **Foreign Keys**: enforced on every connection
//! - **Health Checks**: connection validation before the pool is handed out
//!
//! Schema creation is NOT done here. The catalog schema is owned by the
//! migration chain in [`crate::migration`], so a freshly created database is
//! an empty store at version 0.
//!
//! ## Testing
//!
//! ```rust,ignore
//! let pool = create_test_pool().await?;
//! ```

use crate::{LibraryError, Result};
use bridge_traits::database::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Create a configured SQLite connection pool.
///
/// The database file is created when missing.
pub async fn create_pool(config: &DatabaseConfig) -> Result<Pool<Sqlite>> {
    info!(
        database_url = %config.database_url,
        max_connections = config.max_connections,
        "Creating database connection pool"
    );

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(LibraryError::Database)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true)
        .statement_cache_capacity(config.statement_cache_capacity);

    let pool = SqlitePoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to create connection pool");
            LibraryError::Database(e)
        })?;

    health_check(&pool).await?;

    debug!(connections = pool.size(), "Database connection pool ready");
    Ok(pool)
}

/// In-memory pool for tests. The store starts empty (version 0).
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(&DatabaseConfig::in_memory()).await
}

/// Execute a trivial query to verify the pool can serve connections.
pub async fn health_check(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!(error = %e, "Database health check failed");
        LibraryError::Database(e)
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_test_pool_is_empty() {
        let pool = create_test_pool().await.unwrap();

        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 0, "a new store has no schema until migrated");
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let pool = create_test_pool().await.unwrap();

        let (enabled,): (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn test_file_pool_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig::new(dir.path().join("library.sqlite"));
        let pool = create_pool(&config).await.unwrap();

        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        pool.close().await;
    }
}
