//! Native SQLite Database Adapter
//!
//! Implements the `DatabaseAdapter` trait using `sqlx` with the native SQLite driver.
//!
//! ## Features
//!
//! - Connection pooling with configurable limits
//! - Transactions pinned to a dedicated pooled connection
//! - Atomic batches
//! - Loose row decoding into [`QueryValue`]s

use async_trait::async_trait;
use bridge_traits::database::{
    DatabaseAdapter, DatabaseConfig, QueryRow, QueryValue, TransactionId,
};
use bridge_traits::error::{BridgeError, Result};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Pool, Row, Sqlite, Transaction};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::db;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Native SQLite implementation of DatabaseAdapter
///
/// Open transactions are parked in a map keyed by [`TransactionId`]; each one
/// owns its connection until it is committed, rolled back, or dropped.
pub struct SqliteAdapter {
    pool: Pool<Sqlite>,
    transaction_counter: AtomicU64,
    transactions: Mutex<HashMap<TransactionId, Transaction<'static, Sqlite>>>,
}

impl SqliteAdapter {
    /// Create the pool described by `config` and wrap it.
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        let pool = db::create_pool(&config)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Connection pool creation failed: {}", e)))?;

        info!(database_url = %config.database_url, "SQLite adapter ready");
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            transaction_counter: AtomicU64::new(1),
            transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Get a reference to the underlying connection pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Convert a sqlx row to a [`QueryRow`].
    ///
    /// SQLite is dynamically typed, so each column is probed as integer,
    /// real, text and blob in that order.
    fn row_to_query_row(row: &SqliteRow) -> QueryRow {
        let mut result = HashMap::with_capacity(row.columns().len());

        for column in row.columns() {
            let ordinal = column.ordinal();
            let value = if let Ok(v) = row.try_get::<Option<i64>, _>(ordinal) {
                v.map(QueryValue::Integer).unwrap_or(QueryValue::Null)
            } else if let Ok(v) = row.try_get::<Option<f64>, _>(ordinal) {
                v.map(QueryValue::Real).unwrap_or(QueryValue::Null)
            } else if let Ok(v) = row.try_get::<Option<String>, _>(ordinal) {
                v.map(QueryValue::Text).unwrap_or(QueryValue::Null)
            } else if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(ordinal) {
                v.map(QueryValue::Blob).unwrap_or(QueryValue::Null)
            } else {
                QueryValue::Null
            };

            result.insert(column.name().to_string(), value);
        }

        result
    }

    fn bind_params<'q>(query: SqliteQuery<'q>, params: &'q [QueryValue]) -> SqliteQuery<'q> {
        params.iter().fold(query, |query, param| match param {
            QueryValue::Null => query.bind(None::<i64>),
            QueryValue::Integer(i) => query.bind(*i),
            QueryValue::Real(r) => query.bind(*r),
            QueryValue::Text(s) => query.bind(s.as_str()),
            QueryValue::Blob(b) => query.bind(b.as_slice()),
        })
    }

    fn unknown_transaction(transaction_id: TransactionId) -> BridgeError {
        BridgeError::DatabaseError(format!(
            "Unknown or finished transaction {}",
            transaction_id.0
        ))
    }
}

#[async_trait]
impl DatabaseAdapter for SqliteAdapter {
    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                warn!(error = %e, "Database health check failed");
                BridgeError::DatabaseError(format!("Health check failed: {}", e))
            })?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let open = {
            let mut transactions = self.transactions.lock().await;
            let open = transactions.len();
            transactions.clear();
            open
        };
        if open > 0 {
            warn!(open, "Closing adapter with open transactions; rolling them back");
        }

        info!("Closing database connection pool");
        self.pool.close().await;
        Ok(())
    }

    async fn query(&self, query: &str, params: &[QueryValue]) -> Result<Vec<QueryRow>> {
        debug!(query = %query, param_count = params.len(), "Executing query");

        let rows = Self::bind_params(sqlx::query(query), params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Query failed: {}", e)))?;

        Ok(rows.iter().map(Self::row_to_query_row).collect())
    }

    async fn execute(&self, statement: &str, params: &[QueryValue]) -> Result<u64> {
        debug!(statement = %statement, param_count = params.len(), "Executing statement");

        let result = Self::bind_params(sqlx::query(statement), params)
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Execute failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn query_one_optional(
        &self,
        query: &str,
        params: &[QueryValue],
    ) -> Result<Option<QueryRow>> {
        let row = Self::bind_params(sqlx::query(query), params)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Query one optional failed: {}", e)))?;

        Ok(row.as_ref().map(Self::row_to_query_row))
    }

    async fn begin_transaction(&self) -> Result<TransactionId> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Begin transaction failed: {}", e)))?;

        let transaction_id = TransactionId(self.transaction_counter.fetch_add(1, Ordering::SeqCst));
        self.transactions.lock().await.insert(transaction_id, tx);

        debug!(transaction_id = transaction_id.0, "Began transaction");
        Ok(transaction_id)
    }

    async fn commit_transaction(&self, transaction_id: TransactionId) -> Result<()> {
        let tx = self
            .transactions
            .lock()
            .await
            .remove(&transaction_id)
            .ok_or_else(|| Self::unknown_transaction(transaction_id))?;

        tx.commit()
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Commit transaction failed: {}", e)))?;

        debug!(transaction_id = transaction_id.0, "Committed transaction");
        Ok(())
    }

    async fn rollback_transaction(&self, transaction_id: TransactionId) -> Result<()> {
        let tx = self
            .transactions
            .lock()
            .await
            .remove(&transaction_id)
            .ok_or_else(|| Self::unknown_transaction(transaction_id))?;

        tx.rollback()
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Rollback transaction failed: {}", e)))?;

        debug!(transaction_id = transaction_id.0, "Rolled back transaction");
        Ok(())
    }

    async fn query_in_transaction(
        &self,
        transaction_id: TransactionId,
        query: &str,
        params: &[QueryValue],
    ) -> Result<Vec<QueryRow>> {
        let mut transactions = self.transactions.lock().await;
        let tx = transactions
            .get_mut(&transaction_id)
            .ok_or_else(|| Self::unknown_transaction(transaction_id))?;

        let rows = Self::bind_params(sqlx::query(query), params)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Query failed: {}", e)))?;

        Ok(rows.iter().map(Self::row_to_query_row).collect())
    }

    async fn execute_in_transaction(
        &self,
        transaction_id: TransactionId,
        statement: &str,
        params: &[QueryValue],
    ) -> Result<u64> {
        let mut transactions = self.transactions.lock().await;
        let tx = transactions
            .get_mut(&transaction_id)
            .ok_or_else(|| Self::unknown_transaction(transaction_id))?;

        let result = Self::bind_params(sqlx::query(statement), params)
            .execute(&mut **tx)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Execute failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn execute_batch(&self, statements: &[(&str, &[QueryValue])]) -> Result<Vec<u64>> {
        debug!(statement_count = statements.len(), "Executing batch");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Begin batch failed: {}", e)))?;

        let mut results = Vec::with_capacity(statements.len());
        for (statement, params) in statements {
            // Dropping `tx` on error rolls the batch back.
            let result = Self::bind_params(sqlx::query(statement), params)
                .execute(&mut *tx)
                .await
                .map_err(|e| BridgeError::DatabaseError(format!("Batch statement failed: {}", e)))?;
            results.push(result.rows_affected());
        }

        tx.commit()
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Commit batch failed: {}", e)))?;

        Ok(results)
    }
}
