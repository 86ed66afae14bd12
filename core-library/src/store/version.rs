//! Migration bookkeeping
//!
//! The store version is never stored directly. It is the highest version
//! recorded in `_catalog_migrations`, or [`StoreVersion::EMPTY`] when the
//! table is missing or empty.

use crate::error::{LibraryError, Result};
use crate::models::StoreVersion;
use bridge_traits::database::{DatabaseAdapter, QueryRow, QueryValue, TransactionId};

pub const MIGRATIONS_TABLE: &str = "_catalog_migrations";

const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _catalog_migrations (
        version INTEGER PRIMARY KEY,
        step_id TEXT NOT NULL,
        applied_at INTEGER NOT NULL
    )
"#;

/// Run a query either on the pool or inside an open transaction.
pub(crate) async fn query(
    adapter: &dyn DatabaseAdapter,
    transaction: Option<TransactionId>,
    sql: &str,
    params: &[QueryValue],
) -> Result<Vec<QueryRow>> {
    let rows = match transaction {
        Some(tx) => adapter.query_in_transaction(tx, sql, params).await?,
        None => adapter.query(sql, params).await?,
    };
    Ok(rows)
}

pub(crate) async fn table_exists(
    adapter: &dyn DatabaseAdapter,
    transaction: Option<TransactionId>,
    table: &str,
) -> Result<bool> {
    let rows = query(
        adapter,
        transaction,
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
        &[QueryValue::from(table)],
    )
    .await?;
    Ok(!rows.is_empty())
}

/// Current version of the store.
pub(crate) async fn read_version(
    adapter: &dyn DatabaseAdapter,
    transaction: Option<TransactionId>,
) -> Result<StoreVersion> {
    if !table_exists(adapter, transaction, MIGRATIONS_TABLE).await? {
        return Ok(StoreVersion::EMPTY);
    }

    let rows = query(
        adapter,
        transaction,
        "SELECT COALESCE(MAX(version), 0) AS version FROM _catalog_migrations",
        &[],
    )
    .await?;

    let raw = rows
        .first()
        .and_then(|row| row.get("version"))
        .and_then(QueryValue::as_i64)
        .ok_or_else(|| LibraryError::CorruptRow {
            table: MIGRATIONS_TABLE.to_string(),
            message: "missing version column".to_string(),
        })?;

    u32::try_from(raw)
        .map(StoreVersion::new)
        .map_err(|_| LibraryError::CorruptRow {
            table: MIGRATIONS_TABLE.to_string(),
            message: format!("version {} out of range", raw),
        })
}

/// Create the bookkeeping table inside `transaction` if it is missing.
pub(crate) async fn ensure_migrations_table(
    adapter: &dyn DatabaseAdapter,
    transaction: TransactionId,
) -> Result<()> {
    adapter
        .execute_in_transaction(transaction, CREATE_MIGRATIONS_TABLE, &[])
        .await?;
    Ok(())
}

pub(crate) async fn record_step(
    adapter: &dyn DatabaseAdapter,
    transaction: TransactionId,
    version: StoreVersion,
    step_id: &str,
    applied_at: i64,
) -> Result<()> {
    adapter
        .execute_in_transaction(
            transaction,
            "INSERT INTO _catalog_migrations (version, step_id, applied_at) VALUES (?, ?, ?)",
            &[
                QueryValue::Integer(i64::from(version.value())),
                QueryValue::from(step_id),
                QueryValue::Integer(applied_at),
            ],
        )
        .await?;
    Ok(())
}
