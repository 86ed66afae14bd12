//! SQLite implementation of [`StoreAccessor`]

use super::version;
use super::{StoreAccessor, REQUIRED_TABLES};
use crate::adapters::SqliteAdapter;
use crate::error::{LibraryError, OpenError, Result};
use crate::models::{
    path_depth, CatalogDiff, CatalogItem, CatalogScope, ItemKind, LastPlayedPointer,
    PointerChange, StoreVersion,
};
use async_trait::async_trait;
use bridge_traits::database::{DatabaseAdapter, DatabaseConfig, QueryRow, QueryValue, TransactionId};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const ITEM_COLUMNS: &str = "relative_path, kind, title, details, duration, playback_position, \
     percent_completed, is_finished, order_rank, progress_updated_at, pending_upload";

const INSERT_ITEM: &str = r#"
    INSERT INTO catalog_items (
        relative_path, parent_path, kind, title, details, duration, playback_position,
        percent_completed, is_finished, order_rank, progress_updated_at, pending_upload
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const CLEAR_DANGLING_POINTER: &str = r#"
    UPDATE library_state
    SET last_played_path = NULL
    WHERE id = 1
      AND last_played_path IS NOT NULL
      AND last_played_path NOT IN (SELECT relative_path FROM catalog_items)
"#;

/// Catalog store over any [`DatabaseAdapter`] carrying the latest schema.
pub struct SqliteCatalogStore {
    adapter: Arc<dyn DatabaseAdapter>,
}

impl SqliteCatalogStore {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>) -> Self {
        Self { adapter }
    }

    /// Open (or create) the database described by `config`.
    ///
    /// A newly created database is an empty store at version 0.
    pub async fn open(config: DatabaseConfig) -> std::result::Result<Self, OpenError> {
        let adapter = SqliteAdapter::new(config)
            .await
            .map_err(|e| OpenError::Unavailable(e.to_string()))?;
        Ok(Self::new(Arc::new(adapter)))
    }

    /// Convenience constructor using an existing `sqlx` pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self::new(Arc::new(SqliteAdapter::from_pool(pool)))
    }

    /// The adapter shared with the migration executor.
    pub fn adapter(&self) -> Arc<dyn DatabaseAdapter> {
        Arc::clone(&self.adapter)
    }

    /// Close every pooled connection.
    pub async fn close(&self) -> Result<()> {
        self.adapter.close().await?;
        Ok(())
    }

    fn validate_item(item: &CatalogItem) -> Result<()> {
        item.validate().map_err(|msg| LibraryError::InvalidInput {
            field: "CatalogItem".to_string(),
            message: msg,
        })
    }

    fn item_params(item: &CatalogItem) -> Vec<QueryValue> {
        vec![
            QueryValue::from(item.relative_path.as_str()),
            QueryValue::from(item.parent_path()),
            QueryValue::from(item.kind.as_str()),
            QueryValue::from(item.title.as_str()),
            QueryValue::from(item.details.as_str()),
            QueryValue::Real(item.duration),
            QueryValue::Real(item.current_time),
            QueryValue::Real(item.percent_completed),
            QueryValue::from(item.is_finished),
            QueryValue::Integer(item.order_rank),
            QueryValue::from(item.progress_updated_at),
            QueryValue::from(item.pending_upload),
        ]
    }

    fn update_params(item: &CatalogItem) -> Vec<QueryValue> {
        vec![
            QueryValue::from(item.kind.as_str()),
            QueryValue::from(item.title.as_str()),
            QueryValue::from(item.details.as_str()),
            QueryValue::Real(item.duration),
            QueryValue::Real(item.current_time),
            QueryValue::Real(item.percent_completed),
            QueryValue::from(item.is_finished),
            QueryValue::Integer(item.order_rank),
            QueryValue::from(item.progress_updated_at),
            QueryValue::from(item.pending_upload),
            QueryValue::from(item.relative_path.as_str()),
        ]
    }

    async fn fetch_items(&self, sql: &str, params: Vec<QueryValue>) -> Result<Vec<CatalogItem>> {
        let rows = self.adapter.query(sql, &params).await?;
        rows.iter().map(row_to_item).collect()
    }

    async fn item_exists(&self, tx: TransactionId, relative_path: &str) -> Result<bool> {
        let rows = self
            .adapter
            .query_in_transaction(
                tx,
                "SELECT 1 AS present FROM catalog_items WHERE relative_path = ?",
                &[QueryValue::from(relative_path)],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn apply_diff(&self, tx: TransactionId, diff: &CatalogDiff) -> Result<()> {
        let mut inserts: Vec<&CatalogItem> = diff.inserts.iter().collect();
        inserts.sort_by_key(|item| item.depth());
        for item in inserts {
            self.adapter
                .execute_in_transaction(tx, INSERT_ITEM, &Self::item_params(item))
                .await?;
        }

        for item in &diff.updates {
            let affected = self
                .adapter
                .execute_in_transaction(
                    tx,
                    r#"
                    UPDATE catalog_items
                    SET kind = ?, title = ?, details = ?, duration = ?, playback_position = ?,
                        percent_completed = ?, is_finished = ?, order_rank = ?,
                        progress_updated_at = ?, pending_upload = ?
                    WHERE relative_path = ?
                    "#,
                    &Self::update_params(item),
                )
                .await?;
            if affected == 0 {
                return Err(not_found(&item.relative_path));
            }
        }

        let mut deletions: Vec<&String> = diff.deletions.iter().collect();
        deletions.sort_by_key(|path| std::cmp::Reverse(path_depth(path)));
        for path in deletions {
            self.adapter
                .execute_in_transaction(
                    tx,
                    "DELETE FROM catalog_items WHERE relative_path = ?",
                    &[QueryValue::from(path.as_str())],
                )
                .await?;
        }

        for path in &diff.pending_upload {
            self.adapter
                .execute_in_transaction(
                    tx,
                    "UPDATE catalog_items SET pending_upload = 1 WHERE relative_path = ?",
                    &[QueryValue::from(path.as_str())],
                )
                .await?;
        }

        match &diff.last_played {
            PointerChange::Keep => {}
            PointerChange::Set(path) => {
                if !self.item_exists(tx, path).await? {
                    return Err(not_found(path));
                }
                self.set_pointer(tx, QueryValue::from(path.as_str())).await?;
            }
            PointerChange::Clear => self.set_pointer(tx, QueryValue::Null).await?,
        }

        let cleared = self
            .adapter
            .execute_in_transaction(tx, CLEAR_DANGLING_POINTER, &[])
            .await?;
        if cleared > 0 {
            debug!("Cleared last played pointer to a deleted item");
        }

        Ok(())
    }

    async fn set_pointer(&self, tx: TransactionId, value: QueryValue) -> Result<()> {
        self.adapter
            .execute_in_transaction(
                tx,
                "UPDATE library_state SET last_played_path = ? WHERE id = 1",
                &[value],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StoreAccessor for SqliteCatalogStore {
    async fn open_store(&self) -> std::result::Result<(), OpenError> {
        self.adapter
            .health_check()
            .await
            .map_err(|e| OpenError::Unavailable(e.to_string()))?;

        for table in REQUIRED_TABLES {
            let present = version::table_exists(self.adapter.as_ref(), None, table)
                .await
                .map_err(|e| OpenError::Unavailable(e.to_string()))?;
            if !present {
                return Err(OpenError::SchemaMissing((*table).to_string()));
            }
        }

        Ok(())
    }

    async fn get_version(&self) -> Result<StoreVersion> {
        version::read_version(self.adapter.as_ref(), None).await
    }

    async fn read_items(&self, scope: &CatalogScope) -> Result<Vec<CatalogItem>> {
        match scope {
            CatalogScope::Library => {
                self.fetch_items(
                    &format!("SELECT {} FROM catalog_items ORDER BY relative_path", ITEM_COLUMNS),
                    vec![],
                )
                .await
            }
            CatalogScope::Children(None) => {
                self.fetch_items(
                    &format!(
                        "SELECT {} FROM catalog_items WHERE parent_path IS NULL \
                         ORDER BY order_rank, relative_path",
                        ITEM_COLUMNS
                    ),
                    vec![],
                )
                .await
            }
            CatalogScope::Children(Some(folder)) => {
                self.fetch_items(
                    &format!(
                        "SELECT {} FROM catalog_items WHERE parent_path = ? \
                         ORDER BY order_rank, relative_path",
                        ITEM_COLUMNS
                    ),
                    vec![QueryValue::from(folder.as_str())],
                )
                .await
            }
            CatalogScope::Subtree(folder) => {
                // substr instead of LIKE: LIKE is case-insensitive and treats '_' as a wildcard.
                let prefix = format!("{}/", folder);
                let prefix_len = prefix.chars().count() as i64;
                self.fetch_items(
                    &format!(
                        "SELECT {} FROM catalog_items WHERE substr(relative_path, 1, ?) = ? \
                         ORDER BY relative_path",
                        ITEM_COLUMNS
                    ),
                    vec![QueryValue::Integer(prefix_len), QueryValue::from(prefix)],
                )
                .await
            }
        }
    }

    async fn find_item(&self, relative_path: &str) -> Result<Option<CatalogItem>> {
        let row = self
            .adapter
            .query_one_optional(
                &format!("SELECT {} FROM catalog_items WHERE relative_path = ?", ITEM_COLUMNS),
                &[QueryValue::from(relative_path)],
            )
            .await?;
        row.as_ref().map(row_to_item).transpose()
    }

    #[instrument(skip_all, fields(
        inserts = diff.inserts.len(),
        updates = diff.updates.len(),
        deletions = diff.deletions.len()
    ))]
    async fn write_items(&self, diff: &CatalogDiff) -> Result<()> {
        for item in diff.inserts.iter().chain(&diff.updates) {
            Self::validate_item(item)?;
        }

        let tx = self.adapter.begin_transaction().await?;
        match self.apply_diff(tx, diff).await {
            Ok(()) => {
                self.adapter.commit_transaction(tx).await?;
                debug!("Catalog write committed");
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = self.adapter.rollback_transaction(tx).await {
                    warn!(error = %rollback_err, "Rollback after failed catalog write failed");
                }
                Err(err)
            }
        }
    }

    async fn read_last_played(&self) -> Result<Option<LastPlayedPointer>> {
        let row = self
            .adapter
            .query_one_optional("SELECT last_played_path FROM library_state WHERE id = 1", &[])
            .await?;
        Ok(row
            .as_ref()
            .and_then(|row| row.get("last_played_path"))
            .and_then(QueryValue::as_string)
            .map(LastPlayedPointer::new))
    }

    async fn write_last_played(&self, relative_path: Option<&str>) -> Result<()> {
        let diff = CatalogDiff {
            last_played: match relative_path {
                Some(path) => PointerChange::Set(path.to_string()),
                None => PointerChange::Clear,
            },
            ..Default::default()
        };
        self.write_items(&diff).await
    }

    async fn count_items(&self) -> Result<i64> {
        let row = self
            .adapter
            .query_one_optional("SELECT COUNT(*) AS count FROM catalog_items", &[])
            .await?;
        row.as_ref()
            .and_then(|row| row.get("count"))
            .and_then(QueryValue::as_i64)
            .ok_or_else(|| corrupt("missing column 'count'"))
    }
}

fn not_found(relative_path: &str) -> LibraryError {
    LibraryError::NotFound {
        entity_type: "CatalogItem".to_string(),
        id: relative_path.to_string(),
    }
}

fn corrupt(message: impl Into<String>) -> LibraryError {
    LibraryError::CorruptRow {
        table: "catalog_items".to_string(),
        message: message.into(),
    }
}

fn row_to_item(row: &QueryRow) -> Result<CatalogItem> {
    let kind = get_string(row, "kind")?
        .parse::<ItemKind>()
        .map_err(corrupt)?;

    Ok(CatalogItem {
        relative_path: get_string(row, "relative_path")?,
        kind,
        title: get_string(row, "title")?,
        details: get_optional_string(row, "details").unwrap_or_default(),
        duration: get_f64(row, "duration")?,
        current_time: get_f64(row, "playback_position")?,
        percent_completed: get_f64(row, "percent_completed")?,
        is_finished: get_i64(row, "is_finished")? != 0,
        order_rank: get_i64(row, "order_rank")?,
        progress_updated_at: row.get("progress_updated_at").and_then(QueryValue::as_i64),
        pending_upload: get_i64(row, "pending_upload")? != 0,
    })
}

fn get_string(row: &QueryRow, key: &str) -> Result<String> {
    get_optional_string(row, key).ok_or_else(|| corrupt(format!("missing text column '{}'", key)))
}

fn get_optional_string(row: &QueryRow, key: &str) -> Option<String> {
    row.get(key).and_then(QueryValue::as_string)
}

fn get_f64(row: &QueryRow, key: &str) -> Result<f64> {
    row.get(key)
        .and_then(QueryValue::as_f64)
        .ok_or_else(|| corrupt(format!("missing numeric column '{}'", key)))
}

fn get_i64(row: &QueryRow, key: &str) -> Result<i64> {
    row.get(key)
        .and_then(QueryValue::as_i64)
        .ok_or_else(|| corrupt(format!("missing integer column '{}'", key)))
}
