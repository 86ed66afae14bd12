//! Built-in catalog schema chain

use super::error::PlanningError;
use super::planner::MigrationPlanner;
use super::step::{MigrationStep, SqlMigrationStep, StepContext};
use crate::error::{LibraryError, Result};
use crate::models::{parent_path, StoreVersion};
use async_trait::async_trait;
use bridge_traits::database::QueryValue;
use std::sync::Arc;
use tracing::debug;

const CREATE_CATALOG: &[&str] = &[r#"
    CREATE TABLE catalog_items (
        relative_path TEXT PRIMARY KEY NOT NULL,
        kind TEXT NOT NULL CHECK (kind IN ('folder', 'book')),
        title TEXT NOT NULL,
        duration REAL NOT NULL DEFAULT 0,
        playback_position REAL NOT NULL DEFAULT 0
    )
"#];

const CREATE_LIBRARY_STATE: &[&str] = &[
    r#"
    CREATE TABLE library_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        last_played_path TEXT
    )
    "#,
    "INSERT INTO library_state (id, last_played_path) VALUES (1, NULL)",
];

const ADD_PROGRESS_TRACKING: &[&str] = &[
    "ALTER TABLE catalog_items ADD COLUMN details TEXT NOT NULL DEFAULT ''",
    "ALTER TABLE catalog_items ADD COLUMN percent_completed REAL NOT NULL DEFAULT 0",
    "ALTER TABLE catalog_items ADD COLUMN is_finished INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE catalog_items ADD COLUMN order_rank INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE catalog_items ADD COLUMN progress_updated_at INTEGER",
    "ALTER TABLE catalog_items ADD COLUMN pending_upload INTEGER NOT NULL DEFAULT 0",
];

/// Adds `parent_path` and fills it for every existing row.
///
/// The value is derived from `relative_path` in Rust rather than SQL, since
/// SQLite has no reverse search to find the last separator.
pub struct ParentPathStep;

#[async_trait]
impl MigrationStep for ParentPathStep {
    fn id(&self) -> &str {
        "0004_parent_paths"
    }

    fn source_version(&self) -> StoreVersion {
        StoreVersion(3)
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<()> {
        ctx.execute("ALTER TABLE catalog_items ADD COLUMN parent_path TEXT", &[])
            .await?;

        let rows = ctx
            .query("SELECT relative_path FROM catalog_items", &[])
            .await?;

        let mut backfilled = 0usize;
        for row in &rows {
            let path = row
                .get("relative_path")
                .and_then(QueryValue::as_str)
                .ok_or_else(|| LibraryError::CorruptRow {
                    table: "catalog_items".to_string(),
                    message: "relative_path is not text".to_string(),
                })?;

            if let Some(parent) = parent_path(path) {
                ctx.execute(
                    "UPDATE catalog_items SET parent_path = ? WHERE relative_path = ?",
                    &[QueryValue::from(parent), QueryValue::from(path)],
                )
                .await?;
                backfilled += 1;
            }
        }

        ctx.execute(
            "CREATE INDEX idx_catalog_items_parent ON catalog_items(parent_path)",
            &[],
        )
        .await?;

        debug!(rows = rows.len(), backfilled, "Back-filled parent paths");
        Ok(())
    }
}

/// Every built-in step, in order.
pub fn catalog_steps() -> Vec<Arc<dyn MigrationStep>> {
    vec![
        Arc::new(SqlMigrationStep::new(
            "0001_create_catalog",
            StoreVersion(0),
            CREATE_CATALOG,
        )),
        Arc::new(SqlMigrationStep::new(
            "0002_library_state",
            StoreVersion(1),
            CREATE_LIBRARY_STATE,
        )),
        Arc::new(SqlMigrationStep::new(
            "0003_progress_tracking",
            StoreVersion(2),
            ADD_PROGRESS_TRACKING,
        )),
        Arc::new(ParentPathStep),
    ]
}

/// Planner over the built-in chain.
pub fn catalog_chain() -> std::result::Result<MigrationPlanner, PlanningError> {
    MigrationPlanner::new(catalog_steps())
}
