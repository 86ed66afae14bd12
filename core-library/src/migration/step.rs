//! Migration step contract

use crate::error::Result;
use crate::models::StoreVersion;
use async_trait::async_trait;
use bridge_traits::database::{DatabaseAdapter, QueryRow, QueryValue, TransactionId};
use std::fmt;

/// Handle a step uses to touch the store.
///
/// Every statement runs inside the transaction the executor opened for the
/// step, so a failing step leaves nothing behind.
pub struct StepContext<'a> {
    adapter: &'a dyn DatabaseAdapter,
    transaction: TransactionId,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(adapter: &'a dyn DatabaseAdapter, transaction: TransactionId) -> Self {
        Self {
            adapter,
            transaction,
        }
    }

    pub async fn execute(&self, statement: &str, params: &[QueryValue]) -> Result<u64> {
        Ok(self
            .adapter
            .execute_in_transaction(self.transaction, statement, params)
            .await?)
    }

    pub async fn query(&self, query: &str, params: &[QueryValue]) -> Result<Vec<QueryRow>> {
        Ok(self
            .adapter
            .query_in_transaction(self.transaction, query, params)
            .await?)
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction
    }
}

/// One transformation of the store from `source_version` to `target_version`.
#[async_trait]
pub trait MigrationStep: Send + Sync {
    /// Stable identifier recorded in the bookkeeping table.
    fn id(&self) -> &str;

    fn source_version(&self) -> StoreVersion;

    /// One past `source_version`, saturating at `u32::MAX`.
    fn target_version(&self) -> StoreVersion {
        self.source_version()
            .next()
            .unwrap_or(StoreVersion(u32::MAX))
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<()>;
}

impl fmt::Debug for dyn MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("id", &self.id())
            .field("source_version", &self.source_version())
            .field("target_version", &self.target_version())
            .finish()
    }
}

/// Step made of plain SQL statements, run in order.
#[derive(Debug, Clone)]
pub struct SqlMigrationStep {
    id: String,
    source: StoreVersion,
    statements: Vec<String>,
}

impl SqlMigrationStep {
    pub fn new(id: impl Into<String>, source: StoreVersion, statements: &[&str]) -> Self {
        Self {
            id: id.into(),
            source,
            statements: statements.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl MigrationStep for SqlMigrationStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn source_version(&self) -> StoreVersion {
        self.source
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<()> {
        for statement in &self.statements {
            ctx.execute(statement, &[]).await?;
        }
        Ok(())
    }
}
