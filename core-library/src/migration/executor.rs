//! Migration executor
//!
//! Applies exactly one step per call inside one transaction. The step's
//! changes and its bookkeeping row commit together or not at all, so the
//! store version only moves when the step fully succeeded.

use super::error::{MigrationError, MigrationResult};
use super::step::{MigrationStep, StepContext};
use crate::error::LibraryError;
use crate::models::StoreVersion;
use crate::store::version;
use bridge_traits::database::{DatabaseAdapter, TransactionId};
use bridge_traits::time::{Clock, SystemClock};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct MigrationExecutor {
    adapter: Arc<dyn DatabaseAdapter>,
    clock: Arc<dyn Clock>,
}

impl MigrationExecutor {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>) -> Self {
        Self {
            adapter,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for the `applied_at` bookkeeping column.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Apply `step` and return the version the store is now at.
    ///
    /// Never retries. On failure the transaction is rolled back and the
    /// store version is unchanged.
    #[instrument(skip_all, fields(step_id = %step.id(), target = %step.target_version()))]
    pub async fn apply(&self, step: &dyn MigrationStep) -> MigrationResult<StoreVersion> {
        let step_failed = |cause: String| MigrationError::StepFailed {
            step_id: step.id().to_string(),
            cause,
        };

        let tx = self
            .adapter
            .begin_transaction()
            .await
            .map_err(|e| step_failed(e.to_string()))?;

        match self.apply_in_transaction(tx, step).await {
            Ok(version) => {
                self.adapter
                    .commit_transaction(tx)
                    .await
                    .map_err(|e| step_failed(e.to_string()))?;
                info!(version = %version, "Migration step committed");
                Ok(version)
            }
            Err(err) => {
                if let Err(rollback_err) = self.adapter.rollback_transaction(tx).await {
                    warn!(error = %rollback_err, "Rollback of failed migration step failed");
                }
                warn!(error = %err, "Migration step rolled back");
                Err(step_failed(err.to_string()))
            }
        }
    }

    async fn apply_in_transaction(
        &self,
        tx: TransactionId,
        step: &dyn MigrationStep,
    ) -> crate::Result<StoreVersion> {
        let adapter = self.adapter.as_ref();

        version::ensure_migrations_table(adapter, tx).await?;
        let current = version::read_version(adapter, Some(tx)).await?;
        if current != step.source_version() {
            return Err(LibraryError::InvalidInput {
                field: "store_version".to_string(),
                message: format!(
                    "store is at {}, step expects {}",
                    current,
                    step.source_version()
                ),
            });
        }

        debug!(from = %current, "Running migration step");
        step.apply(&StepContext::new(adapter, tx)).await?;

        let target = step.target_version();
        version::record_step(adapter, tx, target, step.id(), self.clock.unix_timestamp_millis())
            .await?;
        Ok(target)
    }
}
