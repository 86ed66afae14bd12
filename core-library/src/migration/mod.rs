//! # Store Migration
//!
//! Sequential, transactional schema migration for the catalog store.
//!
//! - [`MigrationStep`]: one `v -> v+1` transformation
//! - [`MigrationPlanner`]: validated step chain, picks the next step
//! - [`MigrationExecutor`]: applies one step in one transaction
//! - [`MigrationOrchestrator`]: loops the executor until the store is current,
//!   then opens it
//!
//! ```rust,ignore
//! let store = Arc::new(SqliteCatalogStore::open(DatabaseConfig::new(path)).await?);
//! let orchestrator = MigrationOrchestrator::new(store, catalog_chain()?);
//! let ready = orchestrator.load_store().await?;
//! ```

mod error;
mod executor;
mod orchestrator;
mod planner;
mod step;
pub mod steps;

pub use error::{MigrationError, MigrationResult, PlanningError};
pub use executor::MigrationExecutor;
pub use orchestrator::{MigrationOrchestrator, OrchestratorState, ReadyStore};
pub use planner::MigrationPlanner;
pub use step::{MigrationStep, SqlMigrationStep, StepContext};
pub use steps::catalog_chain;
