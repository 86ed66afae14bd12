use crate::error::{LibraryError, OpenError};
use crate::models::StoreVersion;
use thiserror::Error;

/// The step chain cannot take the store where it needs to go.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("No migration step starts at {version}")]
    NoPathFromVersion { version: StoreVersion },

    #[error("Store is at {current}, newer than the latest supported {latest}")]
    NewerThanSupported {
        current: StoreVersion,
        latest: StoreVersion,
    },

    #[error("Broken migration chain at step '{step_id}': {reason}")]
    BrokenChain { step_id: String, reason: String },
}

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Migration planning failed: {0}")]
    Planning(#[from] PlanningError),

    /// The step was rolled back; the store is still at its previous version.
    #[error("Migration step '{step_id}' failed: {cause}")]
    StepFailed { step_id: String, cause: String },

    #[error("Store could not be opened: {0}")]
    Open(#[from] OpenError),

    #[error("A store load is already running")]
    AlreadyRunning,

    #[error("Store error: {0}")]
    Store(#[from] LibraryError),
}

pub type MigrationResult<T> = std::result::Result<T, MigrationError>;
