use bridge_traits::error::{BridgeError, FetchError};
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Remote fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Sync coordinator is inactive")]
    Inactive,

    #[error("Invalid remote snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Reconciliation failed: {0}")]
    ReconcileFailed(String),

    #[error("Sync state error: {0}")]
    State(String),
}

impl SyncError {
    /// Whether retrying the same sync later can succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SyncError::Fetch(err) => err.is_transient(),
            SyncError::Cancelled | SyncError::ReconcileFailed(_) | SyncError::State(_) => true,
            SyncError::Inactive | SyncError::InvalidSnapshot(_) => false,
        }
    }
}

impl From<LibraryError> for SyncError {
    fn from(err: LibraryError) -> Self {
        SyncError::ReconcileFailed(err.to_string())
    }
}

impl From<BridgeError> for SyncError {
    fn from(err: BridgeError) -> Self {
        SyncError::State(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
