//! # Catalog Sync
//!
//! Keeps the local catalog consistent with an optional remote copy.
//!
//! ## Components
//!
//! - **Sync Snapshot** (`snapshot`): validated, immutable remote state
//! - **Catalog Reconciler** (`reconciler`): merges a snapshot into the store
//!   in one transaction and decides the last-played signal
//! - **Sync State** (`state`): the persisted "first full sync completed" flag
//! - **Sync Coordinator** (`coordinator`): fetch, reconcile and report,
//!   serialized and cancellable

pub mod coordinator;
pub mod error;
pub mod reconciler;
pub mod snapshot;
pub mod state;

pub use coordinator::{SyncCoordinator, SyncOutcome, SyncReport, SyncStrategy};
pub use error::{Result, SyncError};
pub use reconciler::{reconcile, plan_merge, ReconcileResult, ReconcileScope, SyncSignal};
pub use snapshot::SyncSnapshot;
pub use state::LibrarySyncState;
