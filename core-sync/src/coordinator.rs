//! # Sync Coordinator
//!
//! Runs one remote sync at a time against the local store.
//!
//! ## Flow
//!
//! 1. The first sync (full-sync flag unset) fetches the whole library and
//!    reconciles [`ReconcileScope::AllLibrary`]; the flag is set only if the
//!    merge committed.
//! 2. Later syncs fetch the direct children of one folder and reconcile
//!    [`ReconcileScope::Folder`].
//!
//! Fetches are bounded by [`SyncConfig::fetch_timeout_secs`] and can be
//! cancelled with [`SyncCoordinator::cancel_all_jobs`]. A failed, timed-out
//! or cancelled fetch leaves the store and the flag untouched.
//!
//! ## Example
//!
//! ```rust,ignore
//! let coordinator = SyncCoordinator::new(store, remote, sync_state, event_bus, SyncConfig::default());
//! match coordinator.sync_outcome(Some("Fantasy")).await {
//!     SyncOutcome::ReloadLastBook(path) => player.reload(&path),
//!     SyncOutcome::DifferentLastBook(path) => ui.offer_switch(&path),
//!     SyncOutcome::None => {}
//!     SyncOutcome::Failure(err) => warn!(error = %err, "sync failed"),
//! }
//! ```

use crate::error::{Result, SyncError};
use crate::reconciler::{reconcile, ReconcileResult, ReconcileScope, SyncSignal};
use crate::snapshot::SyncSnapshot;
use crate::state::LibrarySyncState;
use bridge_traits::error::FetchError;
use bridge_traits::remote::{RemoteCatalog, RemoteSnapshot};
use bridge_traits::time::{Clock, SystemClock};
use core_library::store::StoreAccessor;
use core_runtime::config::SyncConfig;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent, SyncEvent};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// How a sync fetched its snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStrategy {
    /// Whole library, reconciled everywhere
    Full,
    /// One folder's direct children
    Incremental,
}

/// Summary of a successful sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub sync_id: String,
    pub strategy: SyncStrategy,
    pub scope: Option<String>,
    pub result: ReconcileResult,
    pub duration_ms: u64,
}

/// Result of a sync collapsed for the player.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    None,
    ReloadLastBook(String),
    DifferentLastBook(String),
    Failure(SyncError),
}

impl From<Result<SyncReport>> for SyncOutcome {
    fn from(result: Result<SyncReport>) -> Self {
        match result {
            Ok(report) => match report.result.signal {
                SyncSignal::None => SyncOutcome::None,
                SyncSignal::ReloadLastBook(path) => SyncOutcome::ReloadLastBook(path),
                SyncSignal::DifferentLastBook(path) => SyncOutcome::DifferentLastBook(path),
            },
            Err(err) => SyncOutcome::Failure(err),
        }
    }
}

pub struct SyncCoordinator {
    store: Arc<dyn StoreAccessor>,
    remote: Arc<dyn RemoteCatalog>,
    sync_state: LibrarySyncState,
    event_bus: Arc<EventBus>,
    config: SyncConfig,
    clock: Arc<dyn Clock>,

    /// Held for the whole of a sync; queued callers wait here in order
    sync_lock: Mutex<()>,

    /// Cancels every sync started before the next `cancel_all_jobs`
    cancellation: Mutex<CancellationToken>,

    active: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn StoreAccessor>,
        remote: Arc<dyn RemoteCatalog>,
        sync_state: LibrarySyncState,
        event_bus: Arc<EventBus>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            remote,
            sync_state,
            event_bus,
            config,
            clock: Arc::new(SystemClock),
            sync_lock: Mutex::new(()),
            cancellation: Mutex::new(CancellationToken::new()),
            active: AtomicBool::new(true),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sync_state(&self) -> &LibrarySyncState {
        &self.sync_state
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// An inactive coordinator refuses new syncs with [`SyncError::Inactive`].
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
        debug!(active, "Sync coordinator activity changed");
    }

    /// Cancel in-flight and queued syncs.
    ///
    /// Syncs started after this call run normally.
    pub async fn cancel_all_jobs(&self) {
        let mut token = self.cancellation.lock().await;
        token.cancel();
        *token = CancellationToken::new();
        info!("Cancelled all sync jobs");
    }

    /// Sync and collapse the result into a [`SyncOutcome`].
    pub async fn sync_outcome(&self, scope: Option<&str>) -> SyncOutcome {
        self.sync(scope).await.into()
    }

    /// Fetch a snapshot and merge it into the store.
    ///
    /// `scope` is the folder to refresh on incremental syncs (`None` is the
    /// top level). It is ignored by the first, full sync.
    ///
    /// # Errors
    /// - `SyncError::Inactive` if the coordinator is inactive
    /// - `SyncError::Cancelled` if `cancel_all_jobs` ran before the merge
    /// - `SyncError::Fetch` if the remote failed or timed out
    /// - `SyncError::InvalidSnapshot` if the snapshot is malformed
    /// - `SyncError::ReconcileFailed` / `SyncError::State` if the local
    ///   write or the flag update failed
    #[instrument(skip(self))]
    pub async fn sync(&self, scope: Option<&str>) -> Result<SyncReport> {
        if !self.is_active() {
            return Err(SyncError::Inactive);
        }

        let token = self.cancellation.lock().await.clone();
        let _queue_guard = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(SyncError::Cancelled),
            guard = self.sync_lock.lock() => guard,
        };

        let sync_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let is_full_sync = !self.sync_state.has_completed_full_sync().await?;
        let (strategy, reconcile_scope) = if is_full_sync {
            (SyncStrategy::Full, ReconcileScope::AllLibrary)
        } else {
            (
                SyncStrategy::Incremental,
                ReconcileScope::Folder(scope.map(str::to_string)),
            )
        };

        self.emit(CoreEvent::Sync(SyncEvent::Started {
            sync_id: sync_id.clone(),
            is_full_sync,
            scope: scope.map(str::to_string),
        }));
        info!(sync_id = %sync_id, ?strategy, "Sync started");

        let outcome = self
            .run(strategy, scope, &reconcile_scope, &token)
            .await
            .map(|result| SyncReport {
                sync_id: sync_id.clone(),
                strategy,
                scope: scope.map(str::to_string),
                result,
                duration_ms: started.elapsed().as_millis() as u64,
            });

        match &outcome {
            Ok(report) => self.report_success(report),
            Err(SyncError::Cancelled) => {
                info!(sync_id = %sync_id, "Sync cancelled");
                self.emit(CoreEvent::Sync(SyncEvent::Cancelled { sync_id }));
            }
            Err(err) => {
                error!(sync_id = %sync_id, error = %err, "Sync failed");
                self.emit(CoreEvent::Sync(SyncEvent::Failed {
                    sync_id,
                    message: err.to_string(),
                    recoverable: err.is_recoverable(),
                }));
            }
        }

        outcome
    }

    async fn run(
        &self,
        strategy: SyncStrategy,
        scope: Option<&str>,
        reconcile_scope: &ReconcileScope,
        token: &CancellationToken,
    ) -> Result<ReconcileResult> {
        let remote = self.fetch(strategy, scope, token).await?;
        let snapshot = SyncSnapshot::from_remote(remote)?;

        if token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let result = reconcile(self.store.as_ref(), &snapshot, reconcile_scope).await?;

        if strategy == SyncStrategy::Full {
            self.sync_state.mark_full_sync_completed().await?;
        }
        if let Err(err) = self.sync_state.record_sync(self.clock.unix_timestamp_millis()).await {
            warn!(error = %err, "Failed to record sync time");
        }

        Ok(result)
    }

    async fn fetch(
        &self,
        strategy: SyncStrategy,
        scope: Option<&str>,
        token: &CancellationToken,
    ) -> Result<RemoteSnapshot> {
        let limit = Duration::from_secs(self.config.fetch_timeout_secs);
        let request = async {
            match strategy {
                SyncStrategy::Full => self.remote.fetch_full_catalog().await,
                SyncStrategy::Incremental => self.remote.fetch_snapshot(scope).await,
            }
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(SyncError::Cancelled),
            fetched = timeout(limit, request) => match fetched {
                Ok(Ok(snapshot)) => {
                    debug!(items = snapshot.items.len(), "Fetched remote snapshot");
                    Ok(snapshot)
                }
                Ok(Err(FetchError::Cancelled)) => Err(SyncError::Cancelled),
                Ok(Err(err)) => Err(SyncError::Fetch(err)),
                Err(_) => Err(SyncError::Fetch(FetchError::Timeout(self.config.fetch_timeout_secs))),
            },
        }
    }

    fn report_success(&self, report: &SyncReport) {
        let result = &report.result;
        info!(
            sync_id = %report.sync_id,
            inserted = result.inserted_count,
            updated = result.updated_count,
            deleted = result.deleted_count,
            deferred = result.deferred_count,
            duration_ms = report.duration_ms,
            "Sync completed"
        );

        self.emit(CoreEvent::Sync(SyncEvent::Completed {
            sync_id: report.sync_id.clone(),
            items_inserted: result.inserted_count,
            items_updated: result.updated_count,
            items_deleted: result.deleted_count,
            items_deferred: result.deferred_count,
            duration_ms: report.duration_ms,
        }));

        match &result.signal {
            SyncSignal::None => {}
            SyncSignal::ReloadLastBook(path) => {
                self.emit(CoreEvent::Library(LibraryEvent::LastBookReloadRequested {
                    relative_path: path.clone(),
                }))
            }
            SyncSignal::DifferentLastBook(path) => {
                self.emit(CoreEvent::Library(LibraryEvent::LastBookChanged {
                    relative_path: path.clone(),
                }))
            }
        }
    }

    fn emit(&self, event: CoreEvent) {
        self.event_bus.emit(event).ok();
    }
}
