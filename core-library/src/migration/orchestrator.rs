//! Migration orchestrator
//!
//! Drives a store from whatever version it is at to the latest version, one
//! step at a time, and then opens it for catalog access.
//!
//! ```text
//!            ┌────────────────────────────┐
//!            v                            │ step committed
//! Idle ─> Checking ──needs step──> Migrating{step_id}
//!            │                            │
//!            │ up to date                 │ step failed
//!            v                            v
//!       Loaded{version}               Failed{reason}
//! ```
//!
//! The version is re-read before every step, so a process that crashed in
//! the middle of a chain resumes at the first step that did not commit.

use super::error::{MigrationError, MigrationResult, PlanningError};
use super::executor::MigrationExecutor;
use super::planner::MigrationPlanner;
use crate::models::StoreVersion;
use crate::store::{SqliteCatalogStore, StoreAccessor};
use bridge_traits::time::Clock;
use core_runtime::events::{CoreEvent, EventBus, MigrationEvent};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Observable orchestrator state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorState {
    Idle,
    Checking,
    Migrating { step_id: String },
    Loaded { version: StoreVersion },
    Failed { reason: String },
}

impl OrchestratorState {
    fn can_transition_to(&self, next: &OrchestratorState) -> bool {
        use OrchestratorState::*;
        matches!(
            (self, next),
            (Idle | Loaded { .. } | Failed { .. }, Checking)
                | (Checking, Migrating { .. } | Loaded { .. } | Failed { .. })
                | (Migrating { .. }, Checking | Failed { .. })
        )
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorState::Idle => write!(f, "idle"),
            OrchestratorState::Checking => write!(f, "checking"),
            OrchestratorState::Migrating { step_id } => write!(f, "migrating ({})", step_id),
            OrchestratorState::Loaded { version } => write!(f, "loaded ({})", version),
            OrchestratorState::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// A store at the latest version, open for catalog access.
#[derive(Clone)]
pub struct ReadyStore {
    pub store: Arc<dyn StoreAccessor>,
    pub version: StoreVersion,
    /// Steps applied during this load, in order
    pub applied_steps: Vec<String>,
}

impl fmt::Debug for ReadyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyStore")
            .field("version", &self.version)
            .field("applied_steps", &self.applied_steps)
            .finish_non_exhaustive()
    }
}

/// Clears the running flag when a load finishes or is dropped mid-way.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct MigrationOrchestrator {
    store: Arc<dyn StoreAccessor>,
    executor: MigrationExecutor,
    planner: MigrationPlanner,
    event_bus: Option<Arc<EventBus>>,
    state: watch::Sender<OrchestratorState>,
    running: AtomicBool,
}

impl MigrationOrchestrator {
    pub fn new(store: Arc<SqliteCatalogStore>, planner: MigrationPlanner) -> Self {
        let executor = MigrationExecutor::new(store.adapter());
        let (state, _) = watch::channel(OrchestratorState::Idle);
        Self {
            store,
            executor,
            planner,
            event_bus: None,
            state,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.executor = self.executor.with_clock(clock);
        self
    }

    pub fn state(&self) -> OrchestratorState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    pub fn planner(&self) -> &MigrationPlanner {
        &self.planner
    }

    /// Migrate the store to the latest version and open it.
    ///
    /// # Errors
    /// - `MigrationError::AlreadyRunning` if another load is in progress
    /// - `MigrationError::Planning` if the store is newer than the chain or
    ///   no step continues from its version
    /// - `MigrationError::StepFailed` if a step rolled back
    /// - `MigrationError::Open` if the migrated store cannot be opened
    ///
    /// On error the store is left at the last committed version; whether to
    /// delete it is up to the caller.
    #[instrument(skip(self), fields(latest = %self.planner.latest_version()))]
    pub async fn load_store(&self) -> MigrationResult<ReadyStore> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Store load requested while another load is running");
            return Err(MigrationError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);

        info!(category = "launch", "Attempting to load store");

        match self.migrate_and_open().await {
            Ok(ready) => {
                self.transition(OrchestratorState::Loaded {
                    version: ready.version,
                });
                self.emit(MigrationEvent::StoreLoaded {
                    version: ready.version.value(),
                    steps_applied: ready.applied_steps.clone(),
                });
                info!(
                    category = "launch",
                    version = %ready.version,
                    steps_applied = ready.applied_steps.len(),
                    "Success loading store"
                );
                Ok(ready)
            }
            Err(err) => {
                self.transition(OrchestratorState::Failed {
                    reason: err.to_string(),
                });
                self.emit(MigrationEvent::StoreLoadFailed {
                    message: err.to_string(),
                });
                error!(category = "launch", error = %err, "Failed to load store");
                Err(err)
            }
        }
    }

    async fn migrate_and_open(&self) -> MigrationResult<ReadyStore> {
        let latest = self.planner.latest_version();
        let mut applied_steps = Vec::new();

        let version = loop {
            self.transition(OrchestratorState::Checking);
            let current = self.store.get_version().await?;
            debug!(current = %current, latest = %latest, "Checked store version");

            if current > latest {
                return Err(PlanningError::NewerThanSupported { current, latest }.into());
            }
            if !self.planner.needs_migration(current) {
                break current;
            }

            let step = self.planner.next_step(current)?;
            let step_id = step.id().to_string();
            self.transition(OrchestratorState::Migrating {
                step_id: step_id.clone(),
            });
            self.emit(MigrationEvent::StepStarted {
                step_id: step_id.clone(),
                from_version: current.value(),
                to_version: step.target_version().value(),
            });
            info!(
                category = "launch",
                step_id = %step_id,
                from = %current,
                to = %step.target_version(),
                "Applying migration step"
            );

            match self.executor.apply(step.as_ref()).await {
                Ok(version) => {
                    self.emit(MigrationEvent::StepApplied {
                        step_id: step_id.clone(),
                        version: version.value(),
                    });
                    applied_steps.push(step_id);
                }
                Err(err) => {
                    self.emit(MigrationEvent::StepFailed {
                        step_id,
                        message: err.to_string(),
                    });
                    return Err(err);
                }
            }
        };

        self.store.open_store().await?;

        Ok(ReadyStore {
            store: Arc::clone(&self.store),
            version,
            applied_steps,
        })
    }

    fn transition(&self, next: OrchestratorState) {
        self.state.send_modify(|state| {
            if !state.can_transition_to(&next) {
                warn!(from = %state, to = %next, "Unexpected orchestrator transition");
            }
            debug!(from = %state, to = %next, "Orchestrator transition");
            *state = next;
        });
    }

    fn emit(&self, event: MigrationEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Migration(event)).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpenError;
    use crate::migration::step::{MigrationStep, SqlMigrationStep, StepContext};
    use crate::migration::steps::{catalog_chain, catalog_steps};
    use crate::models::{CatalogDiff, CatalogItem, CatalogScope};
    use async_trait::async_trait;
    use bridge_traits::database::DatabaseConfig;
    use std::sync::atomic::AtomicUsize;

    async fn empty_store() -> Arc<SqliteCatalogStore> {
        Arc::new(
            SqliteCatalogStore::open(DatabaseConfig::in_memory())
                .await
                .unwrap(),
        )
    }

    /// Fails while `failures_left` is positive, then behaves like the wrapped step.
    struct FlakyStep {
        inner: Arc<dyn MigrationStep>,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl MigrationStep for FlakyStep {
        fn id(&self) -> &str {
            self.inner.id()
        }

        fn source_version(&self) -> StoreVersion {
            self.inner.source_version()
        }

        async fn apply(&self, ctx: &StepContext<'_>) -> crate::Result<()> {
            self.inner.apply(ctx).await?;
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(crate::LibraryError::InvalidInput {
                    field: "step".to_string(),
                    message: "injected failure".to_string(),
                });
            }
            Ok(())
        }
    }

    fn chain_failing_at(index: usize, failures: usize) -> MigrationPlanner {
        let steps = catalog_steps()
            .into_iter()
            .enumerate()
            .map(|(i, step)| {
                if i == index {
                    Arc::new(FlakyStep {
                        inner: step,
                        failures_left: AtomicUsize::new(failures),
                    }) as Arc<dyn MigrationStep>
                } else {
                    step
                }
            })
            .collect();
        MigrationPlanner::new(steps).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_store_runs_whole_chain() {
        let store = empty_store().await;
        let bus = Arc::new(EventBus::new(64));
        let mut events = bus.subscribe();
        let orchestrator =
            MigrationOrchestrator::new(store.clone(), catalog_chain().unwrap()).with_event_bus(bus);

        let ready = orchestrator.load_store().await.unwrap();

        assert_eq!(ready.version, StoreVersion(4));
        assert_eq!(ready.applied_steps.len(), 4);
        assert_eq!(
            orchestrator.state(),
            OrchestratorState::Loaded {
                version: StoreVersion(4)
            }
        );
        assert_eq!(ready.store.count_items().await.unwrap(), 0);

        let mut started = 0;
        let mut loaded = false;
        while let Ok(event) = events.try_recv() {
            match event {
                CoreEvent::Migration(MigrationEvent::StepStarted { .. }) => started += 1,
                CoreEvent::Migration(MigrationEvent::StoreLoaded { version, .. }) => {
                    assert_eq!(version, 4);
                    loaded = true;
                }
                _ => {}
            }
        }
        assert_eq!(started, 4);
        assert!(loaded);
    }

    #[tokio::test]
    async fn test_second_load_is_a_no_op() {
        let store = empty_store().await;
        let orchestrator = MigrationOrchestrator::new(store.clone(), catalog_chain().unwrap());
        orchestrator.load_store().await.unwrap();

        store
            .write_items(&CatalogDiff {
                inserts: vec![CatalogItem::book("a.mp3", "A", 10.0)],
                ..Default::default()
            })
            .await
            .unwrap();

        let again = orchestrator.load_store().await.unwrap();
        assert!(again.applied_steps.is_empty());
        assert_eq!(again.version, StoreVersion(4));
        assert_eq!(
            again.store.read_items(&CatalogScope::Library).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_failure_at_step_keeps_previous_version_and_resumes() {
        let store = empty_store().await;
        let orchestrator = MigrationOrchestrator::new(store.clone(), chain_failing_at(2, 1));

        let err = orchestrator.load_store().await.unwrap_err();
        assert!(
            matches!(err, MigrationError::StepFailed { ref step_id, .. } if step_id == "0003_progress_tracking")
        );
        assert_eq!(store.get_version().await.unwrap(), StoreVersion(2));
        assert!(matches!(orchestrator.state(), OrchestratorState::Failed { .. }));

        let ready = orchestrator.load_store().await.unwrap();
        assert_eq!(ready.version, StoreVersion(4));
        assert_eq!(
            ready.applied_steps,
            vec!["0003_progress_tracking", "0004_parent_paths"]
        );
    }

    #[tokio::test]
    async fn test_newer_store_is_refused() {
        let store = empty_store().await;
        MigrationOrchestrator::new(store.clone(), catalog_chain().unwrap())
            .load_store()
            .await
            .unwrap();

        let older = MigrationPlanner::new(catalog_steps().into_iter().take(2).collect()).unwrap();
        let err = MigrationOrchestrator::new(store, older)
            .load_store()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MigrationError::Planning(PlanningError::NewerThanSupported {
                current: StoreVersion(4),
                latest: StoreVersion(2),
            })
        ));
    }

    #[tokio::test]
    async fn test_incomplete_schema_fails_to_open() {
        let store = empty_store().await;
        let planner = MigrationPlanner::new(vec![Arc::new(SqlMigrationStep::new(
            "0001_unrelated",
            StoreVersion::EMPTY,
            &["CREATE TABLE unrelated (id INTEGER)"],
        )) as Arc<dyn MigrationStep>])
        .unwrap();

        let err = MigrationOrchestrator::new(store, planner)
            .load_store()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MigrationError::Open(OpenError::SchemaMissing(ref table)) if table == "catalog_items"
        ));
    }

    #[tokio::test]
    async fn test_concurrent_load_fails_fast() {
        let store = empty_store().await;
        let orchestrator = MigrationOrchestrator::new(store, catalog_chain().unwrap());

        orchestrator.running.store(true, Ordering::SeqCst);
        assert!(matches!(
            orchestrator.load_store().await,
            Err(MigrationError::AlreadyRunning)
        ));
        assert_eq!(orchestrator.state(), OrchestratorState::Idle);

        orchestrator.running.store(false, Ordering::SeqCst);
        assert!(orchestrator.load_store().await.is_ok());
    }

    #[test]
    fn test_transitions() {
        use OrchestratorState::*;
        assert!(Idle.can_transition_to(&Checking));
        assert!(Checking.can_transition_to(&Migrating {
            step_id: "a".to_string()
        }));
        assert!(Failed {
            reason: "x".to_string()
        }
        .can_transition_to(&Checking));
        assert!(!Idle.can_transition_to(&Loaded {
            version: StoreVersion(1)
        }));
        assert!(!Migrating {
            step_id: "a".to_string()
        }
        .can_transition_to(&Loaded {
            version: StoreVersion(1)
        }));
    }
}
