//! Core service façade and bootstrap helpers.
//!
//! [`LibraryCore::bootstrap`] runs the startup sequence from a
//! [`CoreConfig`]: resolve the settings store, migrate and open the catalog
//! store, then build the sync coordinator when a remote catalog was injected.
//! Nothing touches the catalog before the migration orchestrator reports the
//! store as loaded.
//!
//! Desktop hosts enable the `desktop-shims` feature (which depends on
//! `bridge-desktop`) to get a SQLite settings file next to the database when
//! they do not inject their own `SettingsStore`.

pub mod error;

pub use error::{CoreError, Result};

use std::path::Path;
use std::sync::Arc;

use bridge_traits::{database::DatabaseConfig, storage::SettingsStore};
use core_library::migration::{catalog_chain, MigrationError, MigrationOrchestrator, ReadyStore};
use core_library::models::StoreVersion;
use core_library::store::{cleanup_store_files, SqliteCatalogStore, StoreAccessor};
use core_runtime::config::{CoreConfig, MigrationFailurePolicy, SettingsSource};
use core_runtime::events::{CoreEvent, EventBus, MigrationEvent};
use core_sync::{LibrarySyncState, SyncCoordinator, SyncOutcome};
use tracing::{error, info, instrument, warn};

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct LibraryCore {
    store: Arc<dyn StoreAccessor>,
    version: StoreVersion,
    applied_steps: Vec<String>,
    sync_state: LibrarySyncState,
    sync: Option<Arc<SyncCoordinator>>,
    event_bus: Arc<EventBus>,
}

impl LibraryCore {
    /// Migrate and open the store described by `config`.
    ///
    /// When loading fails and the policy is
    /// [`MigrationFailurePolicy::ResetStore`], the store files are deleted
    /// and loading is retried once from an empty store.
    ///
    /// # Errors
    /// - `CoreError::Config` if the configuration is invalid
    /// - `CoreError::CapabilityMissing` if no settings store is available
    /// - `CoreError::Migration` if the store cannot be loaded
    #[instrument(skip(config), fields(database = %config.database_path.display()))]
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let settings = resolve_settings(&config.settings).await?;

        let ready = match load_store(&config, &event_bus).await {
            Ok(ready) => ready,
            Err(err) if config.migration_failure_policy == MigrationFailurePolicy::ResetStore => {
                warn!(category = "launch", error = %err, "Resetting store after failed load");
                reset_store(&config.database_path, &event_bus).await?;
                load_store(&config, &event_bus).await?
            }
            Err(err) => {
                error!(category = "launch", error = %err, "Store could not be loaded");
                return Err(err.into());
            }
        };

        let sync_state = LibrarySyncState::new(settings).with_event_bus(Arc::clone(&event_bus));
        let sync = config.remote_catalog.clone().map(|remote| {
            Arc::new(
                SyncCoordinator::new(
                    Arc::clone(&ready.store),
                    remote,
                    sync_state.clone(),
                    Arc::clone(&event_bus),
                    config.sync,
                )
                .with_clock(Arc::clone(&config.clock)),
            )
        });

        info!(
            category = "launch",
            version = %ready.version,
            steps_applied = ready.applied_steps.len(),
            sync_enabled = sync.is_some(),
            "Library core ready"
        );

        Ok(Self {
            store: ready.store,
            version: ready.version,
            applied_steps: ready.applied_steps,
            sync_state,
            sync,
            event_bus,
        })
    }

    /// Catalog access, available only after a successful load.
    pub fn store(&self) -> Arc<dyn StoreAccessor> {
        Arc::clone(&self.store)
    }

    pub fn store_version(&self) -> StoreVersion {
        self.version
    }

    /// Migration steps applied during bootstrap, in order.
    pub fn applied_steps(&self) -> &[String] {
        &self.applied_steps
    }

    /// `None` when no remote catalog was configured.
    pub fn sync_coordinator(&self) -> Option<Arc<SyncCoordinator>> {
        self.sync.clone()
    }

    pub fn sync_state(&self) -> &LibrarySyncState {
        &self.sync_state
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    /// Sync `scope` and collapse the result for the player.
    ///
    /// # Errors
    /// `CoreError::CapabilityMissing` if sync is disabled.
    pub async fn sync(&self, scope: Option<&str>) -> Result<SyncOutcome> {
        let coordinator = self.sync.as_ref().ok_or_else(|| CoreError::CapabilityMissing {
            capability: "RemoteCatalog".to_string(),
            message: "Sync is disabled because no remote catalog was configured".to_string(),
        })?;
        Ok(coordinator.sync_outcome(scope).await)
    }
}

async fn resolve_settings(source: &SettingsSource) -> Result<Arc<dyn SettingsStore>> {
    match source {
        SettingsSource::Provided(store) => Ok(Arc::clone(store)),
        #[cfg(feature = "desktop-shims")]
        SettingsSource::DesktopDefault(path) => {
            let store = bridge_desktop::SqliteSettingsStore::open(path).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "desktop-shims"))]
        SettingsSource::DesktopDefault(path) => Err(CoreError::CapabilityMissing {
            capability: "SettingsStore".to_string(),
            message: format!(
                "Default settings at {} need the 'desktop-shims' feature",
                path.display()
            ),
        }),
    }
}

async fn load_store(
    config: &CoreConfig,
    event_bus: &Arc<EventBus>,
) -> std::result::Result<ReadyStore, MigrationError> {
    let store = Arc::new(SqliteCatalogStore::open(DatabaseConfig::new(&config.database_path)).await?);
    let orchestrator = MigrationOrchestrator::new(Arc::clone(&store), catalog_chain()?)
        .with_event_bus(Arc::clone(event_bus))
        .with_clock(Arc::clone(&config.clock));

    match orchestrator.load_store().await {
        Ok(ready) => Ok(ready),
        Err(err) => {
            // Release the pool so the files can be removed.
            if let Err(close_err) = store.close().await {
                warn!(error = %close_err, "Failed to close store after load failure");
            }
            Err(err)
        }
    }
}

async fn reset_store(database_path: &Path, event_bus: &EventBus) -> Result<()> {
    let removed = cleanup_store_files(database_path).await?;
    info!(
        category = "launch",
        files_removed = removed.len(),
        "Deleted store files"
    );
    event_bus
        .emit(CoreEvent::Migration(MigrationEvent::StoreReset {
            path: database_path.display().to_string(),
        }))
        .ok();
    Ok(())
}
