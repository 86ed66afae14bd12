//! # Core Configuration Module
//!
//! Builder-based configuration for the library engine.
//!
//! ## Overview
//!
//! [`CoreConfig`] carries every dependency the engine needs at startup. The
//! builder validates eagerly so a missing capability is reported before the
//! store is touched.
//!
//! ## Required Dependencies
//!
//! - `database_path` - Location of the catalog database
//! - `SettingsStore` - Durable flags (required unless `desktop-shims` is enabled,
//!   in which case a SQLite settings file next to the database is used)
//!
//! ## Optional Dependencies
//!
//! - `RemoteCatalog` - Without it the engine runs local-only and sync is disabled
//! - `Clock` - Defaults to the system clock
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, MigrationFailurePolicy};
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/library.sqlite")
//!     .settings_store(Arc::new(MySettingsStore))
//!     .remote_catalog(Arc::new(MyRemoteCatalog))
//!     .fetch_timeout_secs(20)
//!     .migration_failure_policy(MigrationFailurePolicy::ResetStore)
//!     .build()?;
//! ```
//!
//! ## Environment Overrides
//!
//! [`CoreConfigBuilder::with_env_overrides`] reads `LIBRARY_SYNC_TIMEOUT_SECS`
//! and `LIBRARY_EVENT_BUFFER_SIZE`, which is handy for local debugging.

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use anyhow::Context;
use bridge_traits::{
    remote::RemoteCatalog,
    storage::SettingsStore,
    time::{Clock, SystemClock},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Upper bound for a single remote fetch.
const MAX_FETCH_TIMEOUT_SECS: u64 = 600;

/// What startup does when the store cannot be migrated or opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MigrationFailurePolicy {
    /// Report the failure and leave the store files untouched.
    #[default]
    Abort,
    /// Delete the store files and start again from an empty store.
    ResetStore,
}

/// Where the durable settings live.
#[derive(Clone)]
pub enum SettingsSource {
    /// Host-provided implementation.
    Provided(Arc<dyn SettingsStore>),
    /// SQLite settings file created by `bridge-desktop` at this path.
    DesktopDefault(PathBuf),
}

impl std::fmt::Debug for SettingsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsSource::Provided(_) => f.write_str("Provided(SettingsStore { ... })"),
            SettingsSource::DesktopDefault(path) => {
                f.debug_tuple("DesktopDefault").field(path).finish()
            }
        }
    }
}

/// Synchronization settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Abort a remote fetch that takes longer than this
    pub fetch_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 30,
        }
    }
}

/// Core configuration for the library engine.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the catalog database file
    pub database_path: PathBuf,

    /// Durable settings (full-sync flag)
    pub settings: SettingsSource,

    /// Remote catalog; `None` disables sync
    pub remote_catalog: Option<Arc<dyn RemoteCatalog>>,

    /// Time source used to stamp progress and events
    pub clock: Arc<dyn Clock>,

    pub sync: SyncConfig,

    pub migration_failure_policy: MigrationFailurePolicy,

    /// Capacity of the event bus channel
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("settings", &self.settings)
            .field(
                "remote_catalog",
                &self.remote_catalog.as_ref().map(|_| "RemoteCatalog { ... }"),
            )
            .field("sync", &self.sync)
            .field("migration_failure_policy", &self.migration_failure_policy)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.sync.fetch_timeout_secs == 0 {
            return Err(Error::Config(
                "Sync fetch timeout must be greater than 0 seconds".to_string(),
            ));
        }

        if self.sync.fetch_timeout_secs > MAX_FETCH_TIMEOUT_SECS {
            return Err(Error::Config(format!(
                "Sync fetch timeout exceeds maximum of {} seconds",
                MAX_FETCH_TIMEOUT_SECS
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether a remote catalog was injected.
    pub fn sync_enabled(&self) -> bool {
        self.remote_catalog.is_some()
    }
}

#[cfg(feature = "desktop-shims")]
fn default_settings_source(database_path: &Path) -> Result<SettingsSource> {
    let path = database_path
        .parent()
        .map(|parent| parent.join("settings.sqlite"))
        .unwrap_or_else(|| PathBuf::from("settings.sqlite"));
    Ok(SettingsSource::DesktopDefault(path))
}

#[cfg(not(feature = "desktop-shims"))]
fn default_settings_source(_database_path: &Path) -> Result<SettingsSource> {
    Err(Error::CapabilityMissing {
        capability: "SettingsStore".to_string(),
        message: "SettingsStore implementation is required to persist the full-sync flag. \
                 Desktop: enable the 'desktop-shims' feature to use the default SqliteSettingsStore. \
                 Mobile: inject platform-native settings (UserDefaults/DataStore)."
            .to_string(),
    })
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    remote_catalog: Option<Arc<dyn RemoteCatalog>>,
    clock: Option<Arc<dyn Clock>>,
    fetch_timeout_secs: Option<u64>,
    migration_failure_policy: MigrationFailurePolicy,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn remote_catalog(mut self, remote: Arc<dyn RemoteCatalog>) -> Self {
        self.remote_catalog = Some(remote);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.fetch_timeout_secs = Some(secs);
        self
    }

    pub fn migration_failure_policy(mut self, policy: MigrationFailurePolicy) -> Self {
        self.migration_failure_policy = policy;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Apply `LIBRARY_SYNC_TIMEOUT_SECS` / `LIBRARY_EVENT_BUFFER_SIZE` when set.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("LIBRARY_SYNC_TIMEOUT_SECS") {
            let secs = raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("LIBRARY_SYNC_TIMEOUT_SECS is not a number: {:?}", raw))?;
            self.fetch_timeout_secs = Some(secs);
        }

        if let Some(raw) = lookup("LIBRARY_EVENT_BUFFER_SIZE") {
            let size = raw
                .trim()
                .parse::<usize>()
                .with_context(|| format!("LIBRARY_EVENT_BUFFER_SIZE is not a number: {:?}", raw))?;
            self.event_buffer_size = Some(size);
        }

        Ok(self)
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let settings = match self.settings_store {
            Some(store) => SettingsSource::Provided(store),
            None => default_settings_source(&database_path)?,
        };

        let config = CoreConfig {
            database_path,
            settings,
            remote_catalog: self.remote_catalog,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            sync: SyncConfig {
                fetch_timeout_secs: self
                    .fetch_timeout_secs
                    .unwrap_or(SyncConfig::default().fetch_timeout_secs),
            },
            migration_failure_policy: self.migration_failure_policy,
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use mockall::mock;
    use std::collections::HashMap;

    mock! {
        pub Settings {}

        #[async_trait]
        impl SettingsStore for Settings {
            async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()>;
            async fn get_string(&self, key: &str) -> BridgeResult<Option<String>>;
            async fn set_bool(&self, key: &str, value: bool) -> BridgeResult<()>;
            async fn get_bool(&self, key: &str) -> BridgeResult<Option<bool>>;
            async fn set_i64(&self, key: &str, value: i64) -> BridgeResult<()>;
            async fn get_i64(&self, key: &str) -> BridgeResult<Option<i64>>;
            async fn delete(&self, key: &str) -> BridgeResult<()>;
            async fn has_key(&self, key: &str) -> BridgeResult<bool>;
            async fn list_keys(&self) -> BridgeResult<Vec<String>>;
        }
    }

    fn settings() -> Arc<dyn SettingsStore> {
        Arc::new(MockSettings::new())
    }

    #[test]
    fn test_build_with_required_fields() {
        let config = CoreConfig::builder()
            .database_path("/tmp/library.sqlite")
            .settings_store(settings())
            .build()
            .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/library.sqlite"));
        assert!(matches!(config.settings, SettingsSource::Provided(_)));
        assert_eq!(config.sync, SyncConfig::default());
        assert_eq!(config.migration_failure_policy, MigrationFailurePolicy::Abort);
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
        assert!(!config.sync_enabled());
    }

    #[test]
    fn test_missing_database_path() {
        let err = CoreConfig::builder()
            .settings_store(settings())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_settings_store_fails_fast() {
        let err = CoreConfig::builder()
            .database_path("/tmp/library.sqlite")
            .build()
            .unwrap_err();

        match err {
            Error::CapabilityMissing { capability, .. } => assert_eq!(capability, "SettingsStore"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_desktop_default_settings_next_to_database() {
        let config = CoreConfig::builder()
            .database_path("/tmp/library/catalog.sqlite")
            .build()
            .unwrap();

        match config.settings {
            SettingsSource::DesktopDefault(path) => {
                assert_eq!(path, PathBuf::from("/tmp/library/settings.sqlite"))
            }
            other => panic!("unexpected settings source: {other:?}"),
        }
    }

    #[test]
    fn test_timeout_bounds() {
        for secs in [0, MAX_FETCH_TIMEOUT_SECS + 1] {
            let result = CoreConfig::builder()
                .database_path("/tmp/library.sqlite")
                .settings_store(settings())
                .fetch_timeout_secs(secs)
                .build();
            assert!(matches!(result, Err(Error::Config(_))), "timeout {secs}");
        }
    }

    #[test]
    fn test_overrides_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("LIBRARY_SYNC_TIMEOUT_SECS", " 45 "),
            ("LIBRARY_EVENT_BUFFER_SIZE", "8"),
        ]
        .into_iter()
        .collect();

        let config = CoreConfig::builder()
            .database_path("/tmp/library.sqlite")
            .settings_store(settings())
            .with_overrides_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(config.sync.fetch_timeout_secs, 45);
        assert_eq!(config.event_buffer_size, 8);
    }

    #[test]
    fn test_malformed_override_is_config_error() {
        let result = CoreConfig::builder()
            .with_overrides_from(|key| (key == "LIBRARY_SYNC_TIMEOUT_SECS").then(|| "soon".to_string()));

        match result {
            Err(Error::Config(message)) => assert!(message.contains("LIBRARY_SYNC_TIMEOUT_SECS")),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("expected an error"),
        }
    }
}
