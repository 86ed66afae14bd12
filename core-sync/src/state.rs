//! Durable sync bookkeeping kept in the host's [`SettingsStore`].

use crate::error::Result;
use bridge_traits::storage::SettingsStore;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use std::sync::Arc;
use tracing::info;

pub const HAS_COMPLETED_FULL_SYNC_KEY: &str = "library.has_completed_full_sync";
pub const LAST_SYNC_AT_KEY: &str = "library.last_sync_at";

/// Whether the first full library sync has completed, and when the last
/// sync finished.
///
/// The flag is created false, set after the first successful full
/// reconciliation and only cleared by [`reset`](Self::reset).
#[derive(Clone)]
pub struct LibrarySyncState {
    settings: Arc<dyn SettingsStore>,
    event_bus: Option<Arc<EventBus>>,
}

impl LibrarySyncState {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            settings,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub async fn has_completed_full_sync(&self) -> Result<bool> {
        Ok(self
            .settings
            .get_bool(HAS_COMPLETED_FULL_SYNC_KEY)
            .await?
            .unwrap_or(false))
    }

    pub async fn mark_full_sync_completed(&self) -> Result<()> {
        self.settings
            .set_bool(HAS_COMPLETED_FULL_SYNC_KEY, true)
            .await?;
        info!("First full library sync completed");
        Ok(())
    }

    /// Unix millis of the last successful sync.
    pub async fn last_sync_at(&self) -> Result<Option<i64>> {
        Ok(self.settings.get_i64(LAST_SYNC_AT_KEY).await?)
    }

    pub async fn record_sync(&self, completed_at: i64) -> Result<()> {
        self.settings.set_i64(LAST_SYNC_AT_KEY, completed_at).await?;
        Ok(())
    }

    /// Forget sync history so the next sync fetches the whole library.
    pub async fn reset(&self) -> Result<()> {
        self.settings
            .set_bool(HAS_COMPLETED_FULL_SYNC_KEY, false)
            .await?;
        self.settings.delete(LAST_SYNC_AT_KEY).await?;

        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Library(LibraryEvent::FullSyncReset)).ok();
        }
        info!("Library sync state reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use mockall::{mock, predicate::eq};

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

    #[tokio::test]
    async fn test_missing_flag_reads_false() {
        let mut settings = MockSettings::new();
        settings
            .expect_get_bool()
            .with(eq(HAS_COMPLETED_FULL_SYNC_KEY))
            .returning(|_| Ok(None));

        let state = LibrarySyncState::new(Arc::new(settings));
        assert!(!state.has_completed_full_sync().await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_completed_sets_flag() {
        let mut settings = MockSettings::new();
        settings
            .expect_set_bool()
            .with(eq(HAS_COMPLETED_FULL_SYNC_KEY), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));

        let state = LibrarySyncState::new(Arc::new(settings));
        state.mark_full_sync_completed().await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_clears_history_and_notifies() {
        let mut settings = MockSettings::new();
        settings
            .expect_set_bool()
            .with(eq(HAS_COMPLETED_FULL_SYNC_KEY), eq(false))
            .times(1)
            .returning(|_, _| Ok(()));
        settings
            .expect_delete()
            .with(eq(LAST_SYNC_AT_KEY))
            .times(1)
            .returning(|_| Ok(()));

        let bus = Arc::new(EventBus::new(8));
        let mut events = bus.subscribe();
        let state = LibrarySyncState::new(Arc::new(settings)).with_event_bus(bus);

        state.reset().await.unwrap();

        assert_eq!(
            events.try_recv().unwrap(),
            CoreEvent::Library(LibraryEvent::FullSyncReset)
        );
    }

    #[tokio::test]
    async fn test_settings_failure_is_a_state_error() {
        let mut settings = MockSettings::new();
        settings
            .expect_get_bool()
            .returning(|_| Err(BridgeError::OperationFailed("disk full".to_string())));

        let state = LibrarySyncState::new(Arc::new(settings));
        assert!(matches!(
            state.has_completed_full_sync().await,
            Err(SyncError::State(_))
        ));
    }
}
