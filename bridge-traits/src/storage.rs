//! Persisted key-value settings.
//!
//! The sync layer keeps its small amount of durable state (for example the
//! "first full sync completed" flag) behind this trait so the host decides
//! where it lives: UserDefaults, SharedPreferences, or the SQLite-backed
//! store shipped in `bridge-desktop`.

use async_trait::async_trait;

use crate::error::Result;

/// Key-value settings storage trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn mark_synced(store: &dyn SettingsStore) -> Result<()> {
///     store.set_bool("library.has_completed_full_sync", true).await
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    async fn set_bool(&self, key: &str, value: bool) -> Result<()>;

    async fn get_bool(&self, key: &str) -> Result<Option<bool>>;

    async fn set_i64(&self, key: &str, value: i64) -> Result<()>;

    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;

    /// Delete a setting. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn has_key(&self, key: &str) -> Result<bool>;

    async fn list_keys(&self) -> Result<Vec<String>>;
}
