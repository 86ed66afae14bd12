//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! - `SettingsStore` using a SQLite-backed key-value table
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::SqliteSettingsStore;
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let settings = SqliteSettingsStore::open("/path/to/settings.sqlite").await?;
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/library.sqlite")
//!     .settings_store(Arc::new(settings))
//!     .build()?;
//! ```

mod settings;

pub use settings::SqliteSettingsStore;
