//! # Host Bridge Traits
//!
//! Capability traits the library engine needs from its host.
//!
//! ## Traits
//!
//! ### Storage
//! - [`DatabaseAdapter`](database::DatabaseAdapter) - Transactional row access to the catalog database
//! - [`SettingsStore`](storage::SettingsStore) - Key-value flags that survive restarts
//!
//! ### Remote
//! - [`RemoteCatalog`](remote::RemoteCatalog) - Snapshot reads of the remote catalog copy
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! Required capabilities are checked once, when `CoreConfig` is built, and a
//! missing one is reported as `CapabilityMissing` with an actionable message
//! instead of failing later in the middle of a migration or a sync.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so implementations can be shared
//! behind `Arc` across async tasks.

pub mod database;
pub mod error;
pub mod remote;
pub mod storage;
pub mod time;

pub use error::{BridgeError, FetchError};

pub use database::{DatabaseAdapter, DatabaseConfig, QueryRow, QueryValue, TransactionId};
pub use remote::{RemoteCatalog, RemoteCatalogItem, RemoteItemKind, RemoteSnapshot};
pub use storage::SettingsStore;
pub use time::{Clock, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
