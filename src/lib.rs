//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates. Host applications can depend on `library-engine-workspace`
//! and enable `desktop-shims` to get the SQLite-backed defaults for the
//! settings store without wiring `core-service` and `bridge-desktop` by hand.

#[cfg(feature = "desktop-shims")]
pub use core_service::{CoreError, LibraryCore};
