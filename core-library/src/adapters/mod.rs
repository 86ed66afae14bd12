//! Concrete [`DatabaseAdapter`](bridge_traits::database::DatabaseAdapter) implementations.

pub mod sqlite_native;

pub use sqlite_native::SqliteAdapter;
