//! chainstate-storage: backends for the [`VersionedStore`] trait.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Both backends share write planning and filter evaluation rules from
//! `chainstate-core`, so they return identical results for the same
//! sequence of operations.
//!
//! [`VersionedStore`]: chainstate_core::VersionedStore

pub mod ddl;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "memory")]
pub use memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteOptions, SqliteStore};
