//! Persistent storage for the license snapshot.
//!
//! A small key-value abstraction with in-memory and SQLite backends, and a
//! typed layer on top that owns the two persisted keys.

pub mod kv;
pub mod license;
pub mod memory;
pub mod sqlite;

pub use kv::{ChangeKind, KeyValueStore, StoreChange};
pub use license::{LicenseStore, Persisted, CACHE_KEY, SNAPSHOT_KEY};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
