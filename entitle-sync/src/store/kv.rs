//! Key-value storage abstraction.
//!
//! The engine only needs get/put/delete on string values. Change
//! notifications are offered for hosts that want to observe writes; the
//! engine never relies on them.

use crate::error::SyncResult;
use tokio::sync::broadcast;

/// Capacity of the change notification channel.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// What happened to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The key was written.
    Put,
    /// The key was removed.
    Delete,
}

/// A change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    /// The key that changed.
    pub key: String,
    /// The kind of change.
    pub kind: ChangeKind,
}

/// Durable string key-value storage.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &str) -> SyncResult<Option<String>>;

    /// Writes a value, replacing any existing one.
    fn put(&self, key: &str, value: &str) -> SyncResult<()>;

    /// Writes several values at once. Backends that can should apply them
    /// all or none.
    fn put_many(&self, entries: &[(&str, &str)]) -> SyncResult<()> {
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    /// Removes a value. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> SyncResult<()>;

    /// Subscribes to change notifications.
    fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange>;
}
