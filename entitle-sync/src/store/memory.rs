//! In-process key-value store.

use super::kv::{ChangeKind, KeyValueStore, StoreChange, CHANGE_CHANNEL_CAPACITY};
use crate::error::{SyncError, SyncResult};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

/// A `KeyValueStore` held in memory. Does not survive restarts.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    changes: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            changes,
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries().map(|e| e.len()).unwrap_or_default()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> SyncResult<MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| SyncError::Storage("memory store lock poisoned".to_string()))
    }

    fn notify(&self, key: &str, kind: ChangeKind) {
        // No receivers is fine.
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            kind,
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> SyncResult<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        self.notify(key, ChangeKind::Put);
        Ok(())
    }

    fn put_many(&self, entries: &[(&str, &str)]) -> SyncResult<()> {
        {
            let mut stored = self.entries()?;
            for (key, value) in entries {
                stored.insert((*key).to_string(), (*value).to_string());
            }
        }
        for (key, _) in entries {
            self.notify(key, ChangeKind::Put);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> SyncResult<()> {
        let removed = self.entries()?.remove(key).is_some();
        if removed {
            self.notify(key, ChangeKind::Delete);
        }
        Ok(())
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
