//! SQLite-backed key-value store.
//!
//! One `kv` table shared by every namespace, so several engines (or an
//! engine and its auth session) can live in the same file.

use super::kv::{ChangeKind, KeyValueStore, StoreChange, CHANGE_CHANNEL_CAPACITY};
use crate::error::{SyncError, SyncResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;

/// Persistent `KeyValueStore` backed by SQLite.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    namespace: String,
    changes: broadcast::Sender<StoreChange>,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>, namespace: &str) -> SyncResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::Storage(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| SyncError::Storage(format!("failed to open store: {e}")))?;
        debug!("Opened license store at {}", path.display());
        Self::with_connection(conn, namespace)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory(namespace: &str) -> SyncResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SyncError::Storage(format!("failed to open in-memory store: {e}")))?;
        Self::with_connection(conn, namespace)
    }

    fn with_connection(conn: Connection, namespace: &str) -> SyncResult<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            );
            ",
        )
        .map_err(|e| SyncError::Storage(format!("failed to init store schema: {e}")))?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            namespace: namespace.to_string(),
            changes,
        })
    }

    /// The namespace this store reads and writes.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn conn(&self) -> SyncResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SyncError::Storage("store connection lock poisoned".to_string()))
    }

    fn notify(&self, key: &str, kind: ChangeKind) {
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            kind,
        });
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> SyncResult<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str) -> SyncResult<()> {
        {
            let conn = self.conn()?;
            conn.execute(
                "INSERT OR REPLACE INTO kv (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![self.namespace, key, value, chrono::Utc::now().to_rfc3339()],
            )?;
        }
        self.notify(key, ChangeKind::Put);
        Ok(())
    }

    fn put_many(&self, entries: &[(&str, &str)]) -> SyncResult<()> {
        {
            let conn = self.conn()?;
            let tx = conn.unchecked_transaction()?;
            let now = chrono::Utc::now().to_rfc3339();
            for (key, value) in entries {
                tx.execute(
                    "INSERT OR REPLACE INTO kv (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)",
                    params![self.namespace, key, value, now],
                )?;
            }
            tx.commit()?;
        }
        for (key, _) in entries {
            self.notify(key, ChangeKind::Put);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> SyncResult<()> {
        let removed = {
            let conn = self.conn()?;
            conn.execute(
                "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
            )?
        };
        if removed > 0 {
            self.notify(key, ChangeKind::Delete);
        }
        Ok(())
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
