//! Typed persistence for the license snapshot and its cache envelope.

use super::kv::KeyValueStore;
use crate::error::SyncResult;
use entitle_license::{CacheEnvelope, LicenseSnapshot};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::warn;

/// Key holding the JSON-encoded snapshot.
pub const SNAPSHOT_KEY: &str = "license-snapshot";

/// Key holding the JSON-encoded cache envelope.
pub const CACHE_KEY: &str = "license-cache";

/// What was found on disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Persisted {
    /// The stored snapshot, if readable.
    pub snapshot: Option<LicenseSnapshot>,
    /// The stored envelope, if readable and consistent with the snapshot.
    pub envelope: Option<CacheEnvelope>,
}

impl Persisted {
    /// True if neither a snapshot nor an envelope exists.
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_none() && self.envelope.is_none()
    }

    /// The snapshot to act on: the stored one, else the envelope's.
    pub fn resident(&self) -> Option<&LicenseSnapshot> {
        self.snapshot
            .as_ref()
            .or_else(|| self.envelope.as_ref().map(CacheEnvelope::snapshot))
    }
}

/// Persistent store for the license snapshot.
#[derive(Clone)]
pub struct LicenseStore {
    kv: Arc<dyn KeyValueStore>,
}

impl LicenseStore {
    /// Wraps a key-value backend.
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// The underlying key-value backend.
    pub fn backend(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    /// Loads the persisted snapshot and envelope.
    ///
    /// Corrupt entries are treated as absent. An envelope wrapping a
    /// different identity than the snapshot is discarded.
    pub fn load(&self) -> SyncResult<Persisted> {
        let snapshot: Option<LicenseSnapshot> = self.read_json(SNAPSHOT_KEY)?;
        let mut envelope: Option<CacheEnvelope> = self.read_json(CACHE_KEY)?;

        if let (Some(s), Some(e)) = (&snapshot, &envelope) {
            let cached = e.snapshot();
            if cached.code != s.code || cached.email != s.email {
                warn!("Cache envelope belongs to a different license, ignoring it");
                envelope = None;
            }
        }

        Ok(Persisted { snapshot, envelope })
    }

    /// Writes the snapshot and the envelope wrapping it in one batch.
    pub fn save(&self, envelope: &CacheEnvelope) -> SyncResult<()> {
        let snapshot_json = serde_json::to_string(envelope.snapshot())?;
        let envelope_json = serde_json::to_string(envelope)?;
        self.kv.put_many(&[
            (SNAPSHOT_KEY, snapshot_json.as_str()),
            (CACHE_KEY, envelope_json.as_str()),
        ])
    }

    /// Deletes both keys. Idempotent.
    pub fn clear(&self) -> SyncResult<()> {
        self.kv.delete(SNAPSHOT_KEY)?;
        self.kv.delete(CACHE_KEY)?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> SyncResult<Option<T>> {
        let Some(raw) = self.kv.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Ignoring unreadable {key}: {e}");
                Ok(None)
            }
        }
    }
}
