//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the sync orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Namespace the persisted keys live under.
    pub namespace: String,
    /// Upper bound on a single authority call (ms).
    pub request_timeout_ms: u64,
    /// Delay before the reconcile guard is re-armed after a successful
    /// reconciliation (ms).
    pub reconcile_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: "entitle".to_string(),
            request_timeout_ms: 8_000,
            reconcile_grace_ms: 2_000,
        }
    }
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconcile_grace(&self) -> Duration {
        Duration::from_millis(self.reconcile_grace_ms)
    }
}
