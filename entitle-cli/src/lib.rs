//! Configuration and wiring for the `entitle` command-line host.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use entitle_license::PlanType;
use entitle_sync::{
    AuthorityConfig, EngineConfig, HttpAuthority, KeyValueStore, LicenseEngine, LicenseStore,
    ManualConnectivity, SqliteStore, StoredAuth, SyncOrchestrator,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// File name of the default store.
pub const STORE_FILE_NAME: &str = "license.db";

/// Contents of the `--config` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub engine: EngineConfig,
    pub authority: AuthorityConfig,
    /// Where the SQLite store lives. Defaults to the platform data dir.
    pub store_path: Option<PathBuf>,
}

impl CliConfig {
    /// Loads the config at `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Applies command-line overrides.
    pub fn with_overrides(mut self, store: Option<PathBuf>, endpoint: Option<String>) -> Self {
        if store.is_some() {
            self.store_path = store;
        }
        if let Some(endpoint) = endpoint {
            self.authority.endpoint_url = endpoint;
        }
        self
    }

    /// The store path to open.
    pub fn resolve_store_path(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => default_store_path_for(&self.engine.namespace)
                .context("No data directory available, pass --store"),
        }
    }
}

/// `<data_dir>/<namespace>/license.db`, when the platform has a data dir.
pub fn default_store_path_for(namespace: &str) -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(namespace).join(STORE_FILE_NAME))
}

/// A wired engine plus the store it reads from.
pub struct Host {
    pub engine: LicenseEngine,
    pub store: LicenseStore,
}

impl Host {
    /// Opens the store and wires an engine against the configured authority.
    pub fn open(config: &CliConfig, online: bool) -> Result<Self> {
        let path = config.resolve_store_path()?;
        let kv: Arc<dyn KeyValueStore> = Arc::new(
            SqliteStore::open(&path, &config.engine.namespace)
                .with_context(|| format!("Failed to open store {}", path.display()))?,
        );
        debug!("Using store {}", path.display());

        let store = LicenseStore::new(Arc::clone(&kv));
        let authority = HttpAuthority::new(config.authority.clone())
            .context("Failed to create authority client")?;
        let orchestrator = Arc::new(SyncOrchestrator::new(
            config.engine.clone(),
            store.clone(),
            Arc::new(authority),
            Arc::new(StoredAuth::new(kv)),
            Arc::new(ManualConnectivity::new(online)),
        ));

        Ok(Self {
            engine: LicenseEngine::mount(orchestrator),
            store,
        })
    }
}

/// What `entitle status` prints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub licensed: bool,
    pub phase: String,
    pub offline: bool,
    pub plan_type: PlanType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_validated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StatusReport {
    /// Reads the engine's view and the persisted envelope.
    pub fn collect(host: &Host) -> Result<Self> {
        let engine = &host.engine;
        let snapshot = engine.snapshot();
        let envelope = host
            .store
            .load()
            .context("Failed to read persisted license")?
            .envelope;

        Ok(Self {
            licensed: snapshot.is_some(),
            phase: engine.orchestrator().phase().to_string(),
            offline: engine.is_offline(),
            plan_type: engine.plan_type(),
            code: snapshot.as_ref().map(|s| s.code.clone()),
            email: snapshot.as_ref().map(|s| s.email.clone()),
            last_validated: envelope.as_ref().map(|e| e.last_validated()),
            expires_at: envelope.as_ref().map(|e| e.expires_at()),
        })
    }
}
