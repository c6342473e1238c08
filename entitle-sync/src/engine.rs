//! License engine: one consumer-facing mount of the shared orchestrator.
//!
//! Several mounts may exist in one process. Each keeps its own view of the
//! resident snapshot, updated either by its own operations or by the
//! broadcaster when another mount changes the license.

use crate::broadcast::{LicenseHandler, SubscriberId};
use crate::error::SyncError;
use crate::orchestrator::{SyncOrchestrator, SyncPhase};
use entitle_license::{get_limit_value, has_feature, LicenseSnapshot, PlanType};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Message shown when the authority cannot be reached.
pub const CONNECTION_ERROR_MESSAGE: &str =
    "Unable to reach the license server. Check your connection and try again.";

/// Outcome of a public operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

impl<T> From<Result<T, SyncError>> for OperationResult {
    fn from(result: Result<T, SyncError>) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(e) => Self::failed(user_message(&e)),
        }
    }
}

/// The message a user sees for `error`.
pub fn user_message(error: &SyncError) -> String {
    match error {
        SyncError::Rejected(message) => message.clone(),
        e if e.is_transport() => CONNECTION_ERROR_MESSAGE.to_string(),
        SyncError::NotLicensed => "No license is active".to_string(),
        SyncError::Superseded => "The license was cleared while the request was running".to_string(),
        other => other.to_string(),
    }
}

/// One mount of the license engine.
pub struct LicenseEngine {
    orchestrator: Arc<SyncOrchestrator>,
    id: SubscriberId,
    snapshot: Arc<RwLock<Option<LicenseSnapshot>>>,
    started: AtomicBool,
    busy: AtomicUsize,
}

impl LicenseEngine {
    /// Mounts a new engine on `orchestrator`.
    pub fn mount(orchestrator: Arc<SyncOrchestrator>) -> Self {
        let snapshot = Arc::new(RwLock::new(None));
        let view = Arc::clone(&snapshot);
        let handler: LicenseHandler = Arc::new(move |value| {
            if let Ok(mut slot) = view.write() {
                *slot = value.cloned();
            }
        });
        let id = orchestrator.broadcaster().subscribe_seeded(handler);
        debug!("Mounted license engine {id}");
        Self {
            orchestrator,
            id,
            snapshot,
            started: AtomicBool::new(false),
            busy: AtomicUsize::new(0),
        }
    }

    /// Runs process startup (once) and adopts the resident license.
    pub async fn start(&self) -> SyncPhase {
        let phase = {
            let _busy = self.busy();
            self.orchestrator.start().await
        };
        self.set_snapshot(self.orchestrator.resident());
        self.started.store(true, Ordering::SeqCst);
        phase
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    /// The license this mount currently sees.
    pub fn snapshot(&self) -> Option<LicenseSnapshot> {
        self.snapshot.read().ok().and_then(|s| s.clone())
    }

    pub fn is_licensed(&self) -> bool {
        self.snapshot.read().map(|s| s.is_some()).unwrap_or(false)
    }

    /// True before `start` completes and while this mount or the
    /// orchestrator is talking to the authority.
    pub fn is_loading(&self) -> bool {
        !self.started.load(Ordering::SeqCst)
            || self.busy.load(Ordering::SeqCst) > 0
            || matches!(
                self.orchestrator.phase(),
                SyncPhase::OnlineChecking | SyncPhase::Reconciling
            )
    }

    /// Plan of the resident license, `Start` when unlicensed.
    pub fn plan_type(&self) -> PlanType {
        self.with_snapshot(|s| s.plan_type).unwrap_or_default()
    }

    /// Whether `feature_key` is enabled. Always false when unlicensed.
    pub fn has_feature(&self, feature_key: &str) -> bool {
        self.with_snapshot(|s| has_feature(s, feature_key))
            .unwrap_or(false)
    }

    pub fn get_limit_value(&self, limit_name: &str) -> Option<i64> {
        self.with_snapshot(|s| get_limit_value(s, limit_name)).flatten()
    }

    pub fn is_offline(&self) -> bool {
        self.orchestrator.is_offline()
    }

    /// Activates a license. Never panics or propagates errors.
    pub async fn validate_license(&self, code: &str, email: &str) -> OperationResult {
        let result = {
            let _busy = self.busy();
            self.orchestrator.validate_license(Some(self.id), code, email).await
        };
        self.absorb(result)
    }

    /// Removes the license. Idempotent.
    pub async fn clear_license(&self) -> OperationResult {
        let result = self.orchestrator.clear_license(Some(self.id)).await;
        // Local state is gone even if sign-out or storage complained.
        self.set_snapshot(None);
        result.into()
    }

    /// Forces a check with the authority.
    pub async fn refresh_license(&self) -> OperationResult {
        let result = {
            let _busy = self.busy();
            self.orchestrator.refresh_license(Some(self.id)).await
        };
        self.absorb(result)
    }

    /// Applies an operation's result to this mount. Other mounts were told
    /// through the broadcaster.
    fn absorb(&self, result: Result<LicenseSnapshot, SyncError>) -> OperationResult {
        match &result {
            Ok(snapshot) => self.set_snapshot(Some(snapshot.clone())),
            Err(SyncError::Rejected(_)) | Err(SyncError::NotLicensed) => {
                self.set_snapshot(self.orchestrator.resident());
            }
            Err(_) => {}
        }
        result.into()
    }

    fn with_snapshot<T>(&self, f: impl FnOnce(&LicenseSnapshot) -> T) -> Option<T> {
        self.snapshot.read().ok()?.as_ref().map(f)
    }

    fn set_snapshot(&self, value: Option<LicenseSnapshot>) {
        if let Ok(mut slot) = self.snapshot.write() {
            *slot = value;
        }
    }

    fn busy(&self) -> BusyToken<'_> {
        self.busy.fetch_add(1, Ordering::SeqCst);
        BusyToken(&self.busy)
    }
}

impl Drop for LicenseEngine {
    fn drop(&mut self) {
        self.orchestrator.broadcaster().unsubscribe(self.id);
        debug!("Unmounted license engine {}", self.id);
    }
}

struct BusyToken<'a>(&'a AtomicUsize);

impl Drop for BusyToken<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
