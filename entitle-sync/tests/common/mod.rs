//! Shared test helpers for sync tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use entitle_license::{CacheEnvelope, LicenseDataPatch, LicenseSnapshot, PlanType};
use entitle_sync::{
    AuthSession, AuthSubsystem, AuthorityAction, AuthorityResponse, EngineConfig, LicenseEngine,
    LicenseStore, ManualConnectivity, MemoryAuth, MemoryStore, ReconcileGuard, RemoteAuthority,
    SyncError, SyncOrchestrator, SyncResult,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// What the stub answers.
#[derive(Clone)]
pub enum Reply {
    Respond(AuthorityResponse),
    NetworkError,
}

/// Scripted authority that counts calls.
pub struct StubAuthority {
    validate: Mutex<Reply>,
    check: Mutex<Reply>,
    delay: Mutex<Option<Duration>>,
    gate: Mutex<Option<Arc<Notify>>>,
    validate_calls: AtomicUsize,
    check_calls: AtomicUsize,
}

impl StubAuthority {
    pub fn new() -> Self {
        Self {
            validate: Mutex::new(Reply::NetworkError),
            check: Mutex::new(Reply::NetworkError),
            delay: Mutex::new(None),
            gate: Mutex::new(None),
            validate_calls: AtomicUsize::new(0),
            check_calls: AtomicUsize::new(0),
        }
    }

    pub fn on_validate(&self, reply: Reply) {
        *self.validate.lock().unwrap() = reply;
    }

    pub fn on_check(&self, reply: Reply) {
        *self.check.lock().unwrap() = reply;
    }

    /// Makes every call sleep first.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Makes every call wait for the returned gate to be notified.
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn validate_calls(&self) -> usize {
        self.validate_calls.load(Ordering::SeqCst)
    }

    pub fn check_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.validate_calls() + self.check_calls()
    }
}

#[async_trait]
impl RemoteAuthority for StubAuthority {
    async fn call(
        &self,
        action: AuthorityAction,
        _code: &str,
        _email: &str,
    ) -> SyncResult<AuthorityResponse> {
        let reply = match action {
            AuthorityAction::Validate => {
                self.validate_calls.fetch_add(1, Ordering::SeqCst);
                self.validate.lock().unwrap().clone()
            }
            AuthorityAction::Check => {
                self.check_calls.fetch_add(1, Ordering::SeqCst);
                self.check.lock().unwrap().clone()
            }
        };

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Reply::Respond(response) => Ok(response),
            Reply::NetworkError => Err(SyncError::Network("connection refused".into())),
        }
    }
}

/// A validate answer for the given identity and plan, with a session.
pub fn accepted(code: &str, email: &str, plan: PlanType) -> Reply {
    let mut response = AuthorityResponse::accepted(LicenseDataPatch {
        code: Some(code.into()),
        email: Some(email.into()),
        plan_type: Some(plan),
        activated_at: Some(Utc::now() - ChronoDuration::days(3)),
        ..Default::default()
    });
    response.session = Some(AuthSession::new("access-token", "refresh-token"));
    Reply::Respond(response)
}

/// A check answer with the given patch.
pub fn valid(patch: LicenseDataPatch) -> Reply {
    Reply::Respond(AuthorityResponse::valid(patch))
}

pub fn rejected(message: Option<&str>) -> Reply {
    Reply::Respond(AuthorityResponse::rejected(message))
}

pub fn snapshot(plan: PlanType) -> LicenseSnapshot {
    LicenseSnapshot::new("PRO-1", "a@b.com", plan, Utc::now() - ChronoDuration::days(10))
}

/// Auth that parks inside `install_session` until released, then installs.
pub struct GatedAuth {
    pub inner: MemoryAuth,
    pub gate: Arc<Notify>,
    entered: AtomicBool,
}

impl GatedAuth {
    pub fn new(inner: MemoryAuth) -> Self {
        Self {
            inner,
            gate: Arc::new(Notify::new()),
            entered: AtomicBool::new(false),
        }
    }

    /// True once an install is waiting on the gate.
    pub fn entered(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthSubsystem for GatedAuth {
    async fn current_identity(&self) -> Option<String> {
        self.inner.current_identity().await
    }

    async fn install_session(&self, session: &AuthSession, email: &str) -> SyncResult<()> {
        self.entered.store(true, Ordering::SeqCst);
        self.gate.notified().await;
        self.inner.install_session(session, email).await
    }

    async fn sign_out(&self) -> SyncResult<()> {
        self.inner.sign_out().await
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        reconcile_grace_ms: 0,
        ..Default::default()
    }
}

/// Everything an orchestrator needs, with handles kept for assertions.
pub struct Harness {
    pub kv: Arc<MemoryStore>,
    pub store: LicenseStore,
    pub authority: Arc<StubAuthority>,
    pub auth: Arc<MemoryAuth>,
    pub connectivity: Arc<ManualConnectivity>,
    pub guard: Arc<ReconcileGuard>,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl Harness {
    /// Online, signed in as `a@b.com`.
    pub fn online() -> Self {
        Self::build(true, MemoryAuth::signed_in("a@b.com"), test_config())
    }

    /// Offline, signed in as `a@b.com`.
    pub fn offline() -> Self {
        Self::build(false, MemoryAuth::signed_in("a@b.com"), test_config())
    }

    pub fn build(online: bool, auth: MemoryAuth, config: EngineConfig) -> Self {
        let kv = Arc::new(MemoryStore::new());
        let store = LicenseStore::new(kv.clone());
        let authority = Arc::new(StubAuthority::new());
        let auth = Arc::new(auth);
        let connectivity = Arc::new(ManualConnectivity::new(online));
        let guard = Arc::new(ReconcileGuard::new());
        let orchestrator = Arc::new(
            SyncOrchestrator::new(
                config,
                store.clone(),
                authority.clone(),
                auth.clone(),
                connectivity.clone(),
            )
            .with_reconcile_guard(guard.clone()),
        );
        Self {
            kv,
            store,
            authority,
            auth,
            connectivity,
            guard,
            orchestrator,
        }
    }

    pub fn mount(&self) -> LicenseEngine {
        LicenseEngine::mount(self.orchestrator.clone())
    }

    /// Persists `snapshot` as validated at `validated_at`.
    pub fn seed(&self, snapshot: LicenseSnapshot, validated_at: DateTime<Utc>) {
        self.store
            .save(&CacheEnvelope::wrap(snapshot, validated_at))
            .unwrap();
    }

    /// Persists `snapshot` as validated `ago` in the past.
    pub fn seed_ago(&self, snapshot: LicenseSnapshot, ago: ChronoDuration) {
        self.seed(snapshot, Utc::now() - ago);
    }
}

/// Polls `cond` until it holds, failing after a few seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
