//! Sync orchestrator: the license state machine.
//!
//! One orchestrator exists per process and is shared by every engine mount.
//! It owns the I/O seams (store, authority, auth, connectivity), the
//! broadcaster, and the guards that keep overlapping triggers from racing.
//!
//! ## Startup
//!
//! 1. Load the persisted snapshot `S` and envelope `E`. Nothing → `Unlicensed`.
//! 2. Offline: serve `E` if usable, else keep `S` without deleting anything.
//! 3. Online: if the authenticated identity differs from `S.email`,
//!    reconcile under the process-wide guard. Otherwise skip the network if
//!    `E` is fresh, or run a `check`.
//!
//! ## Invariants
//!
//! - Store writes and the matching broadcast happen under one lock, with no
//!   suspension point between them.
//! - A network result obtained before `clear_license` is discarded.
//! - Transport failures never delete persisted data.

use crate::auth::{AuthSession, AuthSubsystem};
use crate::authority::{AuthorityAction, AuthorityResponse, RemoteAuthority};
use crate::broadcast::{Broadcaster, SubscriberId};
use crate::config::EngineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::guard::{Flight, ReconcileGuard, ReconcilePermit, SingleFlight};
use crate::store::{LicenseStore, Persisted};
use chrono::Utc;
use entitle_license::{normalize_code, normalize_email, CacheEnvelope, LicenseSnapshot};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Message used when the authority rejects without saying why.
pub const GENERIC_REJECTION_MESSAGE: &str = "License validation failed";

/// Where the license state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Startup has not run.
    Uninitialized,
    /// Serving a cached snapshot while offline.
    OfflineCached,
    /// A `check` is in flight.
    OnlineChecking,
    /// Re-authenticating after an identity mismatch.
    Reconciling,
    /// A snapshot is resident.
    Licensed,
    /// No snapshot is resident.
    Unlicensed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::OfflineCached => "offline-cached",
            Self::OnlineChecking => "online-checking",
            Self::Reconciling => "reconciling",
            Self::Licensed => "licensed",
            Self::Unlicensed => "unlicensed",
        };
        f.write_str(name)
    }
}

/// Result of a `check` round.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// The authority confirmed the license; the merged snapshot was stored.
    Confirmed(LicenseSnapshot),
    /// The authority reported the license invalid; local state was deleted.
    Revoked(Option<String>),
    /// The authority could not be reached; local state was kept.
    Unreachable(String),
    /// Another passive check was already running.
    Skipped,
    /// The license was cleared while the check was in flight.
    Superseded,
    /// The result could not be persisted.
    Failed(String),
}

/// The process-wide license state machine.
pub struct SyncOrchestrator {
    config: EngineConfig,
    store: LicenseStore,
    authority: Arc<dyn RemoteAuthority>,
    auth: Arc<dyn AuthSubsystem>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    broadcaster: Broadcaster,
    reconcile_guard: Arc<ReconcileGuard>,
    check_flight: SingleFlight<CheckOutcome>,
    startup: OnceCell<SyncPhase>,
    phase: watch::Sender<SyncPhase>,
    epoch: AtomicU64,
    commit_lock: Mutex<()>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator with its own reconcile guard.
    pub fn new(
        config: EngineConfig,
        store: LicenseStore,
        authority: Arc<dyn RemoteAuthority>,
        auth: Arc<dyn AuthSubsystem>,
        connectivity: Arc<dyn ConnectivityMonitor>,
    ) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Uninitialized);
        Self {
            config,
            store,
            authority,
            auth,
            connectivity,
            broadcaster: Broadcaster::new(),
            reconcile_guard: Arc::new(ReconcileGuard::new()),
            check_flight: SingleFlight::new(),
            startup: OnceCell::new(),
            phase,
            epoch: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
        }
    }

    /// Replaces the reconcile guard, e.g. to observe it from a test.
    #[must_use]
    pub fn with_reconcile_guard(mut self, guard: Arc<ReconcileGuard>) -> Self {
        self.reconcile_guard = guard;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn reconcile_guard(&self) -> &Arc<ReconcileGuard> {
        &self.reconcile_guard
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    /// Subscribes to phase transitions.
    pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    /// True if the connectivity monitor reports offline.
    pub fn is_offline(&self) -> bool {
        !self.connectivity.is_online()
    }

    /// True once startup has completed.
    pub fn is_started(&self) -> bool {
        self.startup.initialized()
    }

    /// The snapshot resident in this process.
    pub fn resident(&self) -> Option<LicenseSnapshot> {
        self.broadcaster.resident()
    }

    // ── Startup ──────────────────────────────────────────────────

    /// Runs startup once per orchestrator. Concurrent and later callers get
    /// the phase the first run reached.
    pub async fn start(&self) -> SyncPhase {
        *self.startup.get_or_init(|| self.run_startup()).await
    }

    async fn run_startup(&self) -> SyncPhase {
        let persisted = self.load_persisted();
        let Some(snapshot) = persisted.resident().cloned() else {
            info!("No persisted license");
            self.set_phase(SyncPhase::Unlicensed);
            return SyncPhase::Unlicensed;
        };

        if self.is_offline() {
            return self.serve_offline(snapshot, persisted.envelope.as_ref());
        }

        self.revalidate(snapshot, persisted.envelope).await
    }

    fn serve_offline(&self, snapshot: LicenseSnapshot, envelope: Option<&CacheEnvelope>) -> SyncPhase {
        let now = Utc::now();
        match envelope {
            Some(env) if env.is_usable_offline(now) => {
                info!("Offline, serving cached license until {}", env.expires_at());
                self.adopt(env.snapshot());
                self.set_phase(SyncPhase::OfflineCached);
                SyncPhase::OfflineCached
            }
            _ => {
                // Offline is not a verdict on the license; keep it.
                warn!("Offline with no usable cache, keeping persisted license");
                self.adopt(&snapshot);
                self.set_phase(SyncPhase::Licensed);
                SyncPhase::Licensed
            }
        }
    }

    /// Passive revalidation: identity reconciliation, else a throttled check.
    async fn revalidate(&self, snapshot: LicenseSnapshot, envelope: Option<CacheEnvelope>) -> SyncPhase {
        let identity = self.authenticated_email().await;
        if identity.as_deref() != Some(snapshot.email.as_str()) {
            debug!(
                "Authenticated identity {:?} does not match license email {}",
                identity, snapshot.email
            );
            let Some(permit) = self.reconcile_guard.try_acquire() else {
                debug!("Reconciliation already in flight, adopting resident license");
                let resident = self.resident().unwrap_or(snapshot);
                self.adopt(&resident);
                return self.settle_phase();
            };
            return match self.reconcile(permit, snapshot, envelope, None).await {
                Ok(_) => SyncPhase::Licensed,
                Err(e) => {
                    warn!("Reconciliation failed: {e}");
                    self.settle_phase()
                }
            };
        }

        if let Some(env) = envelope.as_ref().filter(|e| e.is_fresh(Utc::now())) {
            debug!("License validated at {}, skipping check", env.last_validated());
            self.adopt(env.snapshot());
            self.set_phase(SyncPhase::Licensed);
            return SyncPhase::Licensed;
        }

        match self.check(None, snapshot, envelope, false).await {
            CheckOutcome::Unreachable(e) => {
                warn!("Background license check failed: {e}");
            }
            CheckOutcome::Failed(e) => {
                warn!("Background license check could not be saved: {e}");
            }
            _ => {}
        }
        self.settle_phase()
    }

    /// Re-authenticates after an identity mismatch. Must hold the guard.
    async fn reconcile(
        &self,
        permit: ReconcilePermit,
        snapshot: LicenseSnapshot,
        envelope: Option<CacheEnvelope>,
        origin: Option<SubscriberId>,
    ) -> SyncResult<LicenseSnapshot> {
        info!("Reconciling license identity");
        self.set_phase(SyncPhase::Reconciling);
        let epoch = self.current_epoch();

        if let Err(e) = self.auth.sign_out().await {
            warn!("Sign-out before reconciliation failed: {e}");
        }

        let response = match self
            .call_authority(AuthorityAction::Validate, &snapshot.code, &snapshot.email)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                // Transport failures are advisory; keep what we have.
                warn!("Reconciliation could not reach the authority: {e}");
                drop(permit);
                let now = Utc::now();
                let usable = envelope.as_ref().is_some_and(|env| env.is_usable_offline(now));
                self.adopt(&snapshot);
                self.set_phase(if usable {
                    SyncPhase::OfflineCached
                } else {
                    SyncPhase::Licensed
                });
                return Err(e);
            }
        };

        let result = self.finish_reconcile(&snapshot, response, epoch, origin).await;
        match result {
            Ok(refreshed) => {
                self.set_phase(SyncPhase::Licensed);
                permit.release_after(self.config.reconcile_grace());
                info!("License identity reconciled");
                Ok(refreshed)
            }
            Err(SyncError::Superseded) => {
                debug!("Reconciliation result discarded, license was cleared");
                Err(SyncError::Superseded)
            }
            Err(e) => {
                warn!("Reconciliation rejected: {e}");
                if let Err(clear_err) = self.commit_clear(origin, epoch) {
                    warn!("Failed to clear rejected license: {clear_err}");
                }
                self.set_phase(SyncPhase::Unlicensed);
                Err(e)
            }
        }
    }

    async fn finish_reconcile(
        &self,
        snapshot: &LicenseSnapshot,
        response: AuthorityResponse,
        epoch: u64,
        origin: Option<SubscriberId>,
    ) -> SyncResult<LicenseSnapshot> {
        if !response.is_accepted() {
            return Err(rejection(response.error));
        }

        let (patch, session) = response.into_patch();
        let refreshed =
            LicenseSnapshot::from_activation(&snapshot.code, &snapshot.email, Utc::now(), patch)?;
        if refreshed.email != snapshot.email {
            return Err(SyncError::Auth(
                "authority answered for a different identity".to_string(),
            ));
        }

        let installed = match session {
            Some(session) => {
                self.install_session(&session, &refreshed.email, epoch).await?;
                true
            }
            None => false,
        };
        if installed && self.current_epoch() != epoch {
            self.undo_install().await;
            return Err(SyncError::Superseded);
        }

        // The loop stops here if the auth backend never reports our identity.
        if self.authenticated_email().await.as_deref() != Some(refreshed.email.as_str()) {
            return Err(SyncError::Auth(
                "authenticated identity could not be reconciled".to_string(),
            ));
        }

        let envelope = CacheEnvelope::wrap(refreshed.clone(), Utc::now());
        let committed = self.commit(origin, &envelope, epoch);
        if installed && matches!(committed, Err(SyncError::Superseded)) {
            self.undo_install().await;
        }
        committed.map(|()| refreshed)
    }

    // ── Check ────────────────────────────────────────────────────

    /// Runs a `check`, de-duplicated across callers.
    ///
    /// A passive caller finding a check in flight gets `Skipped`; a forced
    /// caller waits for and shares the running check's outcome.
    async fn check(
        &self,
        origin: Option<SubscriberId>,
        snapshot: LicenseSnapshot,
        envelope: Option<CacheEnvelope>,
        forced: bool,
    ) -> CheckOutcome {
        match self.check_flight.join_or_lead() {
            Flight::Follower(follower) if forced => {
                debug!("Check in flight, waiting for its result");
                follower.wait().await.unwrap_or_else(|e| CheckOutcome::Failed(e.to_string()))
            }
            Flight::Follower(_) => {
                debug!("Check in flight, skipping");
                CheckOutcome::Skipped
            }
            Flight::Leader(leader) => {
                let outcome = self.perform_check(origin, snapshot, envelope).await;
                leader.finish(outcome.clone());
                outcome
            }
        }
    }

    async fn perform_check(
        &self,
        origin: Option<SubscriberId>,
        snapshot: LicenseSnapshot,
        envelope: Option<CacheEnvelope>,
    ) -> CheckOutcome {
        self.set_phase(SyncPhase::OnlineChecking);
        let epoch = self.current_epoch();

        let response = match self
            .call_authority(AuthorityAction::Check, &snapshot.code, &snapshot.email)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let now = Utc::now();
                match envelope.as_ref().filter(|env| env.is_usable_offline(now)) {
                    Some(env) => {
                        self.adopt(env.snapshot());
                        self.set_phase(SyncPhase::OfflineCached);
                    }
                    None => {
                        self.adopt(&snapshot);
                        self.set_phase(SyncPhase::Licensed);
                    }
                }
                return CheckOutcome::Unreachable(e.to_string());
            }
        };

        if !response.is_accepted() {
            info!("License reported invalid, removing it");
            return match self.commit_clear(origin, epoch) {
                Ok(()) => {
                    self.set_phase(SyncPhase::Unlicensed);
                    CheckOutcome::Revoked(response.error)
                }
                Err(SyncError::Superseded) => CheckOutcome::Superseded,
                Err(e) => CheckOutcome::Failed(e.to_string()),
            };
        }

        let (patch, _) = response.into_patch();
        let mut merged = snapshot;
        merged.apply_patch(patch);
        let envelope = CacheEnvelope::wrap(merged.clone(), Utc::now());

        match self.commit(origin, &envelope, epoch) {
            Ok(()) => {
                debug!("License confirmed, plan={}", merged.plan_type);
                self.set_phase(SyncPhase::Licensed);
                CheckOutcome::Confirmed(merged)
            }
            Err(SyncError::Superseded) => CheckOutcome::Superseded,
            Err(e) => {
                warn!("Failed to persist confirmed license: {e}");
                self.settle_phase();
                CheckOutcome::Failed(e.to_string())
            }
        }
    }

    // ── Explicit operations ──────────────────────────────────────

    /// Activates `code` for `email`.
    ///
    /// A rejection only deletes local state if it concerns the license
    /// already stored.
    pub async fn validate_license(
        &self,
        origin: Option<SubscriberId>,
        code: &str,
        email: &str,
    ) -> SyncResult<LicenseSnapshot> {
        let code = normalize_code(code);
        let email = normalize_email(email);
        if code.is_empty() || email.is_empty() {
            return Err(SyncError::Rejected(
                "License code and email are required".to_string(),
            ));
        }

        info!("Validating license {code}");
        let epoch = self.current_epoch();
        let response = self
            .call_authority(AuthorityAction::Validate, &code, &email)
            .await?;

        if !response.is_accepted() {
            let same_license = self
                .load_persisted()
                .resident()
                .is_some_and(|s| s.code == code && s.email == email);
            if same_license {
                self.commit_clear(origin, epoch)?;
                self.set_phase(SyncPhase::Unlicensed);
            }
            return Err(rejection(response.error));
        }

        let (patch, session) = response.into_patch();
        let snapshot = LicenseSnapshot::from_activation(&code, &email, Utc::now(), patch)?;

        let installed = match session {
            Some(session) => {
                self.install_session(&session, &snapshot.email, epoch).await?;
                true
            }
            None => false,
        };

        let envelope = CacheEnvelope::wrap(snapshot.clone(), Utc::now());
        let committed = self.commit(origin, &envelope, epoch);
        if installed && matches!(committed, Err(SyncError::Superseded)) {
            self.undo_install().await;
        }
        committed?;
        self.set_phase(SyncPhase::Licensed);
        info!("License {} activated on plan {}", snapshot.code, snapshot.plan_type);
        Ok(snapshot)
    }

    /// Deletes the license, signs out and tells every mount. Idempotent.
    pub async fn clear_license(&self, origin: Option<SubscriberId>) -> SyncResult<()> {
        {
            let _commit = self.lock_commit();
            self.epoch.fetch_add(1, Ordering::SeqCst);
            self.store.clear()?;
            self.broadcaster.publish(origin, None);
        }
        if let Err(e) = self.auth.sign_out().await {
            warn!("Sign-out during clear failed: {e}");
        }
        self.set_phase(SyncPhase::Unlicensed);
        info!("License cleared");
        Ok(())
    }

    /// Forces a `check`, ignoring the throttle. Network errors are returned
    /// rather than masked by the cache.
    pub async fn refresh_license(&self, origin: Option<SubscriberId>) -> SyncResult<LicenseSnapshot> {
        if self.reconcile_guard.is_held() {
            debug!("Reconciliation in flight, waiting for it instead of checking");
            self.reconcile_guard.wait_released().await;
            return self.resident().ok_or(SyncError::NotLicensed);
        }

        let persisted = self.load_persisted();
        let Some(snapshot) = persisted.resident().cloned().or_else(|| self.resident()) else {
            return Err(SyncError::NotLicensed);
        };

        if self.is_offline() {
            return Err(SyncError::Network("device is offline".to_string()));
        }

        match self.check(origin, snapshot, persisted.envelope, true).await {
            CheckOutcome::Confirmed(snapshot) => Ok(snapshot),
            CheckOutcome::Revoked(message) => Err(rejection(message)),
            CheckOutcome::Unreachable(message) => Err(SyncError::Network(message)),
            CheckOutcome::Superseded => Err(SyncError::Superseded),
            CheckOutcome::Failed(message) => Err(SyncError::Storage(message)),
            CheckOutcome::Skipped => self.resident().ok_or(SyncError::NotLicensed),
        }
    }

    /// Passive revalidation after connectivity returns. Errors are logged.
    pub async fn on_connectivity_restored(&self) {
        if !self.is_started() {
            return;
        }
        let persisted = self.load_persisted();
        let Some(snapshot) = persisted.resident().cloned() else {
            return;
        };
        info!("Connectivity restored, revalidating license");
        let phase = self.revalidate(snapshot, persisted.envelope).await;
        debug!("Revalidation finished in phase {phase}");
    }

    /// Spawns a task that revalidates on every offline→online transition.
    pub fn watch_connectivity(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let mut rx = self.connectivity.subscribe();
        tokio::spawn(async move {
            let mut was_online = *rx.borrow_and_update();
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if online && !was_online {
                    orchestrator.on_connectivity_restored().await;
                }
                was_online = online;
            }
        })
    }

    // ── Internals ────────────────────────────────────────────────

    async fn call_authority(
        &self,
        action: AuthorityAction,
        code: &str,
        email: &str,
    ) -> SyncResult<AuthorityResponse> {
        let timeout = self.config.request_timeout();
        match tokio::time::timeout(timeout, self.authority.call(action, code, email)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("License authority {action} timed out after {timeout:?}");
                Err(SyncError::Timeout)
            }
        }
    }

    /// Installs `session` unless the license was cleared since `epoch`.
    async fn install_session(&self, session: &AuthSession, email: &str, epoch: u64) -> SyncResult<()> {
        if self.current_epoch() != epoch {
            debug!("License cleared during the request, not installing its session");
            return Err(SyncError::Superseded);
        }
        self.auth.install_session(session, email).await
    }

    /// Signs out a session installed for a result that `clear_license`
    /// has since discarded.
    async fn undo_install(&self) {
        warn!("License cleared while its session was installed, signing out");
        if let Err(e) = self.auth.sign_out().await {
            warn!("Sign-out after a discarded result failed: {e}");
        }
    }

    async fn authenticated_email(&self) -> Option<String> {
        self.auth
            .current_identity()
            .await
            .map(|email| normalize_email(&email))
    }

    fn load_persisted(&self) -> Persisted {
        self.store.load().unwrap_or_else(|e| {
            warn!("Failed to read persisted license: {e}");
            Persisted::default()
        })
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn lock_commit(&self) -> std::sync::MutexGuard<'_, ()> {
        match self.commit_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Writes `envelope` and broadcasts it, unless the license was cleared
    /// since `epoch`.
    fn commit(
        &self,
        origin: Option<SubscriberId>,
        envelope: &CacheEnvelope,
        epoch: u64,
    ) -> SyncResult<()> {
        let _commit = self.lock_commit();
        if self.current_epoch() != epoch {
            return Err(SyncError::Superseded);
        }
        self.store.save(envelope)?;
        self.broadcaster.publish(origin, Some(envelope.snapshot()));
        Ok(())
    }

    /// Deletes persisted state and broadcasts the invalidation, unless the
    /// license was cleared since `epoch`.
    fn commit_clear(&self, origin: Option<SubscriberId>, epoch: u64) -> SyncResult<()> {
        let _commit = self.lock_commit();
        if self.current_epoch() != epoch {
            return Err(SyncError::Superseded);
        }
        self.store.clear()?;
        self.broadcaster.publish(origin, None);
        Ok(())
    }

    /// Makes `snapshot` resident without touching the store.
    fn adopt(&self, snapshot: &LicenseSnapshot) {
        let _commit = self.lock_commit();
        if self.broadcaster.resident().as_ref() != Some(snapshot) {
            self.broadcaster.publish(None, Some(snapshot));
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!("License phase {previous} -> {phase}");
        }
    }

    /// Settles on `Licensed` or `Unlicensed` from the resident value,
    /// leaving a phase owned by a running check or reconciliation alone.
    fn settle_phase(&self) -> SyncPhase {
        let current = self.phase();
        let busy = match current {
            SyncPhase::Reconciling => self.reconcile_guard.is_held(),
            SyncPhase::OnlineChecking => self.check_flight.in_flight(),
            _ => false,
        };
        if busy {
            return current;
        }
        let phase = match (current, self.resident().is_some()) {
            (SyncPhase::OfflineCached, true) => SyncPhase::OfflineCached,
            (_, true) => SyncPhase::Licensed,
            (_, false) => SyncPhase::Unlicensed,
        };
        self.set_phase(phase);
        phase
    }
}

fn rejection(message: Option<String>) -> SyncError {
    SyncError::Rejected(
        message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| GENERIC_REJECTION_MESSAGE.to_string()),
    )
}
