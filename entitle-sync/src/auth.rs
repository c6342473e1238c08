//! The ambient auth subsystem the engine installs sessions into.
//!
//! The engine does not own authentication. It only needs to know who is
//! signed in, hand over a session the authority issued, and sign out when
//! the persisted license cannot be reconciled with the active identity.

use crate::error::{SyncError, SyncResult};
use crate::store::KeyValueStore;
use async_trait::async_trait;
use entitle_license::normalize_email;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Key under which `StoredAuth` keeps its session.
pub const AUTH_SESSION_KEY: &str = "auth-session";

/// An access/refresh token pair issued by the authority.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
}

impl AuthSession {
    /// Creates a session.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Host-provided authentication.
#[async_trait]
pub trait AuthSubsystem: Send + Sync {
    /// Email of the currently authenticated identity, if any.
    async fn current_identity(&self) -> Option<String>;

    /// Installs a session issued for `email`.
    async fn install_session(&self, session: &AuthSession, email: &str) -> SyncResult<()>;

    /// Signs out. Signing out while signed out is not an error.
    async fn sign_out(&self) -> SyncResult<()>;
}

#[derive(Default)]
struct MemoryAuthState {
    identity: Option<String>,
    session: Option<AuthSession>,
}

/// In-process auth subsystem.
///
/// Can be pinned to a fixed identity, in which case installs and sign-outs
/// are recorded but never change what `current_identity` reports.
#[derive(Default)]
pub struct MemoryAuth {
    state: Mutex<MemoryAuthState>,
    pinned: Option<Option<String>>,
    installs: AtomicUsize,
    sign_outs: AtomicUsize,
}

impl MemoryAuth {
    /// Signed out, follows installs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signed in as `email`, follows installs.
    pub fn signed_in(email: &str) -> Self {
        let auth = Self::default();
        if let Ok(mut state) = auth.state.lock() {
            state.identity = Some(normalize_email(email));
        }
        auth
    }

    /// Always reports `identity`, whatever is installed.
    pub fn with_fixed_identity(identity: Option<&str>) -> Self {
        Self {
            pinned: Some(identity.map(normalize_email)),
            ..Self::default()
        }
    }

    /// Number of sessions installed.
    pub fn install_count(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    /// Number of sign-outs.
    pub fn sign_out_count(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }

    /// The installed session, if any.
    pub fn session(&self) -> Option<AuthSession> {
        self.state.lock().ok().and_then(|s| s.session.clone())
    }

    fn lock(&self) -> SyncResult<std::sync::MutexGuard<'_, MemoryAuthState>> {
        self.state
            .lock()
            .map_err(|_| SyncError::Auth("auth state lock poisoned".to_string()))
    }
}

#[async_trait]
impl AuthSubsystem for MemoryAuth {
    async fn current_identity(&self) -> Option<String> {
        if let Some(pinned) = &self.pinned {
            return pinned.clone();
        }
        self.state.lock().ok().and_then(|s| s.identity.clone())
    }

    async fn install_session(&self, session: &AuthSession, email: &str) -> SyncResult<()> {
        let mut state = self.lock()?;
        state.identity = Some(normalize_email(email));
        state.session = Some(session.clone());
        self.installs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn sign_out(&self) -> SyncResult<()> {
        let mut state = self.lock()?;
        state.identity = None;
        state.session = None;
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    email: String,
    session: AuthSession,
}

/// Auth subsystem that persists its session in a key-value store.
pub struct StoredAuth {
    kv: Arc<dyn KeyValueStore>,
}

impl StoredAuth {
    /// Keeps the session in `kv` under [`AUTH_SESSION_KEY`].
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// The stored session, if any.
    pub fn session(&self) -> Option<AuthSession> {
        self.load().map(|s| s.session)
    }

    fn load(&self) -> Option<StoredSession> {
        let raw = match self.kv.get(AUTH_SESSION_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Failed to read auth session: {e}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!("Ignoring unreadable auth session: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl AuthSubsystem for StoredAuth {
    async fn current_identity(&self) -> Option<String> {
        self.load().map(|s| s.email)
    }

    async fn install_session(&self, session: &AuthSession, email: &str) -> SyncResult<()> {
        let stored = StoredSession {
            email: normalize_email(email),
            session: session.clone(),
        };
        self.kv.put(AUTH_SESSION_KEY, &serde_json::to_string(&stored)?)?;
        debug!("Installed auth session");
        Ok(())
    }

    async fn sign_out(&self) -> SyncResult<()> {
        self.kv.delete(AUTH_SESSION_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn session_debug_redacts_tokens() {
        let s = AuthSession::new("secret-access", "secret-refresh");
        let debug = format!("{s:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("redacted"));
    }

    #[tokio::test]
    async fn memory_auth_follows_installs() {
        let auth = MemoryAuth::new();
        assert_eq!(auth.current_identity().await, None);

        auth.install_session(&AuthSession::new("a", "r"), "A@B.com")
            .await
            .unwrap();
        assert_eq!(auth.current_identity().await.as_deref(), Some("a@b.com"));

        auth.sign_out().await.unwrap();
        assert_eq!(auth.current_identity().await, None);
        assert_eq!(auth.install_count(), 1);
        assert_eq!(auth.sign_out_count(), 1);
    }

    #[tokio::test]
    async fn pinned_identity_never_changes() {
        let auth = MemoryAuth::with_fixed_identity(Some("someone@else.com"));
        auth.install_session(&AuthSession::new("a", "r"), "a@b.com")
            .await
            .unwrap();
        assert_eq!(
            auth.current_identity().await.as_deref(),
            Some("someone@else.com")
        );
        auth.sign_out().await.unwrap();
        assert_eq!(
            auth.current_identity().await.as_deref(),
            Some("someone@else.com")
        );
    }

    #[tokio::test]
    async fn stored_auth_survives_reopen() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let auth = StoredAuth::new(kv.clone());
        auth.install_session(&AuthSession::new("a", "r"), "a@b.com")
            .await
            .unwrap();

        let reopened = StoredAuth::new(kv);
        assert_eq!(reopened.current_identity().await.as_deref(), Some("a@b.com"));
        assert_eq!(reopened.session(), Some(AuthSession::new("a", "r")));

        reopened.sign_out().await.unwrap();
        assert_eq!(auth.current_identity().await, None);
    }
}
