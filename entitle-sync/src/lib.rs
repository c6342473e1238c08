//! Offline-cache synchronization engine for license entitlements.
//!
//! Given a license code and an email, the engine decides which features a
//! user may access, keeps that decision available offline for a bounded
//! period, and reconciles it with the remote authority when connectivity
//! returns.
//!
//! # Architecture
//!
//! - **Store**: durable key-value storage for the snapshot and its envelope
//! - **Connectivity**: push-based online/offline state
//! - **Authority**: the remote `validate`/`check` endpoint
//! - **Auth**: the host's authentication, where sessions get installed
//! - **Broadcast**: fans the resident snapshot out to every mount
//! - **Orchestrator**: the state machine tying these together
//! - **Engine**: a consumer-facing mount of the orchestrator
//!
//! # Example
//!
//! ```
//! use entitle_sync::{
//!     EngineConfig, HttpAuthority, AuthorityConfig, LicenseEngine, LicenseStore,
//!     ManualConnectivity, MemoryAuth, MemoryStore, SyncOrchestrator,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), entitle_sync::SyncError> {
//! let orchestrator = Arc::new(SyncOrchestrator::new(
//!     EngineConfig::default(),
//!     LicenseStore::new(Arc::new(MemoryStore::new())),
//!     Arc::new(HttpAuthority::new(AuthorityConfig::default())?),
//!     Arc::new(MemoryAuth::new()),
//!     Arc::new(ManualConnectivity::new(false)),
//! ));
//!
//! let engine = LicenseEngine::mount(orchestrator);
//! assert!(!engine.is_licensed());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod authority;
pub mod broadcast;
mod config;
pub mod connectivity;
mod engine;
mod error;
pub mod guard;
mod orchestrator;
pub mod store;

pub use auth::{AuthSession, AuthSubsystem, MemoryAuth, StoredAuth};
pub use authority::{
    AuthorityAction, AuthorityConfig, AuthorityRequest, AuthorityResponse, HttpAuthority,
    RemoteAuthority,
};
pub use broadcast::{Broadcaster, LicenseHandler, SubscriberId};
pub use config::EngineConfig;
pub use connectivity::{ConnectivityMonitor, ManualConnectivity};
pub use engine::{user_message, LicenseEngine, OperationResult, CONNECTION_ERROR_MESSAGE};
pub use error::{SyncError, SyncResult};
pub use guard::{ReconcileGuard, ReconcilePermit, SingleFlight};
pub use orchestrator::{CheckOutcome, SyncOrchestrator, SyncPhase, GENERIC_REJECTION_MESSAGE};
pub use store::{KeyValueStore, LicenseStore, MemoryStore, SqliteStore};
