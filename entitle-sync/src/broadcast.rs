//! Fan-out of the authoritative snapshot to every engine mount in the
//! process.
//!
//! The broadcaster also keeps the last published value, so a mount created
//! after startup adopts it instead of running startup again.

use entitle_license::LicenseSnapshot;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Callback invoked with a newly published snapshot, or `None` when the
/// license was invalidated.
pub type LicenseHandler = Arc<dyn Fn(Option<&LicenseSnapshot>) + Send + Sync>;

/// Identifies one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
struct BroadcasterState {
    handlers: HashMap<SubscriberId, LicenseHandler>,
    resident: Option<LicenseSnapshot>,
}

/// In-process snapshot broadcaster.
#[derive(Default)]
pub struct Broadcaster {
    state: RwLock<BroadcasterState>,
}

impl Broadcaster {
    /// Creates a broadcaster with no subscribers and no resident value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler.
    pub fn subscribe(&self, handler: LicenseHandler) -> SubscriberId {
        let id = SubscriberId::new();
        match self.state.write() {
            Ok(mut state) => {
                state.handlers.insert(id, handler);
            }
            Err(_) => warn!("Broadcaster lock poisoned, subscription {id} dropped"),
        }
        id
    }

    /// Registers a handler and calls it once with the resident value.
    ///
    /// The seeding call runs under the broadcaster lock, so every later
    /// publish reaches the handler after it. `handler` must not call back
    /// into the broadcaster.
    pub fn subscribe_seeded(&self, handler: LicenseHandler) -> SubscriberId {
        let id = SubscriberId::new();
        match self.state.write() {
            Ok(mut state) => {
                handler(state.resident.as_ref());
                state.handlers.insert(id, handler);
            }
            Err(_) => warn!("Broadcaster lock poisoned, subscription {id} dropped"),
        }
        id
    }

    /// Removes a handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.state
            .write()
            .map(|mut state| state.handlers.remove(&id).is_some())
            .unwrap_or(false)
    }

    /// Records `value` as resident and notifies every subscriber except
    /// `origin`. Returns the number of handlers called.
    pub fn publish(&self, origin: Option<SubscriberId>, value: Option<&LicenseSnapshot>) -> usize {
        let handlers: Vec<LicenseHandler> = match self.state.write() {
            Ok(mut state) => {
                state.resident = value.cloned();
                state
                    .handlers
                    .iter()
                    .filter(|(id, _)| Some(**id) != origin)
                    .map(|(_, h)| Arc::clone(h))
                    .collect()
            }
            Err(_) => {
                warn!("Broadcaster lock poisoned, publish dropped");
                return 0;
            }
        };

        // Handlers run outside the lock so they may read the broadcaster.
        for handler in &handlers {
            handler(value);
        }
        debug!(
            "Published license {} to {} mount(s)",
            if value.is_some() { "snapshot" } else { "invalidation" },
            handlers.len()
        );
        handlers.len()
    }

    /// Last published value.
    pub fn resident(&self) -> Option<LicenseSnapshot> {
        self.state.read().ok().and_then(|s| s.resident.clone())
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.state.read().map(|s| s.handlers.len()).unwrap_or(0)
    }
}
