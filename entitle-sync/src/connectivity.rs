//! Online/offline tracking.
//!
//! The monitor is push-based: hosts feed it OS or reachability events, the engine
//! reads the current state and subscribes to transitions.

use tokio::sync::watch;
use tracing::debug;

/// Source of connectivity state.
pub trait ConnectivityMonitor: Send + Sync {
    /// Current state.
    fn is_online(&self) -> bool;

    /// Subscribes to state changes. The receiver starts at the current state.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// A monitor whose state is set explicitly.
pub struct ManualConnectivity {
    state: watch::Sender<bool>,
}

impl ManualConnectivity {
    /// Creates a monitor with the given initial state.
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self { state }
    }

    /// Reports a connectivity change. Repeated identical reports are dropped.
    pub fn set_online(&self, online: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            debug!("Connectivity changed: online={online}");
        }
    }
}

impl ConnectivityMonitor for ManualConnectivity {
    fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}
