//! Concurrency guards.
//!
//! - [`ReconcileGuard`]: the one process-wide lock, held across a
//!   sign-out/re-validate sequence and a settling delay after it.
//! - [`SingleFlight`]: de-duplicates overlapping calls of one operation.

use crate::error::{SyncError, SyncResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::debug;

/// Process-wide reconciliation lock.
///
/// Never blocks on acquisition: a caller that finds it held must proceed
/// without reconciling.
#[derive(Debug, Default)]
pub struct ReconcileGuard {
    held: AtomicBool,
    released: Notify,
    acquisitions: AtomicUsize,
}

impl ReconcileGuard {
    /// Creates an unheld guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the guard if nobody holds it.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ReconcilePermit> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        debug!("Reconcile guard acquired");
        Some(ReconcilePermit {
            guard: Some(Arc::clone(self)),
        })
    }

    /// True while a reconciliation (or its settling delay) is in progress.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// How many times the guard has been acquired.
    pub fn acquisition_count(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Waits until the guard is not held.
    pub async fn wait_released(&self) {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_held() {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        self.held.store(false, Ordering::Release);
        self.released.notify_waiters();
        debug!("Reconcile guard released");
    }
}

/// Proof of holding the [`ReconcileGuard`]. Dropping it releases at once.
#[derive(Debug)]
pub struct ReconcilePermit {
    guard: Option<Arc<ReconcileGuard>>,
}

impl ReconcilePermit {
    /// Releases the guard after `grace` has elapsed.
    pub fn release_after(mut self, grace: Duration) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        if grace.is_zero() {
            guard.release();
            return;
        }
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            guard.release();
        });
    }
}

impl Drop for ReconcilePermit {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            guard.release();
        }
    }
}

type FlightSlot<T> = Option<watch::Receiver<Option<T>>>;

/// De-duplicates concurrent runs of one operation.
///
/// The first caller becomes the leader and performs the work; callers
/// arriving while it runs get a follower handle that resolves to the
/// leader's result.
pub struct SingleFlight<T> {
    slot: Arc<Mutex<FlightSlot<T>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }
}

/// Outcome of [`SingleFlight::join_or_lead`].
pub enum Flight<T> {
    /// No call in flight; the caller must do the work and `finish`.
    Leader(FlightLeader<T>),
    /// A call is in flight; await its result.
    Follower(FlightFollower<T>),
}

impl<T: Clone> SingleFlight<T> {
    /// Creates an idle flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a leader is running.
    pub fn in_flight(&self) -> bool {
        self.slot.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Joins the current flight or starts a new one.
    pub fn join_or_lead(&self) -> Flight<T> {
        let mut slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(rx) = slot.as_ref() {
            return Flight::Follower(FlightFollower { rx: rx.clone() });
        }
        let (tx, rx) = watch::channel(None);
        *slot = Some(rx);
        Flight::Leader(FlightLeader {
            tx,
            slot: Arc::clone(&self.slot),
        })
    }
}

/// The caller performing the work.
pub struct FlightLeader<T> {
    tx: watch::Sender<Option<T>>,
    slot: Arc<Mutex<FlightSlot<T>>>,
}

impl<T> FlightLeader<T> {
    /// Publishes the result to followers and ends the flight.
    pub fn finish(self, value: T) {
        self.tx.send_replace(Some(value));
        // Drop clears the slot.
    }
}

impl<T> Drop for FlightLeader<T> {
    fn drop(&mut self) {
        let mut slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = None;
    }
}

/// A caller waiting on someone else's flight.
pub struct FlightFollower<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> FlightFollower<T> {
    /// Waits for the leader's result.
    ///
    /// Fails with `ChannelClosed` if the leader was dropped without
    /// finishing.
    pub async fn wait(mut self) -> SyncResult<T> {
        let value = self
            .rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        value.clone().ok_or(SyncError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_leader_is_follower() {
        let flight: SingleFlight<u32> = SingleFlight::new();
        let first = flight.join_or_lead();
        assert!(matches!(first, Flight::Leader(_)));
        assert!(flight.in_flight());
        assert!(matches!(flight.join_or_lead(), Flight::Follower(_)));
        drop(first);
        assert!(!flight.in_flight());
        assert!(matches!(flight.join_or_lead(), Flight::Leader(_)));
    }

    #[tokio::test]
    async fn follower_receives_leader_result() {
        let flight: SingleFlight<u32> = SingleFlight::new();
        let Flight::Leader(leader) = flight.join_or_lead() else {
            panic!("expected leader");
        };
        let Flight::Follower(follower) = flight.join_or_lead() else {
            panic!("expected follower");
        };
        let waiter = tokio::spawn(follower.wait());
        leader.finish(7);
        assert_eq!(waiter.await.unwrap().unwrap(), 7);
        assert!(!flight.in_flight());
    }

    #[tokio::test]
    async fn abandoned_flight_fails_followers() {
        let flight: SingleFlight<u32> = SingleFlight::new();
        let leader = flight.join_or_lead();
        let Flight::Follower(follower) = flight.join_or_lead() else {
            panic!("expected follower");
        };
        drop(leader);
        assert!(matches!(follower.wait().await, Err(SyncError::ChannelClosed)));
    }
}
