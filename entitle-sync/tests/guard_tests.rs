use entitle_sync::{ReconcileGuard, SingleFlight};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn guard_admits_one_holder() {
    let guard = Arc::new(ReconcileGuard::new());

    let permit = guard.try_acquire().expect("first acquire");
    assert!(guard.is_held());
    assert!(guard.try_acquire().is_none());

    drop(permit);
    assert!(!guard.is_held());
    assert!(guard.try_acquire().is_some());
    assert_eq!(guard.acquisition_count(), 2);
}

#[tokio::test]
async fn zero_grace_releases_immediately() {
    let guard = Arc::new(ReconcileGuard::new());
    guard.try_acquire().unwrap().release_after(Duration::ZERO);
    assert!(!guard.is_held());
}

#[tokio::test(start_paused = true)]
async fn grace_keeps_guard_held() {
    let guard = Arc::new(ReconcileGuard::new());
    guard
        .try_acquire()
        .unwrap()
        .release_after(Duration::from_millis(2_000));

    tokio::time::sleep(Duration::from_millis(1_999)).await;
    assert!(guard.is_held());
    assert!(guard.try_acquire().is_none());

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert!(!guard.is_held());
}

#[tokio::test(start_paused = true)]
async fn waiters_wake_on_release() {
    let guard = Arc::new(ReconcileGuard::new());
    let permit = guard.try_acquire().unwrap();

    let waiter = {
        let guard = Arc::clone(&guard);
        tokio::spawn(async move { guard.wait_released().await })
    };
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    permit.release_after(Duration::from_millis(500));
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter woke")
        .unwrap();
}

#[tokio::test]
async fn wait_released_returns_when_unheld() {
    let guard = ReconcileGuard::new();
    guard.wait_released().await;
}

#[tokio::test]
async fn single_flight_shares_one_result() {
    let flight: SingleFlight<u32> = SingleFlight::new();

    let leader = match flight.join_or_lead() {
        entitle_sync::guard::Flight::Leader(leader) => leader,
        entitle_sync::guard::Flight::Follower(_) => panic!("expected leader"),
    };
    let followers: Vec<_> = (0..3)
        .map(|_| match flight.join_or_lead() {
            entitle_sync::guard::Flight::Follower(f) => f,
            entitle_sync::guard::Flight::Leader(_) => panic!("expected follower"),
        })
        .collect();
    assert!(flight.in_flight());

    leader.finish(42);
    for follower in followers {
        assert_eq!(follower.wait().await.unwrap(), 42);
    }
    assert!(!flight.in_flight());
}
