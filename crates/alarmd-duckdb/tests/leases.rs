use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use alarmd_core::clock::ManualClock;
use alarmd_core::error::LeaseError;
use alarmd_core::lease::LeaseProvider;
use alarmd_duckdb::{DuckDbBackend, DuckDbLeaseProvider};

const TTL: Duration = Duration::from_secs(60);

fn setup() -> (ManualClock, DuckDbLeaseProvider, DuckDbLeaseProvider) {
    let clock = ManualClock::new(
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0)
            .single()
            .expect("valid instant"),
    );
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("in-memory DuckDB"));
    let node_a = DuckDbLeaseProvider::new(Arc::clone(&db), Arc::new(clock.clone()), "node-a");
    let node_b = DuckDbLeaseProvider::new(db, Arc::new(clock.clone()), "node-b");
    (clock, node_a, node_b)
}

#[tokio::test]
async fn first_acquire_succeeds_and_second_is_already_held() {
    let (_clock, node_a, node_b) = setup();
    let lease = node_a.acquire("alarm:1", TTL).await.expect("acquire");
    assert_eq!(lease.holder, "node-a");

    let err = node_b
        .acquire("alarm:1", TTL)
        .await
        .expect_err("lease is taken");
    assert!(matches!(err, LeaseError::AlreadyHeld(_)));

    node_b
        .acquire("alarm:2", TTL)
        .await
        .expect("other keys are independent");
}

#[tokio::test]
async fn expired_lease_is_taken_over() {
    let (clock, node_a, node_b) = setup();
    node_a.acquire("alarm:1", TTL).await.expect("acquire");
    clock.advance(chrono::Duration::seconds(60));

    let lease = node_b
        .acquire("alarm:1", TTL)
        .await
        .expect("acquire after expiry");
    assert_eq!(lease.holder, "node-b");
    let current = node_a
        .current("alarm:1")
        .await
        .expect("current")
        .expect("live lease");
    assert_eq!(current.holder, "node-b");
}

#[tokio::test]
async fn release_is_idempotent_and_scoped_to_the_holder() {
    let (_clock, node_a, node_b) = setup();
    node_a.acquire("alarm:1", TTL).await.expect("acquire");

    node_b.release("alarm:1").await.expect("foreign release is a no-op");
    assert!(node_a.current("alarm:1").await.expect("current").is_some());

    node_a.release("alarm:1").await.expect("release");
    node_a.release("alarm:1").await.expect("release twice");
    node_a.release("never-acquired").await.expect("release absent");

    node_b
        .acquire("alarm:1", TTL)
        .await
        .expect("free after release");
}

#[tokio::test]
async fn purge_expired_removes_stale_rows_only() {
    let (clock, node_a, _node_b) = setup();
    node_a.acquire("old", TTL).await.expect("acquire");
    clock.advance(chrono::Duration::seconds(30));
    node_a.acquire("fresh", TTL).await.expect("acquire");
    clock.advance(chrono::Duration::seconds(40));

    assert_eq!(node_a.purge_expired().await.expect("purge"), 1);
    assert!(node_a.current("old").await.expect("current").is_none());
    assert!(node_a.current("fresh").await.expect("current").is_some());
}

#[tokio::test]
async fn acquire_sweeps_expired_rows() {
    let (clock, node_a, node_b) = setup();
    for key in ["alarm:1", "alarm:2", "alarm:3"] {
        node_a.acquire(key, TTL).await.expect("acquire");
    }
    clock.advance(chrono::Duration::seconds(61));
    node_b.acquire("alarm:4", TTL).await.expect("acquire");

    // Only the lease taken after expiry is left.
    assert_eq!(node_a.purge_expired().await.expect("purge"), 0);
    assert!(node_a.current("alarm:1").await.expect("current").is_none());
    assert!(node_b.current("alarm:4").await.expect("current").is_some());
}
