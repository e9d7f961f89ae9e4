//! Reservation engine integration tests: capacity, quota and idempotency
//! under concurrency.
//!
//! Run with: `cargo test -p booking --test reservation_test`

#![allow(clippy::unwrap_used)]

mod common;

use booking::ErrorKind;
use booking::engines::CreateReservationRequest;
use booking::types::{ReservationStatus, UserId};
use booking::BookingError;
use common::{EVENT, Harness};
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_creates_never_oversell() {
    let harness = Arc::new(Harness::new(50).await);

    let mut tasks = Vec::new();
    for user in 0..200 {
        let harness = Arc::clone(&harness);
        tasks.push(tokio::spawn(async move {
            harness
                .reservations
                .create(CreateReservationRequest::new(UserId::new(user), EVENT, 1))
                .await
        }));
    }

    let mut created = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => created += 1,
            Err(err) => assert_eq!(err.kind(), ErrorKind::InsufficientCapacity, "{err}"),
        }
    }

    let capacity = harness.ledger.get(EVENT).await.unwrap();
    assert_eq!(created, 50);
    assert_eq!(capacity.reserved, 50);
    assert_eq!(capacity.available, 0);
    assert!(capacity.is_consistent());
}

#[tokio::test]
async fn exact_fit_then_sold_out() {
    let harness = Harness::new(3).await;

    harness.reserve(1, 3).await;
    let err = harness
        .reservations
        .create(CreateReservationRequest::new(UserId::new(2), EVENT, 1))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InsufficientCapacity);
    assert_eq!(harness.available().await, 0);
}

#[tokio::test]
async fn quota_rejects_second_reservation_over_limit() {
    let harness = Harness::new(100).await;

    harness.reserve(1, 3).await;
    let err = harness
        .reservations
        .create(CreateReservationRequest::new(UserId::new(1), EVENT, 2))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BookingError::QuotaExceeded {
            held: 3,
            requested: 2,
            max: 4
        }
    ));
    assert_eq!(harness.available().await, 97);
}

#[tokio::test]
async fn cancelled_reservation_frees_quota() {
    let harness = Harness::new(100).await;

    let first = harness.reserve(1, 3).await;
    harness.reservations.cancel(&first.id).await.unwrap();
    harness.reserve(1, 4).await;

    assert_eq!(harness.available().await, 96);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_same_key_creates_one_reservation() {
    let harness = Arc::new(Harness::new(100).await);

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let harness = Arc::clone(&harness);
        tasks.push(tokio::spawn(async move {
            harness
                .reservations
                .create(
                    CreateReservationRequest::new(UserId::new(1), EVENT, 2)
                        .with_idempotency_key("checkout-7"),
                )
                .await
        }));
    }

    let mut responses = Vec::new();
    for task in tasks {
        responses.push(task.await.unwrap().unwrap());
    }

    assert!(responses.iter().all(|r| r == &responses[0]));
    assert_eq!(
        harness
            .reservations
            .list_by_user(UserId::new(1))
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(harness.available().await, 98);
}

#[tokio::test]
async fn cancel_and_expire_only_from_active_states() {
    let harness = Harness::new(10).await;
    let reservation = harness.reserve(1, 2).await;

    harness.reservations.confirm(&reservation.id).await.unwrap();
    assert_eq!(
        harness.reservations.expire(&reservation.id).await.unwrap_err().kind(),
        ErrorKind::InvalidState
    );

    let cancelled = harness.reservations.cancel(&reservation.id).await.unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    assert_eq!(harness.available().await, 10);
    assert_eq!(
        harness
            .reservations
            .list_by_status(ReservationStatus::Cancelled)
            .await
            .unwrap()
            .len(),
        1
    );
}
