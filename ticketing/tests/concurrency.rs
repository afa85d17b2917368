//! Concurrency properties for reservation and redemption.
//!
//! These tests verify that under concurrent load the store lock is the only
//! ordering authority: no event is oversold and no ticket is admitted twice.
//!
//! Run with: `cargo test --test concurrency -- --nocapture`

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::Harness;
use futures::future::join_all;
use std::sync::Arc;
use turnstile_core::{
    CapacityPolicy, InventoryError, OwnerId, RedemptionError, ReservationRequest, TicketStatus,
};

/// N simultaneous single-ticket requests against capacity C < N.
///
/// Verifies that:
/// - Exactly C reservations succeed
/// - Exactly N - C fail with `SoldOut`
/// - The store holds exactly C tickets
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_unit_requests_fill_exactly_to_capacity() {
    let harness = Arc::new(Harness::new());
    let event_id = harness.published_event(10).await;

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move {
                harness
                    .app
                    .reservations
                    .reserve(ReservationRequest::new(event_id, 1, OwnerId::new()))
                    .await
            })
        })
        .collect();

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let sold_out = results
        .iter()
        .filter(|r| matches!(r, Err(InventoryError::SoldOut { .. })))
        .count();

    println!("successes={successes} sold_out={sold_out}");
    assert_eq!(successes, 10);
    assert_eq!(sold_out, 40);
    assert_eq!(
        harness.store.sold(event_id, CapacityPolicy::default()).unwrap(),
        10
    );
}

/// Mixed quantities whose total exceeds capacity never oversell.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_mixed_quantities_never_oversell() {
    let harness = Arc::new(Harness::new());
    let capacity = 17;
    let event_id = harness.published_event(capacity).await;

    let handles: Vec<_> = (0..40u32)
        .map(|i| {
            let harness = Arc::clone(&harness);
            let quantity = i % 4 + 1;
            tokio::spawn(async move {
                harness
                    .app
                    .reservations
                    .reserve(ReservationRequest::new(event_id, quantity, OwnerId::new()))
                    .await
                    .map(|reservation| reservation.tickets.len())
            })
        })
        .collect();

    let granted: usize = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .filter_map(Result::ok)
        .sum();

    let sold = harness.store.sold(event_id, CapacityPolicy::default()).unwrap();
    assert!(sold <= capacity);
    assert_eq!(granted, sold as usize);
}

/// Reservations on different events do not interfere.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_events_fill_independently() {
    let harness = Arc::new(Harness::new());
    let first = harness.published_event(5).await;
    let second = harness.published_event(5).await;

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let harness = Arc::clone(&harness);
            let event_id = if i % 2 == 0 { first } else { second };
            tokio::spawn(async move {
                harness
                    .app
                    .reservations
                    .reserve(ReservationRequest::new(event_id, 1, OwnerId::new()))
                    .await
            })
        })
        .collect();
    join_all(handles).await;

    assert_eq!(harness.store.sold(first, CapacityPolicy::default()).unwrap(), 5);
    assert_eq!(harness.store.sold(second, CapacityPolicy::default()).unwrap(), 5);
}

/// Two scanners present the same token at once: exactly one admits.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_redeem_admits_once() {
    let harness = Arc::new(Harness::new());
    let event_id = harness.published_event(1).await;
    let owner = harness.buy(event_id, 1).await;
    let ticket = harness
        .app
        .reservations
        .tickets_for_owner(owner)
        .await
        .unwrap()
        .remove(0);

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let harness = Arc::clone(&harness);
            let token = ticket.redemption_token.clone();
            tokio::spawn(async move {
                harness
                    .app
                    .redemption
                    .redeem(token.as_str(), Some(event_id))
                    .await
            })
        })
        .collect();

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let admitted = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(RedemptionError::AlreadyRedeemed { .. })))
        .count();
    assert_eq!((admitted, refused), (1, 1));
}

/// Many scanners racing on one ticket: still exactly one admission.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_redeem_storm_admits_once() {
    let harness = Arc::new(Harness::new());
    let event_id = harness.published_event(1).await;
    let owner = harness.buy(event_id, 1).await;
    let ticket = harness
        .app
        .reservations
        .tickets_for_owner(owner)
        .await
        .unwrap()
        .remove(0);

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let harness = Arc::clone(&harness);
            let token = ticket.redemption_token.clone();
            tokio::spawn(async move { harness.app.redemption.redeem(token.as_str(), None).await })
        })
        .collect();

    let admitted = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .filter(Result::is_ok)
        .count();
    assert_eq!(admitted, 1);

    let stored = harness
        .app
        .reservations
        .tickets_for_owner(owner)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(stored.status, TicketStatus::Used);
}

/// Redeeming tickets of a sold-out event concurrently with new reservations
/// never frees a seat.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_redemption_does_not_release_capacity_under_load() {
    let harness = Arc::new(Harness::new());
    let event_id = harness.published_event(3).await;
    let owner = harness.buy(event_id, 3).await;
    let tickets = harness.app.reservations.tickets_for_owner(owner).await.unwrap();

    let mut redeem_handles = Vec::new();
    for ticket in tickets {
        let harness = Arc::clone(&harness);
        redeem_handles.push(tokio::spawn(async move {
            harness
                .app
                .redemption
                .redeem(ticket.redemption_token.as_str(), Some(event_id))
                .await
                .map(|_| ())
        }));
    }
    let reserve_handles: Vec<_> = (0..10)
        .map(|_| {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move {
                harness
                    .app
                    .reservations
                    .reserve(ReservationRequest::new(event_id, 1, OwnerId::new()))
                    .await
                    .map(|_| ())
            })
        })
        .collect();

    for result in join_all(redeem_handles).await {
        assert!(result.unwrap().is_ok());
    }
    for result in join_all(reserve_handles).await {
        assert!(matches!(result.unwrap(), Err(InventoryError::SoldOut { .. })));
    }
    assert_eq!(harness.store.sold(event_id, CapacityPolicy::default()).unwrap(), 3);
}
