//! Reservation engine scenarios against the in-memory store.
//!
//! Run with: `cargo test --test reservation`

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::Harness;
use proptest::prelude::*;
use turnstile_core::outbox::OutboxMessage;
use turnstile_core::token::TokenVerifier;
use turnstile_core::{
    CapacityPolicy, EventId, EventStatus, InventoryError, OwnerId, ReservationRequest, TicketStatus,
};

/// Capacity 2: a pair fits, a third ticket does not.
#[tokio::test]
async fn test_capacity_two_scenario() {
    let harness = Harness::new();
    let event_id = harness.published_event(2).await;

    let first = harness
        .app
        .reservations
        .reserve(ReservationRequest::new(event_id, 2, OwnerId::new()))
        .await
        .expect("two seats are free");
    assert_eq!(first.tickets.len(), 2);

    let second = harness
        .app
        .reservations
        .reserve(ReservationRequest::new(event_id, 1, OwnerId::new()))
        .await;
    assert_eq!(
        second,
        Err(InventoryError::SoldOut {
            event_id,
            requested: 1,
            remaining: 0
        })
    );
    assert_eq!(harness.store.sold(event_id, CapacityPolicy::default()).unwrap(), 2);
}

/// Exact remaining capacity succeeds; one more fails.
#[tokio::test]
async fn test_boundary_exact_remaining() {
    let harness = Harness::new();
    let event_id = harness.published_event(5).await;
    harness.buy(event_id, 3).await;

    let over = harness
        .app
        .reservations
        .reserve(ReservationRequest::new(event_id, 3, OwnerId::new()))
        .await;
    assert_eq!(
        over,
        Err(InventoryError::SoldOut {
            event_id,
            requested: 3,
            remaining: 2
        })
    );

    harness.buy(event_id, 2).await;
    assert_eq!(harness.store.sold(event_id, CapacityPolicy::default()).unwrap(), 5);
}

/// Every minted token decodes to its own ticket, event and owner.
#[tokio::test]
async fn test_tokens_bind_ticket_event_and_owner() {
    let harness = Harness::new();
    let event_id = harness.published_event(10).await;
    let owner = OwnerId::new();

    let reservation = harness
        .app
        .reservations
        .reserve(ReservationRequest::new(event_id, 3, owner))
        .await
        .unwrap();

    for ticket in &reservation.tickets {
        assert_eq!(ticket.status, TicketStatus::Active);
        assert_eq!(ticket.owner_id, owner);
        assert_eq!(ticket.issued_at, harness.now());
        let claims = harness.signer.verify(ticket.redemption_token.as_str()).unwrap();
        assert!(claims.matches(ticket));
    }
}

#[tokio::test]
async fn test_unpublished_and_missing_events() {
    let harness = Harness::new();
    let draft = harness.app.catalog.create_event("Soundcheck", 10).await.unwrap();

    let result = harness
        .app
        .reservations
        .reserve(ReservationRequest::new(draft.id, 1, OwnerId::new()))
        .await;
    assert_eq!(
        result,
        Err(InventoryError::NotAvailable {
            event_id: draft.id,
            status: EventStatus::Draft
        })
    );

    let missing = EventId::new();
    let result = harness
        .app
        .reservations
        .reserve(ReservationRequest::new(missing, 1, OwnerId::new()))
        .await;
    assert_eq!(result, Err(InventoryError::NotFound(missing)));
}

/// A committed reservation leaves exactly one outbox entry naming its tickets.
#[tokio::test]
async fn test_reservation_writes_one_outbox_entry() {
    let harness = Harness::new();
    let event_id = harness.published_event(10).await;
    let owner = OwnerId::new();

    let reservation = harness
        .app
        .reservations
        .reserve(ReservationRequest::new(event_id, 2, owner))
        .await
        .unwrap();

    let records = harness.store.outbox_records().unwrap();
    assert_eq!(records.len(), 1);
    let OutboxMessage::TicketsIssued {
        event_id: recorded_event,
        owner_id,
        ticket_ids,
        ..
    } = &records[0].message;
    assert_eq!(*recorded_event, event_id);
    assert_eq!(*owner_id, owner);
    assert_eq!(
        ticket_ids,
        &reservation.tickets.iter().map(|t| t.id).collect::<Vec<_>>()
    );
}

/// A rejected reservation leaves nothing behind.
#[tokio::test]
async fn test_sold_out_creates_nothing() {
    let harness = Harness::new();
    let event_id = harness.published_event(1).await;
    let owner = OwnerId::new();

    let result = harness
        .app
        .reservations
        .reserve(ReservationRequest::new(event_id, 2, owner))
        .await;

    assert!(matches!(result, Err(InventoryError::SoldOut { .. })));
    assert!(harness.app.reservations.tickets_for_owner(owner).await.unwrap().is_empty());
    assert!(harness.store.outbox_records().unwrap().is_empty());
}

#[tokio::test]
async fn test_tickets_for_owner_newest_first() {
    let harness = Harness::new();
    let event_id = harness.published_event(10).await;
    let owner = OwnerId::new();

    let older = harness
        .app
        .reservations
        .reserve(ReservationRequest::new(event_id, 1, owner))
        .await
        .unwrap();
    harness.clock.advance(chrono::Duration::minutes(5));
    let newer = harness
        .app
        .reservations
        .reserve(ReservationRequest::new(event_id, 1, owner))
        .await
        .unwrap();

    let tickets = harness.app.reservations.tickets_for_owner(owner).await.unwrap();
    assert_eq!(tickets.len(), 2);
    assert_eq!(tickets[0].id, newer.tickets[0].id);
    assert_eq!(tickets[1].id, older.tickets[0].id);
}

/// Revoked tickets free their seat by default.
#[tokio::test]
async fn test_revoked_ticket_releases_capacity() {
    let harness = Harness::new();
    let event_id = harness.published_event(1).await;
    let owner = harness.buy(event_id, 1).await;
    let ticket = harness.app.reservations.tickets_for_owner(owner).await.unwrap()[0].clone();

    harness.app.redemption.revoke(ticket.id).await.unwrap();

    assert!(harness.app.reservations.check_availability(event_id, 1).await.unwrap());
    harness.buy(event_id, 1).await;
}

/// With the retain policy a revoked ticket keeps its seat.
#[tokio::test]
async fn test_retain_policy_keeps_revoked_seat() {
    let harness = Harness::with_config(&[("REVOKED_TICKETS_RELEASE_CAPACITY", "false")]);
    let event_id = harness.published_event(1).await;
    let owner = harness.buy(event_id, 1).await;
    let ticket = harness.app.reservations.tickets_for_owner(owner).await.unwrap()[0].clone();

    harness.app.redemption.revoke(ticket.id).await.unwrap();

    let result = harness
        .app
        .reservations
        .reserve(ReservationRequest::new(event_id, 1, OwnerId::new()))
        .await;
    assert!(matches!(result, Err(InventoryError::SoldOut { remaining: 0, .. })));
}

/// Used tickets keep occupying capacity.
#[tokio::test]
async fn test_used_tickets_still_count() {
    let harness = Harness::new();
    let event_id = harness.published_event(1).await;
    let owner = harness.buy(event_id, 1).await;
    let ticket = harness.app.reservations.tickets_for_owner(owner).await.unwrap()[0].clone();

    harness
        .app
        .redemption
        .redeem(ticket.redemption_token.as_str(), Some(event_id))
        .await
        .unwrap();

    assert!(!harness.app.reservations.check_availability(event_id, 1).await.unwrap());
}

#[tokio::test]
async fn test_configured_order_limit() {
    let harness = Harness::with_config(&[("RESERVATION_MAX_PER_ORDER", "4")]);
    let event_id = harness.published_event(100).await;

    let result = harness
        .app
        .reservations
        .reserve(ReservationRequest::new(event_id, 5, OwnerId::new()))
        .await;
    assert_eq!(
        result,
        Err(InventoryError::OrderLimitExceeded {
            requested: 5,
            limit: 4
        })
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any sequence of requests: each succeeds exactly when it fits, and the
    /// sold count never passes capacity.
    #[test]
    fn prop_sequential_reservations_respect_capacity(
        capacity in 1u32..20,
        quantities in proptest::collection::vec(1u32..6, 1..15),
    ) {
        tokio_test::block_on(async {
            let harness = Harness::new();
            let event_id = harness.published_event(capacity).await;
            let mut sold = 0u32;

            for quantity in quantities {
                let result = harness
                    .app
                    .reservations
                    .reserve(ReservationRequest::new(event_id, quantity, OwnerId::new()))
                    .await;
                if sold + quantity <= capacity {
                    prop_assert_eq!(result.unwrap().tickets.len(), quantity as usize);
                    sold += quantity;
                } else {
                    prop_assert_eq!(
                        result,
                        Err(InventoryError::SoldOut {
                            event_id,
                            requested: quantity,
                            remaining: capacity - sold,
                        })
                    );
                }
                prop_assert!(harness.store.sold(event_id, CapacityPolicy::default()).unwrap() <= capacity);
            }
            Ok(())
        })?;
    }
}
