//! Event lifecycle and capacity changes.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::Harness;
use turnstile_core::{
    Capacity, CatalogError, EventId, EventStatus, InventoryError, OwnerId, ReservationRequest,
};

#[tokio::test]
async fn test_create_event_starts_as_draft() {
    let harness = Harness::new();
    let event = harness.app.catalog.create_event("Night Market", 40).await.unwrap();

    assert_eq!(event.status, EventStatus::Draft);
    assert_eq!(event.capacity.value(), 40);
    assert_eq!(event.created_at, harness.now());
    assert_eq!(harness.app.catalog.get_event(event.id).await.unwrap(), event);
}

#[tokio::test]
async fn test_zero_capacity_is_rejected() {
    let harness = Harness::new();
    let result = harness.app.catalog.create_event("Empty Room", 0).await;
    assert_eq!(result, Err(CatalogError::InvalidCapacity(0)));
}

/// Capacities the database column cannot hold are refused before the store
/// is touched.
#[tokio::test]
async fn test_oversized_capacity_is_rejected() {
    let harness = Harness::new();
    let too_big = Capacity::MAX + 1;

    assert_eq!(
        harness.app.catalog.create_event("Stadium", too_big).await,
        Err(CatalogError::InvalidCapacity(too_big))
    );
    assert_eq!(
        harness.app.catalog.create_event("Stadium", u32::MAX).await,
        Err(CatalogError::InvalidCapacity(u32::MAX))
    );

    let event_id = harness.published_event(10).await;
    assert_eq!(
        harness.app.catalog.update_capacity(event_id, too_big).await,
        Err(CatalogError::InvalidCapacity(too_big))
    );
    let largest = harness
        .app
        .catalog
        .update_capacity(event_id, Capacity::MAX)
        .await
        .unwrap();
    assert_eq!(largest.capacity.value(), Capacity::MAX);
}

#[tokio::test]
async fn test_publish_only_once() {
    let harness = Harness::new();
    let event = harness.app.catalog.create_event("Night Market", 40).await.unwrap();

    let published = harness.app.catalog.publish(event.id).await.unwrap();
    assert_eq!(published.status, EventStatus::Published);

    assert_eq!(
        harness.app.catalog.publish(event.id).await,
        Err(CatalogError::InvalidTransition {
            event_id: event.id,
            from: EventStatus::Published,
            to: EventStatus::Published,
        })
    );
}

#[tokio::test]
async fn test_cancel_is_terminal() {
    let harness = Harness::new();
    let event_id = harness.published_event(10).await;

    let cancelled = harness.app.catalog.cancel(event_id).await.unwrap();
    assert_eq!(cancelled.status, EventStatus::Cancelled);

    assert!(matches!(
        harness.app.catalog.cancel(event_id).await,
        Err(CatalogError::InvalidTransition {
            from: EventStatus::Cancelled,
            ..
        })
    ));
    assert!(matches!(
        harness.app.catalog.publish(event_id).await,
        Err(CatalogError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_draft_can_be_cancelled() {
    let harness = Harness::new();
    let event = harness.app.catalog.create_event("Rained Out", 10).await.unwrap();
    let cancelled = harness.app.catalog.cancel(event.id).await.unwrap();
    assert_eq!(cancelled.status, EventStatus::Cancelled);
}

/// Cancelling stops sales but leaves issued tickets alone.
#[tokio::test]
async fn test_cancelled_event_stops_sales() {
    let harness = Harness::new();
    let event_id = harness.published_event(10).await;
    let owner = harness.buy(event_id, 2).await;

    harness.app.catalog.cancel(event_id).await.unwrap();

    let result = harness
        .app
        .reservations
        .reserve(ReservationRequest::new(event_id, 1, OwnerId::new()))
        .await;
    assert_eq!(
        result,
        Err(InventoryError::NotAvailable {
            event_id,
            status: EventStatus::Cancelled,
        })
    );
    assert_eq!(
        harness.app.reservations.tickets_for_owner(owner).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_capacity_cannot_drop_below_sold() {
    let harness = Harness::new();
    let event_id = harness.published_event(10).await;
    harness.buy(event_id, 6).await;

    assert_eq!(
        harness.app.catalog.update_capacity(event_id, 5).await,
        Err(CatalogError::CapacityBelowSold {
            event_id,
            sold: 6,
            requested: 5,
        })
    );

    let shrunk = harness.app.catalog.update_capacity(event_id, 6).await.unwrap();
    assert_eq!(shrunk.capacity.value(), 6);
    assert!(!harness.app.reservations.check_availability(event_id, 1).await.unwrap());
}

#[tokio::test]
async fn test_raising_capacity_reopens_sales() {
    let harness = Harness::new();
    let event_id = harness.published_event(2).await;
    harness.buy(event_id, 2).await;
    assert!(!harness.app.reservations.check_availability(event_id, 1).await.unwrap());

    harness.app.catalog.update_capacity(event_id, 5).await.unwrap();

    let availability = harness
        .app
        .reservations
        .availability(event_id)
        .await
        .unwrap()
        .expect("event exists");
    assert_eq!(availability.remaining(), 3);
    harness.buy(event_id, 3).await;
}

/// Buyers browse published events oldest first; drafts and cancelled events
/// stay out of the listing.
#[tokio::test]
async fn test_list_published_pages() {
    let harness = Harness::new();
    let mut listed = Vec::new();
    for _ in 0..3 {
        listed.push(harness.published_event(10).await);
        harness.clock.advance(chrono::Duration::minutes(5));
    }
    harness.app.catalog.create_event("Still a draft", 10).await.unwrap();
    let cancelled = harness.published_event(10).await;
    harness.app.catalog.cancel(cancelled).await.unwrap();

    let ids = |events: Vec<turnstile_core::Event>| -> Vec<EventId> {
        events.into_iter().map(|event| event.id).collect()
    };
    let catalog = &harness.app.catalog;

    assert_eq!(ids(catalog.list_published(1, 2).await.unwrap()), listed[..2]);
    assert_eq!(ids(catalog.list_published(2, 2).await.unwrap()), listed[2..]);
    assert!(catalog.list_published(3, 2).await.unwrap().is_empty());
    assert_eq!(ids(catalog.list_published(0, 10).await.unwrap()), listed);
    assert_eq!(ids(catalog.list_published(1, u32::MAX).await.unwrap()), listed);
}

#[tokio::test]
async fn test_missing_event() {
    let harness = Harness::new();
    let missing = EventId::new();

    assert_eq!(
        harness.app.catalog.get_event(missing).await,
        Err(CatalogError::NotFound(missing))
    );
    assert_eq!(
        harness.app.catalog.publish(missing).await,
        Err(CatalogError::NotFound(missing))
    );
    assert_eq!(
        harness.app.catalog.update_capacity(missing, 3).await,
        Err(CatalogError::NotFound(missing))
    );
}
