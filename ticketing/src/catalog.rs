//! Event catalog: creation, lifecycle and capacity.
//!
//! ```text
//!   DRAFT ──publish──▶ PUBLISHED
//!     │                   │
//!     └──────cancel───────┴──▶ CANCELLED (terminal)
//! ```

use std::sync::Arc;
use turnstile_core::environment::Clock;
use turnstile_core::store::{CapacityChange, TicketStore};
use turnstile_core::{Capacity, CapacityPolicy, CatalogError, Event, EventId, EventStatus};

/// Largest page [`EventCatalog::list_published`] returns.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Manages events.
#[derive(Clone)]
pub struct EventCatalog {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    policy: CapacityPolicy,
}

impl EventCatalog {
    /// Creates a new catalog. `policy` must match the reservation engine's.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, clock: Arc<dyn Clock>, policy: CapacityPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Create an event in `DRAFT`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidCapacity`] for a zero or oversized
    /// capacity, or [`CatalogError::StoreUnavailable`].
    #[tracing::instrument(skip(self, title), fields(title = %title.as_ref()))]
    pub async fn create_event(
        &self,
        title: impl AsRef<str>,
        capacity: u32,
    ) -> Result<Event, CatalogError> {
        let capacity = checked_capacity(capacity)?;
        let event = self
            .store
            .insert_event(Event::draft(title.as_ref(), capacity, self.clock.now()))
            .await?;
        tracing::info!(event_id = %event.id, "Event created");
        Ok(event)
    }

    /// Put a draft event on sale.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidTransition`] unless the event is `DRAFT`.
    pub async fn publish(&self, event_id: EventId) -> Result<Event, CatalogError> {
        self.transition(event_id, EventStatus::Published).await
    }

    /// Cancel a draft or published event.
    ///
    /// Tickets already issued are untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidTransition`] if the event is already
    /// cancelled.
    pub async fn cancel(&self, event_id: EventId) -> Result<Event, CatalogError> {
        self.transition(event_id, EventStatus::Cancelled).await
    }

    #[tracing::instrument(skip(self))]
    async fn transition(&self, event_id: EventId, next: EventStatus) -> Result<Event, CatalogError> {
        // A concurrent change between load and swap surfaces as a fresh load.
        loop {
            let current = self.get_event(event_id).await?;
            if !current.status.can_transition_to(next) {
                return Err(CatalogError::InvalidTransition {
                    event_id,
                    from: current.status,
                    to: next,
                });
            }

            if let Some(event) = self
                .store
                .set_event_status(event_id, current.status, next, self.clock.now())
                .await?
            {
                tracing::info!(from = %current.status, to = %next, "Event status changed");
                return Ok(event);
            }
        }
    }

    /// Change an event's capacity.
    ///
    /// Evaluated under the same lock as reservations, so a concurrent
    /// reservation either lands before the check or sees the new capacity.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::InvalidCapacity`] for zero or above [`Capacity::MAX`]
    /// - [`CatalogError::CapacityBelowSold`] if fewer seats than tickets held
    /// - [`CatalogError::NotFound`]
    #[tracing::instrument(skip(self))]
    pub async fn update_capacity(&self, event_id: EventId, capacity: u32) -> Result<Event, CatalogError> {
        match self
            .store
            .set_capacity(event_id, checked_capacity(capacity)?, self.policy, self.clock.now())
            .await?
        {
            CapacityChange::Updated(event) => {
                tracing::info!("Capacity updated");
                Ok(event)
            }
            CapacityChange::BelowSold { sold } => Err(CatalogError::CapacityBelowSold {
                event_id,
                sold,
                requested: capacity,
            }),
            CapacityChange::Missing => Err(CatalogError::NotFound(event_id)),
        }
    }

    /// Published events, oldest first.
    ///
    /// `page` is 1-based (0 reads as 1); `limit` is capped at
    /// [`MAX_PAGE_SIZE`].
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::StoreUnavailable`].
    pub async fn list_published(&self, page: u32, limit: u32) -> Result<Vec<Event>, CatalogError> {
        Ok(self
            .store
            .list_published(page.max(1), limit.min(MAX_PAGE_SIZE))
            .await?)
    }

    /// Load an event.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::NotFound`] or [`CatalogError::StoreUnavailable`].
    pub async fn get_event(&self, event_id: EventId) -> Result<Event, CatalogError> {
        self.store
            .load_event(event_id)
            .await?
            .ok_or(CatalogError::NotFound(event_id))
    }
}

fn checked_capacity(capacity: u32) -> Result<Capacity, CatalogError> {
    if capacity == 0 || capacity > Capacity::MAX {
        return Err(CatalogError::InvalidCapacity(capacity));
    }
    Ok(Capacity::new(capacity))
}
