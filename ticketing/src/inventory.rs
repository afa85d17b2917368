//! Inventory reservation engine.
//!
//! The engine validates a request, then hands the capacity check and ticket
//! minting to [`TicketStore::reserve`], which runs them under the event lock.
//! Lock timeouts surface as [`InventoryError::Contention`] and are retried
//! with jittered exponential backoff. Every other failure is returned on first
//! sight; a racing loser sees `SoldOut` freshly and is never retried.

use crate::metrics::BusinessMetrics;
use std::sync::Arc;
use std::time::Instant;
use turnstile_core::environment::Clock;
use turnstile_core::store::TicketStore;
use turnstile_core::token::TokenIssuer;
use turnstile_core::{
    Availability, CapacityPolicy, EventId, EventStatus, InventoryError, OwnerId, PaymentId,
    Reservation, ReservationRequest, StoreError, Ticket,
};
use turnstile_runtime::{RetryPolicy, retry_with_predicate};

/// Dependencies for the reservation engine.
#[derive(Clone)]
pub struct InventoryEnvironment {
    /// Transactional store holding events and tickets
    pub store: Arc<dyn TicketStore>,
    /// Signs redemption tokens once ticket ids are assigned
    pub issuer: Arc<dyn TokenIssuer>,
    /// Clock stamped on issued tickets
    pub clock: Arc<dyn Clock>,
}

impl InventoryEnvironment {
    /// Creates a new `InventoryEnvironment`
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        issuer: Arc<dyn TokenIssuer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            issuer,
            clock,
        }
    }
}

/// Tuning for [`ReservationEngine`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReservationSettings {
    /// Backoff for lock contention
    pub retry: RetryPolicy,
    /// Whether revoked tickets hand their seat back
    pub capacity_policy: CapacityPolicy,
    /// Per-request quantity cap
    pub max_per_order: Option<u32>,
}

/// Admits or rejects reservation requests.
#[derive(Clone)]
pub struct ReservationEngine {
    env: InventoryEnvironment,
    settings: ReservationSettings,
}

impl ReservationEngine {
    /// Creates a new engine.
    #[must_use]
    pub const fn new(env: InventoryEnvironment, settings: ReservationSettings) -> Self {
        Self { env, settings }
    }

    /// The capacity policy this engine counts seats with.
    #[must_use]
    pub const fn capacity_policy(&self) -> CapacityPolicy {
        self.settings.capacity_policy
    }

    /// Reserve `request.quantity` tickets.
    ///
    /// On success every returned ticket is `ACTIVE`, owned by the requester and
    /// carries a token bound to its id. When `request.payment_id` already minted
    /// tickets, those are returned with `replayed = true`.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::InvalidQuantity`] / [`InventoryError::OrderLimitExceeded`]
    ///   before touching the store
    /// - [`InventoryError::NotFound`], [`InventoryError::NotAvailable`],
    ///   [`InventoryError::SoldOut`] from inside the locked transaction
    /// - [`InventoryError::PaymentConflict`] if the payment already funded
    ///   tickets for another event or owner
    /// - [`InventoryError::Contention`] once retries are exhausted
    /// - [`InventoryError::TokenIssuance`] / [`InventoryError::StoreUnavailable`]
    #[tracing::instrument(
        skip(self, request),
        fields(event_id = %request.event_id, quantity = request.quantity, requester = %request.requester_id)
    )]
    pub async fn reserve(&self, request: ReservationRequest) -> Result<Reservation, InventoryError> {
        let started = Instant::now();
        let result = self.reserve_inner(&request).await;

        let issued = match &result {
            Ok(reservation) if !reservation.replayed => reservation.tickets.len(),
            _ => 0,
        };
        BusinessMetrics::record_reservation(
            result.as_ref().map(|r| r.replayed),
            issued,
            started.elapsed(),
        );

        match &result {
            Ok(reservation) if reservation.replayed => {
                tracing::info!(tickets = reservation.tickets.len(), "Payment already fulfilled");
            }
            Ok(reservation) => {
                tracing::info!(tickets = reservation.tickets.len(), "Tickets reserved");
            }
            Err(error) if error.is_user_error() => {
                tracing::debug!(%error, "Reservation rejected");
            }
            Err(error) => {
                tracing::warn!(%error, "Reservation failed");
            }
        }

        result
    }

    async fn reserve_inner(&self, request: &ReservationRequest) -> Result<Reservation, InventoryError> {
        self.validate(request)?;

        let store = self.env.store.as_ref();
        let issuer = self.env.issuer.as_ref();
        let clock = self.env.clock.as_ref();
        let policy = self.settings.capacity_policy;

        retry_with_predicate(
            &self.settings.retry,
            move || async move {
                let result = store.reserve(request, policy, issuer, clock.now()).await;
                if matches!(result, Err(InventoryError::Contention(_))) {
                    BusinessMetrics::record_contention();
                }
                result
            },
            InventoryError::is_retryable,
        )
        .await
    }

    fn validate(&self, request: &ReservationRequest) -> Result<(), InventoryError> {
        if request.quantity == 0 {
            return Err(InventoryError::InvalidQuantity);
        }
        if let Some(limit) = self.settings.max_per_order {
            if request.quantity > limit {
                return Err(InventoryError::OrderLimitExceeded {
                    requested: request.quantity,
                    limit,
                });
            }
        }
        Ok(())
    }

    /// Non-authoritative pre-check: could `quantity` tickets be sold right now?
    ///
    /// Missing events and events not on sale report `false`. A `true` answer
    /// does not hold a seat; [`Self::reserve`] decides.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::StoreUnavailable`] if the snapshot cannot be read.
    pub async fn check_availability(
        &self,
        event_id: EventId,
        quantity: u32,
    ) -> Result<bool, InventoryError> {
        if quantity == 0 {
            return Ok(false);
        }
        Ok(self
            .availability(event_id)
            .await?
            .is_some_and(|availability| availability.admits(quantity)))
    }

    /// Non-authoritative pre-check that says why a request would be refused.
    ///
    /// Applies the same request validation as [`Self::reserve`], then reads an
    /// unlocked snapshot. Used before sending a buyer to the payment gateway;
    /// the seats are only claimed when the charge settles.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::InvalidQuantity`] / [`InventoryError::OrderLimitExceeded`]
    /// - [`InventoryError::NotFound`], [`InventoryError::NotAvailable`],
    ///   [`InventoryError::SoldOut`] as seen by the snapshot
    /// - [`InventoryError::StoreUnavailable`]
    pub async fn ensure_available(
        &self,
        request: &ReservationRequest,
    ) -> Result<Availability, InventoryError> {
        self.validate(request)?;
        let event_id = request.event_id;
        let availability = self
            .availability(event_id)
            .await?
            .ok_or(InventoryError::NotFound(event_id))?;
        if availability.status != EventStatus::Published {
            return Err(InventoryError::NotAvailable {
                event_id,
                status: availability.status,
            });
        }
        if !availability.admits(request.quantity) {
            return Err(InventoryError::SoldOut {
                event_id,
                requested: request.quantity,
                remaining: availability.remaining(),
            });
        }
        Ok(availability)
    }

    /// Unlocked capacity snapshot for an event.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::StoreUnavailable`] if the snapshot cannot be read.
    pub async fn availability(&self, event_id: EventId) -> Result<Option<Availability>, InventoryError> {
        self.env
            .store
            .availability(event_id, self.settings.capacity_policy)
            .await
            .map_err(|e| InventoryError::StoreUnavailable(e.to_string()))
    }

    /// Tickets owned by `owner_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn tickets_for_owner(&self, owner_id: OwnerId) -> Result<Vec<Ticket>, StoreError> {
        self.env.store.tickets_for_owner(owner_id).await
    }

    /// Tickets minted by a payment, in issue order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn tickets_for_payment(&self, payment_id: &PaymentId) -> Result<Vec<Ticket>, StoreError> {
        self.env.store.tickets_for_payment(payment_id).await
    }
}
