//! Error taxonomy for reservation, redemption and catalog operations.
//!
//! Business outcomes (`SoldOut`, `AlreadyRedeemed`, ...) are terminal for the
//! current attempt and surfaced verbatim. `Contention` is the only retryable
//! failure. `StoreUnavailable` is an infrastructure fault and is never retried by
//! the core.

use crate::types::{EventId, EventStatus, PaymentId, TicketId};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures reported by a store implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A lock could not be acquired in time, or the transaction lost a
    /// serialization race.
    #[error("Store contention: {0}")]
    Contention(String),

    /// Connection, pool or query failure.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A persisted row could not be mapped back to a domain value.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Returns `true` if the operation may succeed when attempted again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention(_))
    }
}

/// Errors from the inventory reservation engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// No event with this id.
    #[error("Event {0} not found")]
    NotFound(EventId),

    /// The event is not on sale.
    #[error("Event {event_id} is not available for booking (status: {status})")]
    NotAvailable {
        /// Event ID
        event_id: EventId,
        /// Status observed inside the reservation transaction
        status: EventStatus,
    },

    /// Not enough capacity left for the requested quantity.
    #[error("Event {event_id} is sold out: requested {requested}, remaining {remaining}")]
    SoldOut {
        /// Event ID
        event_id: EventId,
        /// Requested quantity
        requested: u32,
        /// Seats left at commit time
        remaining: u32,
    },

    /// Quantity must be at least one.
    #[error("Quantity must be greater than zero")]
    InvalidQuantity,

    /// Quantity exceeds the per-order cap.
    #[error("Cannot reserve more than {limit} tickets at once (requested: {requested})")]
    OrderLimitExceeded {
        /// Requested quantity
        requested: u32,
        /// Configured cap
        limit: u32,
    },

    /// The event lock could not be acquired in time (retryable).
    #[error("Reservation for event {0} hit lock contention")]
    Contention(EventId),

    /// The payment already funded tickets for a different event or owner.
    #[error("Payment {payment_id} already funded tickets for event {funded_event}")]
    PaymentConflict {
        /// Charge reference
        payment_id: PaymentId,
        /// Event the payment's existing tickets belong to
        funded_event: EventId,
    },

    /// A redemption token could not be produced; the batch was rolled back.
    #[error("Failed to issue redemption token: {0}")]
    TokenIssuance(String),

    /// Infrastructure failure.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl InventoryError {
    /// Maps a store failure observed while reserving against `event_id`.
    #[must_use]
    pub fn from_store(event_id: EventId, error: StoreError) -> Self {
        match error {
            StoreError::Contention(_) => Self::Contention(event_id),
            StoreError::Unavailable(message) | StoreError::Corrupt(message) => {
                Self::StoreUnavailable(message)
            }
        }
    }

    /// Returns `true` if the reservation may succeed when attempted again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention(_))
    }

    /// Returns `true` for business outcomes that should be shown to the buyer.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::NotAvailable { .. }
                | Self::SoldOut { .. }
                | Self::InvalidQuantity
                | Self::OrderLimitExceeded { .. }
        )
    }
}

/// Errors from the redemption state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RedemptionError {
    /// Signature invalid or payload malformed.
    #[error("Invalid redemption token")]
    InvalidToken,

    /// Token belongs to a different event than the scanner's.
    #[error("Ticket belongs to event {actual}, not {expected}")]
    WrongEvent {
        /// Event the scanner is checking in
        expected: EventId,
        /// Event encoded in the token
        actual: EventId,
    },

    /// No ticket with this id.
    #[error("Ticket {0} not found")]
    NotFound(TicketId),

    /// The ticket was already used.
    #[error("Ticket {ticket_id} has already been redeemed")]
    AlreadyRedeemed {
        /// Ticket ID
        ticket_id: TicketId,
        /// When the original redemption happened, if recorded
        redeemed_at: Option<DateTime<Utc>>,
    },

    /// The ticket was revoked.
    #[error("Ticket {0} has been revoked")]
    Revoked(TicketId),

    /// Infrastructure failure.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl RedemptionError {
    /// Returns `true` if the redemption may succeed when attempted again.
    ///
    /// Redemption is a single conditional update with no lock wait, so
    /// nothing in this taxonomy is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        false
    }
}

impl From<StoreError> for RedemptionError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Contention(message)
            | StoreError::Unavailable(message)
            | StoreError::Corrupt(message) => Self::StoreUnavailable(message),
        }
    }
}

/// Errors from event catalog management.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// No event with this id.
    #[error("Event {0} not found")]
    NotFound(EventId),

    /// Capacity must be at least one and at most [`Capacity::MAX`](crate::Capacity::MAX).
    #[error("Capacity must be between 1 and {max} (got {0})", max = crate::Capacity::MAX)]
    InvalidCapacity(u32),

    /// New capacity would drop below the tickets already sold.
    #[error("Cannot set capacity of event {event_id} to {requested}: {sold} tickets already sold")]
    CapacityBelowSold {
        /// Event ID
        event_id: EventId,
        /// Tickets occupying a seat
        sold: u32,
        /// Requested capacity
        requested: u32,
    },

    /// Status change not permitted from the current status.
    #[error("Event {event_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Event ID
        event_id: EventId,
        /// Current status
        from: EventStatus,
        /// Requested status
        to: EventStatus,
    },

    /// Infrastructure failure (including lock contention on capacity updates).
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for CatalogError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Contention(message)
            | StoreError::Unavailable(message)
            | StoreError::Corrupt(message) => Self::StoreUnavailable(message),
        }
    }
}
