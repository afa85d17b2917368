//! Transactional store abstraction for events, tickets, payments and the outbox.
//!
//! # Design
//!
//! The store is the sole ordering authority for an event's capacity. Every
//! implementation must honour two guarantees:
//!
//! - [`TicketStore::reserve`] evaluates the event status, the sold count and the
//!   inserts under one exclusive lock on the event (row-level `FOR UPDATE` in
//!   `PostgreSQL`). Two committed reservations for the same event can never
//!   together exceed its capacity. Different events never share a lock.
//! - [`TicketStore::transition_ticket`] is a compare-and-swap on the ticket's
//!   status: it only applies when the ticket is still `ACTIVE`. Contention is
//!   scoped to the single ticket.
//!
//! A payment reference mints tickets at most once across all events.
//!
//! # Implementations
//!
//! - `PostgresTicketStore` (in `turnstile-postgres`): production implementation
//! - `InMemoryTicketStore` (in `turnstile-testing`): per-event mutexes, for tests
//!
//! # Dyn Compatibility
//!
//! Methods return [`BoxFuture`] instead of using `async fn` so the traits can be
//! used as `Arc<dyn TicketStore>` inside environment structs.

use crate::error::{InventoryError, StoreError};
use crate::outbox::{OutboxEntry, OutboxId};
use crate::token::TokenIssuer;
use crate::types::{
    Availability, Capacity, CapacityPolicy, Event, EventId, EventStatus, OwnerId, Payment,
    PaymentId, PaymentStatus, Reservation, ReservationRequest, Ticket, TicketId,
    TicketTransition,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Boxed, sendable future returned by store methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a compare-and-swap on a ticket's status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// The ticket was `ACTIVE` and now carries the target status.
    Applied(Ticket),
    /// The ticket was no longer `ACTIVE`; carries the state that won.
    Rejected(Ticket),
    /// No ticket with this id.
    Missing,
}

/// Outcome of a locked capacity change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapacityChange {
    /// Capacity updated.
    Updated(Event),
    /// The requested capacity is below the tickets currently sold.
    BelowSold {
        /// Tickets occupying a seat at lock time
        sold: u32,
    },
    /// No event with this id.
    Missing,
}

/// Durable store for events and tickets.
pub trait TicketStore: Send + Sync {
    /// Persist a new event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert fails.
    fn insert_event(&self, event: Event) -> BoxFuture<'_, Result<Event, StoreError>>;

    /// Load an event by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn load_event(&self, event_id: EventId) -> BoxFuture<'_, Result<Option<Event>, StoreError>>;

    /// Published events, oldest first, one page at a time.
    ///
    /// `page` is 1-based; page 0 is treated as page 1. A `limit` of 0 yields an
    /// empty page.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn list_published(&self, page: u32, limit: u32) -> BoxFuture<'_, Result<Vec<Event>, StoreError>>;

    /// Move an event from `expected` to `next`.
    ///
    /// Returns `None` when the event is missing or no longer in `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    fn set_event_status(
        &self,
        event_id: EventId,
        expected: EventStatus,
        next: EventStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Option<Event>, StoreError>>;

    /// Change an event's capacity under the same lock `reserve` takes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the transaction fails.
    fn set_capacity(
        &self,
        event_id: EventId,
        capacity: Capacity,
        policy: CapacityPolicy,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<CapacityChange, StoreError>>;

    /// Unlocked snapshot of an event's capacity and sold count.
    ///
    /// Non-authoritative: the answer may be stale by the time it is used.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn availability(
        &self,
        event_id: EventId,
        policy: CapacityPolicy,
    ) -> BoxFuture<'_, Result<Option<Availability>, StoreError>>;

    /// Atomically check capacity and mint `request.quantity` ACTIVE tickets.
    ///
    /// Within one transaction holding the event lock:
    ///
    /// 1. the event must exist (`NotFound`);
    /// 2. if `request.payment_id` already minted tickets for any event, those
    ///    tickets are returned with `replayed = true` and nothing is created,
    ///    unless they belong to another event or owner (`PaymentConflict`);
    /// 3. the event must be published (`NotAvailable`);
    /// 4. `sold + quantity <= capacity` must hold (`SoldOut`);
    /// 5. ticket rows are inserted, then each gets a token from `issuer` bound
    ///    to its assigned id;
    /// 6. a `TicketsIssued` outbox entry is written.
    ///
    /// Reservations sharing a `payment_id` are serialized on that reference, so
    /// two deliveries of one charge can never both mint. Any failure rolls back
    /// the whole batch.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] for business outcomes, lock contention
    /// (`Contention`), token failures and infrastructure failures.
    fn reserve<'a>(
        &'a self,
        request: &'a ReservationRequest,
        policy: CapacityPolicy,
        issuer: &'a dyn TokenIssuer,
        issued_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Reservation, InventoryError>>;

    /// Load a ticket by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn load_ticket(&self, ticket_id: TicketId)
    -> BoxFuture<'_, Result<Option<Ticket>, StoreError>>;

    /// Compare-and-swap a ticket out of `ACTIVE`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    fn transition_ticket(
        &self,
        ticket_id: TicketId,
        transition: TicketTransition,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Transition, StoreError>>;

    /// Tickets owned by `owner_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn tickets_for_owner(&self, owner_id: OwnerId)
    -> BoxFuture<'_, Result<Vec<Ticket>, StoreError>>;

    /// Tickets minted by `payment_id`, in issue order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn tickets_for_payment<'a>(
        &'a self,
        payment_id: &'a PaymentId,
    ) -> BoxFuture<'a, Result<Vec<Ticket>, StoreError>>;
}

/// Durable ledger of gateway charges.
///
/// A payment is recorded `PENDING` before the buyer is sent to the gateway, and
/// settles once, to `SUCCESSFUL` or `FAILED`, when the charge is confirmed.
pub trait PaymentStore: Send + Sync {
    /// Record a new payment.
    ///
    /// Returns `false` without writing when the reference is already recorded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert fails.
    fn insert_payment(&self, payment: Payment) -> BoxFuture<'_, Result<bool, StoreError>>;

    /// Load a payment by its gateway reference.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn load_payment<'a>(
        &'a self,
        reference: &'a PaymentId,
    ) -> BoxFuture<'a, Result<Option<Payment>, StoreError>>;

    /// Move a payment from `expected` to `next`.
    ///
    /// Returns `None` when the payment is missing or no longer in `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    fn set_payment_status<'a>(
        &'a self,
        reference: &'a PaymentId,
        expected: PaymentStatus,
        next: PaymentStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<Payment>, StoreError>>;
}

/// Durable queue of messages written alongside ticket creation.
///
/// Consumers claim entries with a lease; an entry whose consumer crashes becomes
/// claimable again once the lease runs out, which makes delivery at-least-once.
pub trait OutboxStore: Send + Sync {
    /// Claim up to `limit` pending entries that are due at `now`.
    ///
    /// Each claimed entry has its attempt counter incremented and is hidden from
    /// other consumers until `now + lease`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the claim fails.
    fn claim_pending(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> BoxFuture<'_, Result<Vec<OutboxEntry>, StoreError>>;

    /// Mark an entry as delivered.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    fn mark_delivered(
        &self,
        id: OutboxId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Record a failed delivery.
    ///
    /// `retry_at = Some(t)` makes the entry claimable again at `t`; `None` marks
    /// it dead.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    fn mark_failed<'a>(
        &'a self,
        id: OutboxId,
        error: &'a str,
        retry_at: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, Result<(), StoreError>>;
}
