//! In-memory [`TicketStore`], [`PaymentStore`] and [`OutboxStore`].
//!
//! Mirrors the locking discipline of the `PostgreSQL` store:
//!
//! - each event has its own mutex, held for the whole of `reserve` and
//!   `set_capacity` (the `FOR UPDATE` row lock);
//! - each ticket has its own mutex, and `transition_ticket` only takes that one
//!   (the conditional `UPDATE ... WHERE status = 'active'`).
//!
//! Reservations that carry a payment reference also take a store-wide payment
//! gate first (the advisory lock on the reference), so one charge is checked
//! and fulfilled by a single reservation at a time, whichever event it names.
//!
//! Locks are always taken in the order payment gate, event, ticket table,
//! ticket, so reservations and redemptions running on a multi-threaded runtime
//! never deadlock.
//!
//! Failures can be injected with [`InMemoryTicketStore::fail_next_reserve`] and
//! [`InMemoryTicketStore::fail_next_transition`] to exercise retry and error
//! paths.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use turnstile_core::error::{InventoryError, StoreError};
use turnstile_core::outbox::{OutboxEntry, OutboxId, OutboxMessage, OutboxStatus};
use turnstile_core::store::{
    BoxFuture, CapacityChange, OutboxStore, PaymentStore, TicketStore, Transition,
};
use turnstile_core::token::{TicketClaims, TokenIssuer};
use turnstile_core::{
    Availability, Capacity, CapacityPolicy, Event, EventId, EventStatus, OwnerId, Payment,
    PaymentId, PaymentStatus, RedemptionToken, Reservation, ReservationRequest, Ticket, TicketId,
    TicketStatus, TicketTransition,
};

fn poisoned(what: &str) -> StoreError {
    StoreError::Unavailable(format!("{what} lock poisoned"))
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, StoreError> {
    mutex.lock().map_err(|_| poisoned(what))
}

fn read<'a, T>(lock: &'a RwLock<T>, what: &str) -> Result<RwLockReadGuard<'a, T>, StoreError> {
    lock.read().map_err(|_| poisoned(what))
}

fn write<'a, T>(lock: &'a RwLock<T>, what: &str) -> Result<RwLockWriteGuard<'a, T>, StoreError> {
    lock.write().map_err(|_| poisoned(what))
}

#[derive(Debug)]
struct EventSlot {
    event: Event,
    tickets: Vec<TicketId>,
}

#[derive(Debug, Default)]
struct TicketTable {
    by_id: HashMap<TicketId, Arc<Mutex<Ticket>>>,
    order: Vec<TicketId>,
}

/// An outbox row, as seen by tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxRecord {
    /// Entry ID
    pub id: OutboxId,
    /// Payload
    pub message: OutboxMessage,
    /// Delivery status
    pub status: OutboxStatus,
    /// Claims so far
    pub attempts: u32,
    /// Earliest time the entry can be claimed again
    pub available_at: DateTime<Utc>,
    /// Error from the latest failed attempt
    pub last_error: Option<String>,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
    /// When delivery succeeded
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Faults {
    reserve: VecDeque<StoreError>,
    transition: VecDeque<StoreError>,
}

/// Thread-safe in-memory ticket store.
#[derive(Debug, Default)]
pub struct InMemoryTicketStore {
    events: RwLock<HashMap<EventId, Arc<Mutex<EventSlot>>>>,
    tickets: RwLock<TicketTable>,
    payments: Mutex<HashMap<PaymentId, Payment>>,
    payment_gate: Mutex<()>,
    outbox: Mutex<Vec<OutboxRecord>>,
    faults: Mutex<Faults>,
}

impl InMemoryTicketStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `reserve` call fail with `error` before taking any lock.
    ///
    /// Calls queue up: injecting twice fails the next two reservations.
    pub fn fail_next_reserve(&self, error: StoreError) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.reserve.push_back(error);
        }
    }

    /// Make the next `transition_ticket` call fail with `error`.
    pub fn fail_next_transition(&self, error: StoreError) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.transition.push_back(error);
        }
    }

    /// Insert a ticket directly, bypassing capacity checks.
    ///
    /// Seeds fixtures such as pre-revoked tickets. The event must exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the ticket's event is unknown.
    pub fn seed_ticket(&self, ticket: Ticket) -> Result<(), StoreError> {
        let slot = self
            .event_slot(ticket.event_id)?
            .ok_or_else(|| StoreError::Corrupt(format!("unknown event {}", ticket.event_id)))?;
        let mut slot = lock(&slot, "event")?;
        let mut table = write(&self.tickets, "ticket table")?;
        slot.tickets.push(ticket.id);
        table.order.push(ticket.id);
        table.by_id.insert(ticket.id, Arc::new(Mutex::new(ticket)));
        Ok(())
    }

    /// Tickets of `event_id` occupying a seat under `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a poisoned lock.
    pub fn sold(&self, event_id: EventId, policy: CapacityPolicy) -> Result<u32, StoreError> {
        let Some(slot) = self.event_slot(event_id)? else {
            return Ok(0);
        };
        let slot = lock(&slot, "event")?;
        self.count_sold(&slot, policy)
    }

    /// Snapshot of every outbox row, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a poisoned lock.
    pub fn outbox_records(&self) -> Result<Vec<OutboxRecord>, StoreError> {
        Ok(lock(&self.outbox, "outbox")?.clone())
    }

    fn event_slot(&self, event_id: EventId) -> Result<Option<Arc<Mutex<EventSlot>>>, StoreError> {
        Ok(read(&self.events, "event table")?.get(&event_id).cloned())
    }

    fn ticket_cell(&self, ticket_id: TicketId) -> Result<Option<Arc<Mutex<Ticket>>>, StoreError> {
        Ok(read(&self.tickets, "ticket table")?.by_id.get(&ticket_id).cloned())
    }

    fn tickets_of(&self, slot: &EventSlot) -> Result<Vec<Ticket>, StoreError> {
        let table = read(&self.tickets, "ticket table")?;
        slot.tickets
            .iter()
            .filter_map(|id| table.by_id.get(id))
            .map(|cell| lock(cell, "ticket").map(|ticket| ticket.clone()))
            .collect()
    }

    fn count_sold(&self, slot: &EventSlot, policy: CapacityPolicy) -> Result<u32, StoreError> {
        let sold = self
            .tickets_of(slot)?
            .iter()
            .filter(|ticket| policy.counts(ticket.status))
            .count();
        u32::try_from(sold).map_err(|_| StoreError::Corrupt("sold count overflow".to_string()))
    }

    fn take_fault(&self, pick: fn(&mut Faults) -> &mut VecDeque<StoreError>) -> Option<StoreError> {
        self.faults.lock().ok().and_then(|mut faults| pick(&mut faults).pop_front())
    }

    fn reserve_locked(
        &self,
        request: &ReservationRequest,
        policy: CapacityPolicy,
        issuer: &dyn TokenIssuer,
        issued_at: DateTime<Utc>,
    ) -> Result<Reservation, InventoryError> {
        let event_id = request.event_id;
        let store_err = |error| InventoryError::from_store(event_id, error);

        if let Some(error) = self.take_fault(|faults| &mut faults.reserve) {
            return Err(store_err(error));
        }
        if request.quantity == 0 {
            return Err(InventoryError::InvalidQuantity);
        }

        let _payment_gate = request
            .payment_id
            .as_ref()
            .map(|_| lock(&self.payment_gate, "payment gate"))
            .transpose()
            .map_err(store_err)?;

        let slot = self
            .event_slot(event_id)
            .map_err(store_err)?
            .ok_or(InventoryError::NotFound(event_id))?;
        let mut slot = lock(&slot, "event").map_err(store_err)?;

        if let Some(payment_id) = &request.payment_id {
            let existing = self
                .tickets_matching(|ticket| ticket.payment_id.as_ref() == Some(payment_id))
                .map_err(store_err)?;
            if let Some(funded) = existing.first() {
                if funded.event_id != event_id || funded.owner_id != request.requester_id {
                    return Err(InventoryError::PaymentConflict {
                        payment_id: payment_id.clone(),
                        funded_event: funded.event_id,
                    });
                }
                return Ok(Reservation {
                    tickets: existing,
                    replayed: true,
                });
            }
        }

        if !slot.event.is_on_sale() {
            return Err(InventoryError::NotAvailable {
                event_id,
                status: slot.event.status,
            });
        }

        let sold = self.count_sold(&slot, policy).map_err(store_err)?;
        let capacity = slot.event.capacity;
        if u64::from(sold) + u64::from(request.quantity) > u64::from(capacity.value()) {
            return Err(InventoryError::SoldOut {
                event_id,
                requested: request.quantity,
                remaining: capacity.remaining(sold),
            });
        }

        // Mint every ticket before touching shared state so a token failure
        // leaves nothing behind.
        let mut minted = Vec::new();
        for _ in 0..request.quantity {
            let id = TicketId::new();
            let claims = TicketClaims {
                ticket_id: id,
                event_id,
                owner_id: request.requester_id,
            };
            let token = issuer
                .issue(&claims)
                .map_err(|e| InventoryError::TokenIssuance(e.to_string()))?;
            minted.push(Ticket {
                id,
                event_id,
                owner_id: request.requester_id,
                payment_id: request.payment_id.clone(),
                redemption_token: token,
                status: TicketStatus::Active,
                issued_at,
                used_at: None,
                revoked_at: None,
            });
        }

        let mut table = write(&self.tickets, "ticket table").map_err(store_err)?;
        let mut outbox = lock(&self.outbox, "outbox").map_err(store_err)?;
        for ticket in &minted {
            slot.tickets.push(ticket.id);
            table.order.push(ticket.id);
            table.by_id.insert(ticket.id, Arc::new(Mutex::new(ticket.clone())));
        }
        outbox.push(OutboxRecord {
            id: OutboxId::new(),
            message: OutboxMessage::TicketsIssued {
                event_id,
                owner_id: request.requester_id,
                payment_id: request.payment_id.clone(),
                ticket_ids: minted.iter().map(|ticket| ticket.id).collect(),
                issued_at,
            },
            status: OutboxStatus::Pending,
            attempts: 0,
            available_at: issued_at,
            last_error: None,
            created_at: issued_at,
            delivered_at: None,
        });

        Ok(Reservation {
            tickets: minted,
            replayed: false,
        })
    }

    fn transition_locked(
        &self,
        ticket_id: TicketId,
        transition: TicketTransition,
        at: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        if let Some(error) = self.take_fault(|faults| &mut faults.transition) {
            return Err(error);
        }
        let Some(cell) = self.ticket_cell(ticket_id)? else {
            return Ok(Transition::Missing);
        };
        let mut ticket = lock(&cell, "ticket")?;
        if ticket.status != TicketStatus::Active {
            return Ok(Transition::Rejected(ticket.clone()));
        }
        ticket.status = transition.target();
        match transition {
            TicketTransition::Redeem => ticket.used_at = Some(at),
            TicketTransition::Revoke => ticket.revoked_at = Some(at),
        }
        Ok(Transition::Applied(ticket.clone()))
    }

    fn set_capacity_locked(
        &self,
        event_id: EventId,
        capacity: Capacity,
        policy: CapacityPolicy,
        at: DateTime<Utc>,
    ) -> Result<CapacityChange, StoreError> {
        let Some(slot) = self.event_slot(event_id)? else {
            return Ok(CapacityChange::Missing);
        };
        let mut slot = lock(&slot, "event")?;
        let sold = self.count_sold(&slot, policy)?;
        if capacity.value() < sold {
            return Ok(CapacityChange::BelowSold { sold });
        }
        slot.event.capacity = capacity;
        slot.event.updated_at = at;
        Ok(CapacityChange::Updated(slot.event.clone()))
    }

    fn published_page(&self, page: u32, limit: u32) -> Result<Vec<Event>, StoreError> {
        let slots: Vec<Arc<Mutex<EventSlot>>> =
            read(&self.events, "event table")?.values().cloned().collect();
        let mut published = Vec::new();
        for slot in &slots {
            let slot = lock(slot, "event")?;
            if slot.event.status == EventStatus::Published {
                published.push(slot.event.clone());
            }
        }
        published.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let skip = (page.max(1) as usize - 1).saturating_mul(limit as usize);
        Ok(published.into_iter().skip(skip).take(limit as usize).collect())
    }

    fn tickets_matching(&self, keep: impl Fn(&Ticket) -> bool) -> Result<Vec<Ticket>, StoreError> {
        let table = read(&self.tickets, "ticket table")?;
        let mut tickets = Vec::new();
        for id in &table.order {
            if let Some(cell) = table.by_id.get(id) {
                let ticket = lock(cell, "ticket")?;
                if keep(&ticket) {
                    tickets.push(ticket.clone());
                }
            }
        }
        Ok(tickets)
    }
}

impl TicketStore for InMemoryTicketStore {
    fn insert_event(&self, event: Event) -> BoxFuture<'_, Result<Event, StoreError>> {
        let result = write(&self.events, "event table").map(|mut events| {
            events.insert(
                event.id,
                Arc::new(Mutex::new(EventSlot {
                    event: event.clone(),
                    tickets: Vec::new(),
                })),
            );
            event
        });
        Box::pin(async move { result })
    }

    fn load_event(&self, event_id: EventId) -> BoxFuture<'_, Result<Option<Event>, StoreError>> {
        let result = self.event_slot(event_id).and_then(|slot| {
            slot.map(|slot| lock(&slot, "event").map(|slot| slot.event.clone()))
                .transpose()
        });
        Box::pin(async move { result })
    }

    fn list_published(&self, page: u32, limit: u32) -> BoxFuture<'_, Result<Vec<Event>, StoreError>> {
        let result = self.published_page(page, limit);
        Box::pin(async move { result })
    }

    fn set_event_status(
        &self,
        event_id: EventId,
        expected: EventStatus,
        next: EventStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Option<Event>, StoreError>> {
        let result = self.event_slot(event_id).and_then(|slot| {
            let Some(slot) = slot else {
                return Ok(None);
            };
            let mut slot = lock(&slot, "event")?;
            if slot.event.status != expected {
                return Ok(None);
            }
            slot.event.status = next;
            slot.event.updated_at = at;
            Ok(Some(slot.event.clone()))
        });
        Box::pin(async move { result })
    }

    fn set_capacity(
        &self,
        event_id: EventId,
        capacity: Capacity,
        policy: CapacityPolicy,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<CapacityChange, StoreError>> {
        let result = self.set_capacity_locked(event_id, capacity, policy, at);
        Box::pin(async move { result })
    }

    fn availability(
        &self,
        event_id: EventId,
        policy: CapacityPolicy,
    ) -> BoxFuture<'_, Result<Option<Availability>, StoreError>> {
        let result = self.event_slot(event_id).and_then(|slot| {
            let Some(slot) = slot else {
                return Ok(None);
            };
            let slot = lock(&slot, "event")?;
            Ok(Some(Availability {
                event_id,
                status: slot.event.status,
                capacity: slot.event.capacity,
                sold: self.count_sold(&slot, policy)?,
            }))
        });
        Box::pin(async move { result })
    }

    fn reserve<'a>(
        &'a self,
        request: &'a ReservationRequest,
        policy: CapacityPolicy,
        issuer: &'a dyn TokenIssuer,
        issued_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Reservation, InventoryError>> {
        let result = self.reserve_locked(request, policy, issuer, issued_at);
        Box::pin(async move { result })
    }

    fn load_ticket(
        &self,
        ticket_id: TicketId,
    ) -> BoxFuture<'_, Result<Option<Ticket>, StoreError>> {
        let result = self.ticket_cell(ticket_id).and_then(|cell| {
            cell.map(|cell| lock(&cell, "ticket").map(|ticket| ticket.clone()))
                .transpose()
        });
        Box::pin(async move { result })
    }

    fn transition_ticket(
        &self,
        ticket_id: TicketId,
        transition: TicketTransition,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Transition, StoreError>> {
        let result = self.transition_locked(ticket_id, transition, at);
        Box::pin(async move { result })
    }

    fn tickets_for_owner(
        &self,
        owner_id: OwnerId,
    ) -> BoxFuture<'_, Result<Vec<Ticket>, StoreError>> {
        let result = self
            .tickets_matching(|ticket| ticket.owner_id == owner_id)
            .map(|mut tickets| {
                tickets.reverse();
                tickets.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
                tickets
            });
        Box::pin(async move { result })
    }

    fn tickets_for_payment<'a>(
        &'a self,
        payment_id: &'a PaymentId,
    ) -> BoxFuture<'a, Result<Vec<Ticket>, StoreError>> {
        let result =
            self.tickets_matching(|ticket| ticket.payment_id.as_ref() == Some(payment_id));
        Box::pin(async move { result })
    }
}

impl PaymentStore for InMemoryTicketStore {
    fn insert_payment(&self, payment: Payment) -> BoxFuture<'_, Result<bool, StoreError>> {
        let result = lock(&self.payments, "payments").map(|mut payments| {
            if payments.contains_key(&payment.reference) {
                return false;
            }
            payments.insert(payment.reference.clone(), payment);
            true
        });
        Box::pin(async move { result })
    }

    fn load_payment<'a>(
        &'a self,
        reference: &'a PaymentId,
    ) -> BoxFuture<'a, Result<Option<Payment>, StoreError>> {
        let result =
            lock(&self.payments, "payments").map(|payments| payments.get(reference).cloned());
        Box::pin(async move { result })
    }

    fn set_payment_status<'a>(
        &'a self,
        reference: &'a PaymentId,
        expected: PaymentStatus,
        next: PaymentStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<Payment>, StoreError>> {
        let result = lock(&self.payments, "payments").map(|mut payments| {
            let payment = payments
                .get_mut(reference)
                .filter(|payment| payment.status == expected)?;
            payment.status = next;
            payment.updated_at = at;
            Some(payment.clone())
        });
        Box::pin(async move { result })
    }
}

impl OutboxStore for InMemoryTicketStore {
    fn claim_pending(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> BoxFuture<'_, Result<Vec<OutboxEntry>, StoreError>> {
        let result = lock(&self.outbox, "outbox").and_then(|mut outbox| {
            let lease = chrono::Duration::from_std(lease)
                .map_err(|e| StoreError::Unavailable(format!("invalid lease: {e}")))?;
            Ok(outbox
                .iter_mut()
                .filter(|record| record.status == OutboxStatus::Pending && record.available_at <= now)
                .take(limit)
                .map(|record| {
                    record.attempts += 1;
                    record.available_at = now + lease;
                    OutboxEntry {
                        id: record.id,
                        message: record.message.clone(),
                        attempts: record.attempts,
                        created_at: record.created_at,
                    }
                })
                .collect())
        });
        Box::pin(async move { result })
    }

    fn mark_delivered(
        &self,
        id: OutboxId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        let result = lock(&self.outbox, "outbox").map(|mut outbox| {
            if let Some(record) = outbox.iter_mut().find(|record| record.id == id) {
                record.status = OutboxStatus::Delivered;
                record.delivered_at = Some(at);
            }
        });
        Box::pin(async move { result })
    }

    fn mark_failed<'a>(
        &'a self,
        id: OutboxId,
        error: &'a str,
        retry_at: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        let result = lock(&self.outbox, "outbox").map(|mut outbox| {
            if let Some(record) = outbox.iter_mut().find(|record| record.id == id) {
                record.last_error = Some(error.to_string());
                match retry_at {
                    Some(at) => record.available_at = at,
                    None => record.status = OutboxStatus::Dead,
                }
            }
        });
        Box::pin(async move { result })
    }
}

/// Token issuer that encodes claims in the clear.
///
/// Format: `plain.<ticket_id>.<event_id>.<owner_id>`. Only for tests that need a
/// [`TokenIssuer`] without key material.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTokenIssuer;

impl TokenIssuer for PlainTokenIssuer {
    fn issue(
        &self,
        claims: &TicketClaims,
    ) -> Result<RedemptionToken, turnstile_core::token::TokenError> {
        Ok(RedemptionToken::new(format!(
            "plain.{}.{}.{}",
            claims.ticket_id, claims.event_id, claims.owner_id
        )))
    }
}

impl turnstile_core::token::TokenVerifier for PlainTokenIssuer {
    fn verify(&self, token: &str) -> Result<TicketClaims, turnstile_core::token::TokenError> {
        use turnstile_core::token::TokenError;

        let malformed = || TokenError::Malformed(token.to_string());
        let parts: Vec<&str> = token.split('.').collect();
        let ["plain", ticket, event, owner] = parts.as_slice() else {
            return Err(malformed());
        };
        let parse = |raw: &str| uuid::Uuid::parse_str(raw).map_err(|_| malformed());
        Ok(TicketClaims {
            ticket_id: TicketId::from_uuid(parse(*ticket)?),
            event_id: EventId::from_uuid(parse(*event)?),
            owner_id: OwnerId::from_uuid(parse(*owner)?),
        })
    }
}

/// Token issuer that always fails, for rollback tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingTokenIssuer;

impl TokenIssuer for FailingTokenIssuer {
    fn issue(
        &self,
        _claims: &TicketClaims,
    ) -> Result<RedemptionToken, turnstile_core::token::TokenError> {
        Err(turnstile_core::token::TokenError::Key(
            "signing key unavailable".to_string(),
        ))
    }
}
