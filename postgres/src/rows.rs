//! Row types and their conversion into domain values.

use chrono::{DateTime, Utc};
use sqlx::types::Uuid;
use turnstile_core::{
    Capacity, Event, EventId, EventStatus, OwnerId, Payment, PaymentId, PaymentStatus,
    RedemptionToken, StoreError, Ticket, TicketId, TicketStatus,
};

pub(crate) const EVENT_COLUMNS: &str = "id, title, capacity, status, created_at, updated_at";

pub(crate) const TICKET_COLUMNS: &str = "id, event_id, owner_id, payment_id, redemption_token, \
     status, issued_at, used_at, revoked_at";

pub(crate) const PAYMENT_COLUMNS: &str =
    "reference, event_id, owner_id, quantity, status, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EventRow {
    id: Uuid,
    title: String,
    capacity: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: EventId::from_uuid(row.id),
            title: row.title,
            capacity: capacity_from_db(row.capacity)?,
            status: event_status_from_db(&row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TicketRow {
    id: Uuid,
    event_id: Uuid,
    owner_id: Uuid,
    payment_id: Option<String>,
    redemption_token: String,
    status: String,
    issued_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let status = TicketStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Corrupt(format!("Invalid ticket status: {}", row.status)))?;
        Ok(Self {
            id: TicketId::from_uuid(row.id),
            event_id: EventId::from_uuid(row.event_id),
            owner_id: OwnerId::from_uuid(row.owner_id),
            payment_id: row.payment_id.map(PaymentId::new),
            redemption_token: RedemptionToken::new(row.redemption_token),
            status,
            issued_at: row.issued_at,
            used_at: row.used_at,
            revoked_at: row.revoked_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PaymentRow {
    reference: String,
    event_id: Uuid,
    owner_id: Uuid,
    quantity: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let status = PaymentStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Corrupt(format!("Invalid payment status: {}", row.status)))?;
        Ok(Self {
            reference: PaymentId::new(row.reference),
            event_id: EventId::from_uuid(row.event_id),
            owner_id: OwnerId::from_uuid(row.owner_id),
            quantity: u32::try_from(row.quantity).map_err(|_| {
                StoreError::Corrupt(format!("Invalid payment quantity: {}", row.quantity))
            })?,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(crate) fn tickets_from_rows(rows: Vec<TicketRow>) -> Result<Vec<Ticket>, StoreError> {
    rows.into_iter().map(Ticket::try_from).collect()
}

pub(crate) fn event_status_from_db(status: &str) -> Result<EventStatus, StoreError> {
    EventStatus::parse(status)
        .ok_or_else(|| StoreError::Corrupt(format!("Invalid event status: {status}")))
}

pub(crate) fn capacity_from_db(capacity: i32) -> Result<Capacity, StoreError> {
    u32::try_from(capacity)
        .map(Capacity::new)
        .map_err(|_| StoreError::Corrupt(format!("Negative capacity: {capacity}")))
}

pub(crate) fn capacity_to_db(capacity: Capacity) -> Result<i32, StoreError> {
    i32::try_from(capacity.value())
        .map_err(|_| StoreError::Unavailable(format!("Capacity out of range: {capacity}")))
}

pub(crate) fn count_from_db(count: i64) -> Result<u32, StoreError> {
    u32::try_from(count).map_err(|_| StoreError::Corrupt(format!("Invalid ticket count: {count}")))
}
