//! `PostgreSQL` implementation of the ticket, payment and outbox stores.

use crate::error::classify;
use crate::rows::{
    EVENT_COLUMNS, EventRow, PAYMENT_COLUMNS, PaymentRow, TICKET_COLUMNS, TicketRow,
    capacity_from_db, capacity_to_db, count_from_db, event_status_from_db, tickets_from_rows,
};
use chrono::{DateTime, Utc};
use sqlx::types::{Json, Uuid};
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use turnstile_core::error::{InventoryError, StoreError};
use turnstile_core::outbox::{OutboxEntry, OutboxId, OutboxMessage};
use turnstile_core::store::{
    BoxFuture, CapacityChange, OutboxStore, PaymentStore, TicketStore, Transition,
};
use turnstile_core::token::{TicketClaims, TokenIssuer};
use turnstile_core::{
    Availability, Capacity, CapacityPolicy, Event, EventId, EventStatus, OwnerId, Payment,
    PaymentId, PaymentStatus, Reservation, ReservationRequest, Ticket, TicketId,
    TicketTransition,
};

/// Default bound on how long a reservation waits for the event row lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Ticket store backed by a `PgPool`.
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone, Debug)]
pub struct PostgresTicketStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresTicketStore {
    /// Create a store over `pool` with the default lock timeout.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Bound the wait for an event row lock. Expiry surfaces as contention.
    #[must_use]
    pub const fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Start a transaction whose lock waits give up after `lock_timeout`.
    async fn begin(&self) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let timeout_ms = self.lock_timeout.as_millis().max(1);
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{timeout_ms}ms"))
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn lock_event(
        tx: &mut Transaction<'static, Postgres>,
        event_id: EventId,
    ) -> Result<Option<EventRow>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 FOR UPDATE"
        ))
        .bind(*event_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
    }

    async fn count_sold(
        tx: &mut Transaction<'static, Postgres>,
        event_id: EventId,
        policy: CapacityPolicy,
    ) -> Result<i64, sqlx::Error> {
        let (sold,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM tickets WHERE event_id = $1 AND status = ANY($2)")
                .bind(*event_id.as_uuid())
                .bind(status_names(policy))
                .fetch_one(&mut **tx)
                .await?;
        Ok(sold)
    }

    async fn reserve_in_tx(
        &self,
        request: &ReservationRequest,
        policy: CapacityPolicy,
        issuer: &dyn TokenIssuer,
        issued_at: DateTime<Utc>,
    ) -> Result<Reservation, InventoryError> {
        let event_id = request.event_id;
        let db_err = |e: sqlx::Error| InventoryError::from_store(event_id, classify(&e));
        let store_err = |e: StoreError| InventoryError::from_store(event_id, e);

        if request.quantity == 0 {
            return Err(InventoryError::InvalidQuantity);
        }

        let mut tx = self.begin().await.map_err(db_err)?;

        // Taken before the event row lock, so deliveries of one charge queue
        // here whichever event they name.
        if let Some(payment_id) = &request.payment_id {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(payment_id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        let event = Self::lock_event(&mut tx, event_id)
            .await
            .map_err(db_err)?
            .ok_or(InventoryError::NotFound(event_id))
            .and_then(|row| Event::try_from(row).map_err(store_err))?;

        if let Some(payment_id) = &request.payment_id {
            let rows: Vec<TicketRow> = sqlx::query_as(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets WHERE payment_id = $1 ORDER BY issue_seq"
            ))
            .bind(payment_id.as_str())
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;

            if !rows.is_empty() {
                let existing = tickets_from_rows(rows).map_err(store_err)?;
                if let Some(funded) = existing
                    .iter()
                    .find(|t| t.event_id != event_id || t.owner_id != request.requester_id)
                {
                    tracing::warn!(
                        %event_id,
                        %payment_id,
                        funded_event = %funded.event_id,
                        "Payment reference reused for a different purchase"
                    );
                    return Err(InventoryError::PaymentConflict {
                        payment_id: payment_id.clone(),
                        funded_event: funded.event_id,
                    });
                }
                tx.commit().await.map_err(db_err)?;
                tracing::info!(%event_id, %payment_id, "Payment already fulfilled, returning existing tickets");
                return Ok(Reservation {
                    tickets: existing,
                    replayed: true,
                });
            }
        }

        if !event.is_on_sale() {
            return Err(InventoryError::NotAvailable {
                event_id,
                status: event.status,
            });
        }

        let sold = Self::count_sold(&mut tx, event_id, policy)
            .await
            .map_err(db_err)?;
        let capacity = i64::from(event.capacity.value());
        if sold + i64::from(request.quantity) > capacity {
            let sold = count_from_db(sold).map_err(store_err)?;
            return Err(InventoryError::SoldOut {
                event_id,
                requested: request.quantity,
                remaining: event.capacity.remaining(sold),
            });
        }

        let mut tickets = Vec::with_capacity(request.quantity as usize);
        for _ in 0..request.quantity {
            let (id,): (Uuid,) = sqlx::query_as(
                "INSERT INTO tickets (event_id, owner_id, payment_id, status, issued_at) \
                 VALUES ($1, $2, $3, 'active', $4) RETURNING id",
            )
            .bind(*event_id.as_uuid())
            .bind(*request.requester_id.as_uuid())
            .bind(request.payment_id.as_ref().map(PaymentId::as_str))
            .bind(issued_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

            let claims = TicketClaims {
                ticket_id: TicketId::from_uuid(id),
                event_id,
                owner_id: request.requester_id,
            };
            let token = issuer
                .issue(&claims)
                .map_err(|e| InventoryError::TokenIssuance(e.to_string()))?;

            let row: TicketRow = sqlx::query_as(&format!(
                "UPDATE tickets SET redemption_token = $2 WHERE id = $1 RETURNING {TICKET_COLUMNS}"
            ))
            .bind(id)
            .bind(token.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
            tickets.push(Ticket::try_from(row).map_err(store_err)?);
        }

        let message = OutboxMessage::TicketsIssued {
            event_id,
            owner_id: request.requester_id,
            payment_id: request.payment_id.clone(),
            ticket_ids: tickets.iter().map(|ticket| ticket.id).collect(),
            issued_at,
        };
        sqlx::query(
            "INSERT INTO ticket_outbox (id, kind, payload, available_at, created_at) \
             VALUES ($1, $2, $3, $4, $4)",
        )
        .bind(*OutboxId::new().as_uuid())
        .bind(message.kind())
        .bind(Json(&message))
        .bind(issued_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        tracing::debug!(
            %event_id,
            quantity = request.quantity,
            sold_before = sold,
            "Reservation committed"
        );

        Ok(Reservation {
            tickets,
            replayed: false,
        })
    }

    async fn set_capacity_in_tx(
        &self,
        event_id: EventId,
        capacity: Capacity,
        policy: CapacityPolicy,
        at: DateTime<Utc>,
    ) -> Result<CapacityChange, StoreError> {
        let db_err = |e: sqlx::Error| classify(&e);
        let mut tx = self.begin().await.map_err(db_err)?;

        if Self::lock_event(&mut tx, event_id)
            .await
            .map_err(db_err)?
            .is_none()
        {
            return Ok(CapacityChange::Missing);
        }

        let sold = count_from_db(
            Self::count_sold(&mut tx, event_id, policy)
                .await
                .map_err(db_err)?,
        )?;
        if capacity.value() < sold {
            return Ok(CapacityChange::BelowSold { sold });
        }

        let row: EventRow = sqlx::query_as(&format!(
            "UPDATE events SET capacity = $2, updated_at = $3 WHERE id = $1 RETURNING {EVENT_COLUMNS}"
        ))
        .bind(*event_id.as_uuid())
        .bind(capacity_to_db(capacity)?)
        .bind(at)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(CapacityChange::Updated(Event::try_from(row)?))
    }

    async fn fetch_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>, StoreError> {
        let row: Option<TicketRow> =
            sqlx::query_as(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"))
                .bind(*ticket_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| classify(&e))?;
        row.map(Ticket::try_from).transpose()
    }
}

fn status_names(policy: CapacityPolicy) -> Vec<&'static str> {
    policy
        .counted_statuses()
        .iter()
        .map(turnstile_core::TicketStatus::as_str)
        .collect()
}

impl TicketStore for PostgresTicketStore {
    fn insert_event(&self, event: Event) -> BoxFuture<'_, Result<Event, StoreError>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO events (id, title, capacity, status, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(*event.id.as_uuid())
            .bind(&event.title)
            .bind(capacity_to_db(event.capacity)?)
            .bind(event.status.as_str())
            .bind(event.created_at)
            .bind(event.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(&e))?;
            Ok(event)
        })
    }

    fn load_event(&self, event_id: EventId) -> BoxFuture<'_, Result<Option<Event>, StoreError>> {
        Box::pin(async move {
            let row: Option<EventRow> =
                sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
                    .bind(*event_id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| classify(&e))?;
            row.map(Event::try_from).transpose()
        })
    }

    fn list_published(&self, page: u32, limit: u32) -> BoxFuture<'_, Result<Vec<Event>, StoreError>> {
        Box::pin(async move {
            let offset = i64::from(page.max(1) - 1) * i64::from(limit);
            let rows: Vec<EventRow> = sqlx::query_as(&format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE status = 'published' \
                 ORDER BY created_at, id LIMIT $1 OFFSET $2"
            ))
            .bind(i64::from(limit))
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(&e))?;
            rows.into_iter().map(Event::try_from).collect()
        })
    }

    fn set_event_status(
        &self,
        event_id: EventId,
        expected: EventStatus,
        next: EventStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Option<Event>, StoreError>> {
        Box::pin(async move {
            let row: Option<EventRow> = sqlx::query_as(&format!(
                "UPDATE events SET status = $3, updated_at = $4 \
                 WHERE id = $1 AND status = $2 RETURNING {EVENT_COLUMNS}"
            ))
            .bind(*event_id.as_uuid())
            .bind(expected.as_str())
            .bind(next.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(&e))?;
            row.map(Event::try_from).transpose()
        })
    }

    fn set_capacity(
        &self,
        event_id: EventId,
        capacity: Capacity,
        policy: CapacityPolicy,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<CapacityChange, StoreError>> {
        Box::pin(self.set_capacity_in_tx(event_id, capacity, policy, at))
    }

    fn availability(
        &self,
        event_id: EventId,
        policy: CapacityPolicy,
    ) -> BoxFuture<'_, Result<Option<Availability>, StoreError>> {
        Box::pin(async move {
            let row: Option<(String, i32, i64)> = sqlx::query_as(
                "SELECT e.status, e.capacity, \
                    (SELECT COUNT(*) FROM tickets t WHERE t.event_id = e.id AND t.status = ANY($2)) \
                 FROM events e WHERE e.id = $1",
            )
            .bind(*event_id.as_uuid())
            .bind(status_names(policy))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(&e))?;

            row.map(|(status, capacity, sold)| -> Result<Availability, StoreError> {
                Ok(Availability {
                    event_id,
                    status: event_status_from_db(&status)?,
                    capacity: capacity_from_db(capacity)?,
                    sold: count_from_db(sold)?,
                })
            })
            .transpose()
        })
    }

    fn reserve<'a>(
        &'a self,
        request: &'a ReservationRequest,
        policy: CapacityPolicy,
        issuer: &'a dyn TokenIssuer,
        issued_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Reservation, InventoryError>> {
        Box::pin(self.reserve_in_tx(request, policy, issuer, issued_at))
    }

    fn load_ticket(
        &self,
        ticket_id: TicketId,
    ) -> BoxFuture<'_, Result<Option<Ticket>, StoreError>> {
        Box::pin(self.fetch_ticket(ticket_id))
    }

    fn transition_ticket(
        &self,
        ticket_id: TicketId,
        transition: TicketTransition,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Transition, StoreError>> {
        Box::pin(async move {
            let set_clause = match transition {
                TicketTransition::Redeem => "status = 'used', used_at = $2",
                TicketTransition::Revoke => "status = 'revoked', revoked_at = $2",
            };
            let applied: Option<TicketRow> = sqlx::query_as(&format!(
                "UPDATE tickets SET {set_clause} \
                 WHERE id = $1 AND status = 'active' RETURNING {TICKET_COLUMNS}"
            ))
            .bind(*ticket_id.as_uuid())
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(&e))?;

            if let Some(row) = applied {
                return Ok(Transition::Applied(Ticket::try_from(row)?));
            }

            // Terminal states never change, so a read after the failed CAS
            // observes the state that won.
            Ok(match self.fetch_ticket(ticket_id).await? {
                Some(ticket) => Transition::Rejected(ticket),
                None => Transition::Missing,
            })
        })
    }

    fn tickets_for_owner(
        &self,
        owner_id: OwnerId,
    ) -> BoxFuture<'_, Result<Vec<Ticket>, StoreError>> {
        Box::pin(async move {
            let rows: Vec<TicketRow> = sqlx::query_as(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets WHERE owner_id = $1 \
                 ORDER BY issued_at DESC, issue_seq DESC"
            ))
            .bind(*owner_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(&e))?;
            tickets_from_rows(rows)
        })
    }

    fn tickets_for_payment<'a>(
        &'a self,
        payment_id: &'a PaymentId,
    ) -> BoxFuture<'a, Result<Vec<Ticket>, StoreError>> {
        Box::pin(async move {
            let rows: Vec<TicketRow> = sqlx::query_as(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets WHERE payment_id = $1 ORDER BY issue_seq"
            ))
            .bind(payment_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(&e))?;
            tickets_from_rows(rows)
        })
    }
}

impl PaymentStore for PostgresTicketStore {
    fn insert_payment(&self, payment: Payment) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            let quantity = i32::try_from(payment.quantity).map_err(|_| {
                StoreError::Unavailable(format!("Quantity out of range: {}", payment.quantity))
            })?;
            let inserted = sqlx::query(
                "INSERT INTO payments (reference, event_id, owner_id, quantity, status, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (reference) DO NOTHING",
            )
            .bind(payment.reference.as_str())
            .bind(*payment.event_id.as_uuid())
            .bind(*payment.owner_id.as_uuid())
            .bind(quantity)
            .bind(payment.status.as_str())
            .bind(payment.created_at)
            .bind(payment.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(&e))?
            .rows_affected();
            Ok(inserted == 1)
        })
    }

    fn load_payment<'a>(
        &'a self,
        reference: &'a PaymentId,
    ) -> BoxFuture<'a, Result<Option<Payment>, StoreError>> {
        Box::pin(async move {
            let row: Option<PaymentRow> = sqlx::query_as(&format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments WHERE reference = $1"
            ))
            .bind(reference.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(&e))?;
            row.map(Payment::try_from).transpose()
        })
    }

    fn set_payment_status<'a>(
        &'a self,
        reference: &'a PaymentId,
        expected: PaymentStatus,
        next: PaymentStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<Payment>, StoreError>> {
        Box::pin(async move {
            let row: Option<PaymentRow> = sqlx::query_as(&format!(
                "UPDATE payments SET status = $3, updated_at = $4 \
                 WHERE reference = $1 AND status = $2 RETURNING {PAYMENT_COLUMNS}"
            ))
            .bind(reference.as_str())
            .bind(expected.as_str())
            .bind(next.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(&e))?;
            row.map(Payment::try_from).transpose()
        })
    }
}

impl OutboxStore for PostgresTicketStore {
    fn claim_pending(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> BoxFuture<'_, Result<Vec<OutboxEntry>, StoreError>> {
        Box::pin(async move {
            let lease = chrono::Duration::from_std(lease)
                .map_err(|e| StoreError::Unavailable(format!("Invalid lease: {e}")))?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);

            let mut rows: Vec<(Uuid, Json<OutboxMessage>, i32, DateTime<Utc>)> = sqlx::query_as(
                "UPDATE ticket_outbox SET attempts = attempts + 1, available_at = $2 \
                 WHERE id IN ( \
                     SELECT id FROM ticket_outbox \
                     WHERE status = 'pending' AND available_at <= $1 \
                     ORDER BY created_at \
                     LIMIT $3 \
                     FOR UPDATE SKIP LOCKED \
                 ) \
                 RETURNING id, payload, attempts, created_at",
            )
            .bind(now)
            .bind(now + lease)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(&e))?;

            rows.sort_by_key(|(_, _, _, created_at)| *created_at);
            rows.into_iter()
                .map(|(id, Json(message), attempts, created_at)| -> Result<OutboxEntry, StoreError> {
                    Ok(OutboxEntry {
                        id: OutboxId::from_uuid(id),
                        message,
                        attempts: u32::try_from(attempts).map_err(|_| {
                            StoreError::Corrupt(format!("Invalid attempt count: {attempts}"))
                        })?,
                        created_at,
                    })
                })
                .collect()
        })
    }

    fn mark_delivered(
        &self,
        id: OutboxId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            sqlx::query(
                "UPDATE ticket_outbox SET status = 'delivered', delivered_at = $2 WHERE id = $1",
            )
            .bind(*id.as_uuid())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(&e))?;
            Ok(())
        })
    }

    fn mark_failed<'a>(
        &'a self,
        id: OutboxId,
        error: &'a str,
        retry_at: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let query = match retry_at {
                Some(at) => sqlx::query(
                    "UPDATE ticket_outbox SET last_error = $2, available_at = $3 WHERE id = $1",
                )
                .bind(*id.as_uuid())
                .bind(error)
                .bind(at),
                None => sqlx::query(
                    "UPDATE ticket_outbox SET last_error = $2, status = 'dead' WHERE id = $1",
                )
                .bind(*id.as_uuid())
                .bind(error),
            };
            query.execute(&self.pool).await.map_err(|e| classify(&e))?;

            if retry_at.is_none() {
                tracing::warn!(outbox_id = %id, error, "Outbox entry marked dead");
            }
            Ok(())
        })
    }
}
