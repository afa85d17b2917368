//! Domain types for the ticket inventory core.
//!
//! Identifiers are newtypes over `Uuid` (or the gateway reference for payments),
//! so an `EventId` can never be passed where a `TicketId` is expected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique, unguessable identifier for a ticket (random v4 UUID)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Creates a new random `TicketId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TicketId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the purchaser that owns a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(Uuid);

impl OwnerId {
    /// Creates a new random `OwnerId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `OwnerId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payment that minted a batch of tickets.
///
/// Wraps the gateway's transaction reference, which is unique per charge.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentId(String);

impl PaymentId {
    /// Creates a `PaymentId` from a gateway reference
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// The gateway reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Value Objects
// ============================================================================

/// Maximum number of tickets an event can hold
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Capacity(u32);

impl Capacity {
    /// Largest capacity an event may be given; matches the store's `INTEGER` column
    pub const MAX: u32 = i32::MAX.unsigned_abs();

    /// Creates a new `Capacity`
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the capacity value
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Seats left once `sold` tickets are accounted for (never underflows)
    #[must_use]
    pub const fn remaining(&self, sold: u32) -> u32 {
        self.0.saturating_sub(sold)
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque, signed credential presented at the venue.
///
/// Binds a ticket id, event id and owner id. Produced by a
/// [`TokenIssuer`](crate::token::TokenIssuer).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RedemptionToken(String);

impl RedemptionToken {
    /// Wraps an encoded token
    #[must_use]
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// The encoded token
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RedemptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Statuses
// ============================================================================

/// Lifecycle status of an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    /// Being prepared, not on sale
    Draft,
    /// On sale
    Published,
    /// Called off (terminal)
    Cancelled,
}

impl EventStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether the catalog may move an event from `self` to `next`.
    ///
    /// `Draft -> Published`, `Draft -> Cancelled` and `Published -> Cancelled`
    /// are the only legal moves.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Published | Self::Cancelled) | (Self::Published, Self::Cancelled)
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a ticket
///
/// ```text
/// ACTIVE --redeem--> USED      (terminal)
/// ACTIVE --revoke--> REVOKED   (terminal)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketStatus {
    /// Issued and valid for entry
    Active,
    /// Redeemed at the venue
    Used,
    /// Cancelled by an administrator
    Revoked,
}

impl TicketStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Used => "used",
            Self::Revoked => "revoked",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "used" => Some(Self::Used),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }

    /// `USED` and `REVOKED` admit no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement status of a recorded payment
///
/// ```text
/// PENDING --gateway confirms--> SUCCESSFUL
/// PENDING --gateway declines--> FAILED
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// Initialised, not settled yet
    Pending,
    /// Charge captured and tickets issued
    Successful,
    /// Declined, or captured but unfulfillable
    Failed,
}

impl PaymentStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Successful => "successful",
            Self::Failed => "failed",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "successful" => Some(Self::Successful),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transitions a ticket can take out of `ACTIVE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TicketTransition {
    /// `ACTIVE -> USED`
    Redeem,
    /// `ACTIVE -> REVOKED`
    Revoke,
}

impl TicketTransition {
    /// Status the ticket ends up in.
    #[must_use]
    pub const fn target(&self) -> TicketStatus {
        match self {
            Self::Redeem => TicketStatus::Used,
            Self::Revoke => TicketStatus::Revoked,
        }
    }
}

/// Which ticket states count against an event's capacity.
///
/// Tickets in `ACTIVE` or `USED` always count. Whether a `REVOKED` ticket hands
/// its seat back is a policy choice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapacityPolicy {
    /// Revoked tickets free their seat for resale
    #[default]
    ReleaseRevoked,
    /// Revoked tickets keep occupying capacity
    RetainRevoked,
}

impl CapacityPolicy {
    /// Statuses that occupy a seat under this policy.
    #[must_use]
    pub const fn counted_statuses(&self) -> &'static [TicketStatus] {
        match self {
            Self::ReleaseRevoked => &[TicketStatus::Active, TicketStatus::Used],
            Self::RetainRevoked => &[
                TicketStatus::Active,
                TicketStatus::Used,
                TicketStatus::Revoked,
            ],
        }
    }

    /// Whether a ticket in `status` occupies a seat.
    #[must_use]
    pub fn counts(&self, status: TicketStatus) -> bool {
        self.counted_statuses().contains(&status)
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A ticketed event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event ID
    pub id: EventId,
    /// Display title
    pub title: String,
    /// Maximum tickets that may be ACTIVE or USED at once
    pub capacity: Capacity,
    /// Lifecycle status
    pub status: EventStatus,
    /// When created
    pub created_at: DateTime<Utc>,
    /// Last status or capacity change
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Creates a new event in `Draft`
    #[must_use]
    pub fn draft(title: impl Into<String>, capacity: Capacity, now: DateTime<Utc>) -> Self {
        Self {
            id: EventId::new(),
            title: title.into(),
            capacity,
            status: EventStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether tickets can currently be reserved
    #[must_use]
    pub fn is_on_sale(&self) -> bool {
        self.status == EventStatus::Published
    }
}

/// An issued ticket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket ID
    pub id: TicketId,
    /// Owning event (immutable)
    pub event_id: EventId,
    /// Purchaser
    pub owner_id: OwnerId,
    /// Payment that minted the ticket, if any
    pub payment_id: Option<PaymentId>,
    /// Signed credential presented at the venue
    pub redemption_token: RedemptionToken,
    /// Current status
    pub status: TicketStatus,
    /// When the reservation committed
    pub issued_at: DateTime<Utc>,
    /// When the ticket was redeemed
    pub used_at: Option<DateTime<Utc>>,
    /// When the ticket was revoked
    pub revoked_at: Option<DateTime<Utc>>,
}

/// A charge initialised with the gateway and the purchase it pays for.
///
/// The reference is unique across all events: one charge funds one batch of
/// tickets for one event and one owner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Gateway reference
    pub reference: PaymentId,
    /// Event being paid for
    pub event_id: EventId,
    /// Purchaser
    pub owner_id: OwnerId,
    /// Tickets paid for
    pub quantity: u32,
    /// Settlement status
    pub status: PaymentStatus,
    /// When initialised
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a new payment in `Pending`
    #[must_use]
    pub fn pending(
        reference: PaymentId,
        event_id: EventId,
        owner_id: OwnerId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            reference,
            event_id,
            owner_id,
            quantity,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// The reservation this payment funds
    #[must_use]
    pub fn reservation_request(&self) -> ReservationRequest {
        ReservationRequest::new(self.event_id, self.quantity, self.owner_id)
            .with_payment(self.reference.clone())
    }
}

/// A request to claim tickets for an event (transient, never persisted)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    /// Event to reserve against
    pub event_id: EventId,
    /// Number of tickets requested (at least 1)
    pub quantity: u32,
    /// Purchaser; becomes the owner of every minted ticket
    pub requester_id: OwnerId,
    /// Payment that funds the reservation
    pub payment_id: Option<PaymentId>,
}

impl ReservationRequest {
    /// Creates a request without a payment link
    #[must_use]
    pub const fn new(event_id: EventId, quantity: u32, requester_id: OwnerId) -> Self {
        Self {
            event_id,
            quantity,
            requester_id,
            payment_id: None,
        }
    }

    /// Links the request to the payment that funds it
    #[must_use]
    pub fn with_payment(mut self, payment_id: PaymentId) -> Self {
        self.payment_id = Some(payment_id);
        self
    }
}

/// Result of a committed reservation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reservation {
    /// Tickets belonging to the reservation, in issue order
    pub tickets: Vec<Ticket>,
    /// `true` when the payment had already minted these tickets and nothing new
    /// was created
    pub replayed: bool,
}

impl Reservation {
    /// Consumes the reservation, yielding its tickets
    #[must_use]
    pub fn into_tickets(self) -> Vec<Ticket> {
        self.tickets
    }
}

/// Point-in-time capacity snapshot (non-authoritative)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    /// Event ID
    pub event_id: EventId,
    /// Event status at read time
    pub status: EventStatus,
    /// Event capacity
    pub capacity: Capacity,
    /// Tickets occupying a seat under the configured policy
    pub sold: u32,
}

impl Availability {
    /// Seats not yet claimed
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.capacity.remaining(self.sold)
    }

    /// Whether `quantity` more tickets could be sold right now
    #[must_use]
    pub fn admits(&self, quantity: u32) -> bool {
        self.status == EventStatus::Published && quantity <= self.remaining()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_round_trip() {
        for status in [EventStatus::Draft, EventStatus::Published, EventStatus::Cancelled] {
            assert_eq!(EventStatus::parse(status.as_str()), Some(status));
        }
        for status in [TicketStatus::Active, TicketStatus::Used, TicketStatus::Revoked] {
            assert_eq!(TicketStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TicketStatus::parse("ACTIVE"), None);
        for status in [PaymentStatus::Pending, PaymentStatus::Successful, PaymentStatus::Failed] {
            assert_eq!(PaymentStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_payment_funds_its_recorded_purchase() {
        let payment = Payment::pending(
            PaymentId::new("ref_9"),
            EventId::new(),
            OwnerId::new(),
            4,
            Utc::now(),
        );
        assert_eq!(payment.status, PaymentStatus::Pending);

        let request = payment.reservation_request();
        assert_eq!(request.event_id, payment.event_id);
        assert_eq!(request.requester_id, payment.owner_id);
        assert_eq!(request.quantity, 4);
        assert_eq!(request.payment_id, Some(payment.reference));
    }

    #[test]
    fn test_event_transitions() {
        assert!(EventStatus::Draft.can_transition_to(EventStatus::Published));
        assert!(EventStatus::Draft.can_transition_to(EventStatus::Cancelled));
        assert!(EventStatus::Published.can_transition_to(EventStatus::Cancelled));
        assert!(!EventStatus::Published.can_transition_to(EventStatus::Draft));
        assert!(!EventStatus::Cancelled.can_transition_to(EventStatus::Published));
        assert!(!EventStatus::Published.can_transition_to(EventStatus::Published));
    }

    #[test]
    fn test_terminal_ticket_states() {
        assert!(!TicketStatus::Active.is_terminal());
        assert!(TicketStatus::Used.is_terminal());
        assert!(TicketStatus::Revoked.is_terminal());
    }

    #[test]
    fn test_capacity_policy() {
        let release = CapacityPolicy::ReleaseRevoked;
        assert!(release.counts(TicketStatus::Active));
        assert!(release.counts(TicketStatus::Used));
        assert!(!release.counts(TicketStatus::Revoked));

        let retain = CapacityPolicy::RetainRevoked;
        assert!(retain.counts(TicketStatus::Revoked));
        assert_eq!(CapacityPolicy::default(), release);
    }

    #[test]
    fn test_availability_admits() {
        let mut availability = Availability {
            event_id: EventId::new(),
            status: EventStatus::Published,
            capacity: Capacity::new(10),
            sold: 7,
        };
        assert_eq!(availability.remaining(), 3);
        assert!(availability.admits(3));
        assert!(!availability.admits(4));

        availability.status = EventStatus::Draft;
        assert!(!availability.admits(1));
    }

    #[test]
    fn test_capacity_remaining_saturates() {
        assert_eq!(Capacity::new(2).remaining(5), 0);
    }

    #[test]
    fn test_owner_id_deserializes_from_plain_uuid() {
        let uuid = Uuid::new_v4();
        let owner: OwnerId = serde_json::from_str(&format!("\"{uuid}\"")).unwrap();
        assert_eq!(owner.as_uuid(), &uuid);
    }
}
