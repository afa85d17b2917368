//! Messages recorded in the same transaction that mints tickets.
//!
//! A committed reservation always leaves exactly one [`OutboxMessage`] behind,
//! so a crash between commit and email delivery never loses the notification.

use crate::types::{EventId, OwnerId, PaymentId, TicketId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Outbox entry identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutboxId(Uuid);

impl OutboxId {
    /// Creates a new random `OutboxId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `OutboxId` from a `Uuid`
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

impl Default for OutboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OutboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload of an outbox entry, stored as JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboxMessage {
    /// A reservation committed and minted these tickets.
    TicketsIssued {
        /// Event ID
        event_id: EventId,
        /// Purchaser
        owner_id: OwnerId,
        /// Funding payment, if any
        payment_id: Option<PaymentId>,
        /// Minted tickets in issue order
        ticket_ids: Vec<TicketId>,
        /// Commit time
        issued_at: DateTime<Utc>,
    },
}

impl OutboxMessage {
    /// Short name used in logs and metrics labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TicketsIssued { .. } => "tickets_issued",
        }
    }
}

/// Delivery status of an outbox entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutboxStatus {
    /// Waiting for (re)delivery
    Pending,
    /// Delivered
    Delivered,
    /// Gave up after exhausting attempts
    Dead,
}

impl OutboxStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Dead => "dead",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "delivered" => Some(Self::Delivered),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

/// A claimed outbox entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxEntry {
    /// Entry ID
    pub id: OutboxId,
    /// Payload
    pub message: OutboxMessage,
    /// Delivery attempts including the current claim
    pub attempts: u32,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_message_is_tagged_json() {
        let message = OutboxMessage::TicketsIssued {
            event_id: EventId::new(),
            owner_id: OwnerId::new(),
            payment_id: Some(PaymentId::new("ref_123")),
            ticket_ids: vec![TicketId::new()],
            issued_at: Utc::now(),
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "tickets_issued");
        assert_eq!(json["payment_id"], "ref_123");

        let back: OutboxMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(OutboxStatus::parse("dead"), Some(OutboxStatus::Dead));
        assert_eq!(OutboxStatus::parse("sent"), None);
    }
}
