//! Redemption token seams.
//!
//! A token binds `(ticket_id, event_id, owner_id)` under a signature so a scanner
//! can reject forgeries without a database round trip. The authoritative status
//! check still happens at redemption time.

use crate::types::{EventId, OwnerId, RedemptionToken, Ticket, TicketId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Payload carried by a redemption token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketClaims {
    /// Ticket the token admits
    #[serde(rename = "tid")]
    pub ticket_id: TicketId,
    /// Event the ticket belongs to
    #[serde(rename = "eid")]
    pub event_id: EventId,
    /// Ticket owner
    #[serde(rename = "oid")]
    pub owner_id: OwnerId,
}

impl TicketClaims {
    /// Whether these claims describe `ticket`.
    #[must_use]
    pub fn matches(&self, ticket: &Ticket) -> bool {
        self.ticket_id == ticket.id
            && self.event_id == ticket.event_id
            && self.owner_id == ticket.owner_id
    }
}

impl From<&Ticket> for TicketClaims {
    fn from(ticket: &Ticket) -> Self {
        Self {
            ticket_id: ticket.id,
            event_id: ticket.event_id,
            owner_id: ticket.owner_id,
        }
    }
}

/// Token encoding and verification failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Token is not in the expected shape or the payload does not decode.
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// Signature does not match the payload.
    #[error("Token signature mismatch")]
    BadSignature,

    /// The signing key could not be used.
    #[error("Signing key error: {0}")]
    Key(String),
}

/// Produces redemption tokens at reservation time.
pub trait TokenIssuer: Send + Sync {
    /// Sign `claims` into a token.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] if encoding or signing fails.
    fn issue(&self, claims: &TicketClaims) -> Result<RedemptionToken, TokenError>;
}

/// Checks redemption tokens at scan time.
pub trait TokenVerifier: Send + Sync {
    /// Verify the signature and decode the claims.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] if the token is malformed or the signature is
    /// invalid.
    fn verify(&self, token: &str) -> Result<TicketClaims, TokenError>;
}
