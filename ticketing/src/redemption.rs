//! Ticket redemption state machine.
//!
//! ```text
//!            redeem
//!   ACTIVE ──────────▶ USED      (terminal)
//!     │
//!     │ revoke
//!     ▼
//!   REVOKED                      (terminal)
//! ```
//!
//! Each transition is a compare-and-swap on the ticket row conditioned on the
//! status still being `ACTIVE`. Of two scanners presenting the same token at
//! the same moment, exactly one gets the ticket and the other sees
//! [`RedemptionError::AlreadyRedeemed`]. Contention is scoped to the ticket; an
//! event's other tickets are never blocked.

use crate::metrics::BusinessMetrics;
use std::sync::Arc;
use turnstile_core::directory::{OwnerDirectory, OwnerIdentity};
use turnstile_core::environment::Clock;
use turnstile_core::store::{TicketStore, Transition};
use turnstile_core::token::TokenVerifier;
use turnstile_core::{EventId, OwnerId, RedemptionError, Ticket, TicketId, TicketStatus, TicketTransition};

/// Dependencies for the redemption service.
#[derive(Clone)]
pub struct RedemptionEnvironment {
    /// Ticket store
    pub store: Arc<dyn TicketStore>,
    /// Checks token signatures
    pub verifier: Arc<dyn TokenVerifier>,
    /// Resolves owner display details
    pub directory: Arc<dyn OwnerDirectory>,
    /// Clock stamped on `used_at` / `revoked_at`
    pub clock: Arc<dyn Clock>,
}

/// A successful check-in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedemptionOutcome {
    /// The ticket, now `USED`
    pub ticket: Ticket,
    /// Who holds it
    pub owner: OwnerIdentity,
}

/// Redeems and revokes tickets.
#[derive(Clone)]
pub struct RedemptionService {
    env: RedemptionEnvironment,
}

impl RedemptionService {
    /// Creates a new service.
    #[must_use]
    pub const fn new(env: RedemptionEnvironment) -> Self {
        Self { env }
    }

    /// Check a ticket in.
    ///
    /// `expected_event` is the event the scanner is admitting to; a token for a
    /// different event is rejected before the store is consulted.
    ///
    /// # Errors
    ///
    /// - [`RedemptionError::InvalidToken`]: bad signature, malformed payload, or
    ///   claims that do not match the stored ticket
    /// - [`RedemptionError::WrongEvent`]
    /// - [`RedemptionError::NotFound`]
    /// - [`RedemptionError::AlreadyRedeemed`] (with the original time when known)
    /// - [`RedemptionError::Revoked`]
    /// - [`RedemptionError::StoreUnavailable`]
    #[tracing::instrument(skip(self, token))]
    pub async fn redeem(
        &self,
        token: &str,
        expected_event: Option<EventId>,
    ) -> Result<RedemptionOutcome, RedemptionError> {
        let result = self.redeem_inner(token, expected_event).await;
        BusinessMetrics::record_redemption(result.as_ref().map(|_| ()));

        match &result {
            Ok(outcome) => tracing::info!(ticket_id = %outcome.ticket.id, "Ticket redeemed"),
            Err(RedemptionError::StoreUnavailable(error)) => {
                tracing::error!(%error, "Redemption failed");
            }
            Err(error) => tracing::info!(%error, "Redemption refused"),
        }
        result
    }

    async fn redeem_inner(
        &self,
        token: &str,
        expected_event: Option<EventId>,
    ) -> Result<RedemptionOutcome, RedemptionError> {
        let claims = self.env.verifier.verify(token).map_err(|error| {
            tracing::debug!(%error, "Token rejected");
            RedemptionError::InvalidToken
        })?;

        if let Some(expected) = expected_event {
            if claims.event_id != expected {
                return Err(RedemptionError::WrongEvent {
                    expected,
                    actual: claims.event_id,
                });
            }
        }

        let ticket = self
            .env
            .store
            .load_ticket(claims.ticket_id)
            .await?
            .ok_or(RedemptionError::NotFound(claims.ticket_id))?;

        if !claims.matches(&ticket) {
            tracing::warn!(ticket_id = %ticket.id, "Token claims do not match stored ticket");
            return Err(RedemptionError::InvalidToken);
        }
        refuse_terminal(&ticket)?;

        let ticket = self.apply(ticket.id, TicketTransition::Redeem).await?;
        let owner = self.owner_identity(ticket.owner_id).await;

        Ok(RedemptionOutcome { ticket, owner })
    }

    /// Revoke an `ACTIVE` ticket.
    ///
    /// # Errors
    ///
    /// - [`RedemptionError::NotFound`]
    /// - [`RedemptionError::AlreadyRedeemed`] if the ticket was used first
    /// - [`RedemptionError::Revoked`] if it is already revoked
    /// - [`RedemptionError::StoreUnavailable`]
    #[tracing::instrument(skip(self))]
    pub async fn revoke(&self, ticket_id: TicketId) -> Result<Ticket, RedemptionError> {
        let ticket = self.apply(ticket_id, TicketTransition::Revoke).await?;
        tracing::info!("Ticket revoked");
        Ok(ticket)
    }

    async fn apply(
        &self,
        ticket_id: TicketId,
        transition: TicketTransition,
    ) -> Result<Ticket, RedemptionError> {
        match self
            .env
            .store
            .transition_ticket(ticket_id, transition, self.env.clock.now())
            .await?
        {
            Transition::Applied(ticket) => Ok(ticket),
            Transition::Rejected(current) => {
                refuse_terminal(&current)?;
                Err(RedemptionError::StoreUnavailable(format!(
                    "ticket {ticket_id} rejected transition while {}",
                    current.status
                )))
            }
            Transition::Missing => Err(RedemptionError::NotFound(ticket_id)),
        }
    }

    async fn owner_identity(&self, owner_id: OwnerId) -> OwnerIdentity {
        match self.env.directory.lookup(owner_id).await {
            Ok(Some(profile)) => profile.into(),
            Ok(None) => OwnerIdentity::anonymous(owner_id),
            Err(error) => {
                tracing::warn!(%owner_id, %error, "Owner lookup failed, returning id only");
                OwnerIdentity::anonymous(owner_id)
            }
        }
    }
}

fn refuse_terminal(ticket: &Ticket) -> Result<(), RedemptionError> {
    match ticket.status {
        TicketStatus::Active => Ok(()),
        TicketStatus::Used => Err(RedemptionError::AlreadyRedeemed {
            ticket_id: ticket.id,
            redeemed_at: ticket.used_at,
        }),
        TicketStatus::Revoked => Err(RedemptionError::Revoked(ticket.id)),
    }
}
