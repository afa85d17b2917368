//! Payment initialisation and confirmation at the webhook boundary.
//!
//! [`PaymentConfirmation::initialize`] checks availability and records a
//! `PENDING` [`Payment`] under the gateway reference before the buyer is sent
//! to pay. When the charge settles the gateway posts a JSON notification. The
//! raw body is authenticated (HMAC-SHA512, hex, in the signature header),
//! parsed into [`ChargeNotification`], matched to the recorded payment and
//! double-checked with the gateway through a [`PaymentVerifier`]. Tickets are
//! then reserved for the event, owner and quantity on record, never for what
//! the notification claims. Gateways redeliver webhooks, so the same reference
//! reaching [`PaymentConfirmation::confirm`] twice returns the tickets minted
//! the first time.

use crate::inventory::ReservationEngine;
use crate::metrics::BusinessMetrics;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::sync::Arc;
use thiserror::Error;
use turnstile_core::environment::Clock;
use turnstile_core::store::{BoxFuture, PaymentStore};
use turnstile_core::{
    EventId, InventoryError, OwnerId, Payment, PaymentId, PaymentStatus, ReservationRequest,
    StoreError, Ticket,
};

/// The only notification kind that mints tickets.
pub const CHARGE_SUCCESS: &str = "charge.success";

/// Webhook payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeNotification {
    /// Notification kind, e.g. `charge.success`
    pub event: String,
    /// Charge details
    pub data: ChargeData,
}

/// Charge details carried by a notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeData {
    /// Gateway reference, unique per charge
    pub reference: String,
    /// Purchase details echoed back by the gateway, if any
    #[serde(default)]
    pub metadata: Option<ChargeMetadata>,
}

/// Purchase details attached when the charge was initialised.
///
/// Unsigned by the gateway; only ever compared against the recorded payment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeMetadata {
    /// Purchaser
    #[serde(alias = "userId")]
    pub user_id: OwnerId,
    /// Event being paid for
    #[serde(alias = "eventId")]
    pub event_id: EventId,
    /// Tickets paid for
    #[serde(default)]
    pub quantity: Option<u32>,
}

impl ChargeMetadata {
    /// Whether these details agree with the recorded payment.
    #[must_use]
    pub fn describes(&self, payment: &Payment) -> bool {
        self.user_id == payment.owner_id
            && self.event_id == payment.event_id
            && self.quantity.is_none_or(|quantity| quantity == payment.quantity)
    }
}

impl ChargeNotification {
    /// Parse a raw webhook body.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Malformed`] if the body is not a valid notification.
    pub fn parse(body: &[u8]) -> Result<Self, PaymentError> {
        let notification: Self =
            serde_json::from_slice(body).map_err(|e| PaymentError::Malformed(e.to_string()))?;
        if notification.data.reference.trim().is_empty() {
            return Err(PaymentError::Malformed("empty charge reference".to_string()));
        }
        Ok(notification)
    }

    /// The charge reference.
    #[must_use]
    pub fn reference(&self) -> PaymentId {
        PaymentId::new(self.data.reference.clone())
    }
}

/// Gateway's answer when asked about a charge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChargeStatus {
    /// Funds captured
    Success,
    /// Declined, abandoned or reversed
    Failed,
    /// Not settled yet
    Pending,
}

/// Payment initialisation and confirmation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// Signature header missing or wrong.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Body is not a valid notification.
    #[error("Malformed webhook payload: {0}")]
    Malformed(String),

    /// The gateway could not be asked about the charge.
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// A payment with this reference was already initialised.
    #[error("Payment reference {0} is already in use")]
    DuplicateReference(PaymentId),

    /// No payment was initialised under this reference.
    #[error("No payment recorded for reference {0}")]
    UnknownPayment(PaymentId),

    /// The notification describes a different purchase than the one recorded.
    #[error("Notification for {0} does not match the recorded payment")]
    MetadataMismatch(PaymentId),

    /// The payment ledger could not be read or written.
    #[error("Payment store unavailable: {0}")]
    StoreUnavailable(String),

    /// Tickets cannot be sold, or could not be reserved for a verified charge.
    #[error(transparent)]
    Reservation(#[from] InventoryError),
}

impl PaymentError {
    /// Returns `true` if the gateway should redeliver the webhook.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Gateway(_) | Self::StoreUnavailable(_) => true,
            Self::Reservation(error) => {
                matches!(
                    error,
                    InventoryError::Contention(_) | InventoryError::StoreUnavailable(_)
                )
            }
            Self::InvalidSignature
            | Self::Malformed(_)
            | Self::DuplicateReference(_)
            | Self::UnknownPayment(_)
            | Self::MetadataMismatch(_) => false,
        }
    }
}

impl From<StoreError> for PaymentError {
    fn from(error: StoreError) -> Self {
        Self::StoreUnavailable(error.to_string())
    }
}

/// Asks the gateway whether a charge really settled.
pub trait PaymentVerifier: Send + Sync {
    /// Look up a charge by reference.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Gateway`] if the gateway cannot be reached.
    fn verify<'a>(&'a self, reference: &'a PaymentId) -> BoxFuture<'a, Result<ChargeStatus, PaymentError>>;
}

/// What a webhook led to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// New tickets minted.
    Issued(Vec<Ticket>),
    /// The charge had already been fulfilled; these are the original tickets.
    Replayed(Vec<Ticket>),
    /// The gateway did not confirm the charge; nothing minted.
    Unconfirmed {
        /// Charge reference
        reference: PaymentId,
        /// Gateway status
        status: ChargeStatus,
    },
    /// Notification kind that does not mint tickets.
    Ignored {
        /// The notification kind
        event: String,
    },
}

impl ConfirmationOutcome {
    const fn label(&self) -> &'static str {
        match self {
            Self::Issued(_) => "issued",
            Self::Replayed(_) => "replayed",
            Self::Unconfirmed { .. } => "unconfirmed",
            Self::Ignored { .. } => "ignored",
        }
    }
}

/// Check a webhook body against the gateway's HMAC-SHA512 hex signature.
///
/// # Errors
///
/// Returns [`PaymentError::InvalidSignature`] on any mismatch.
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> Result<(), PaymentError> {
    let expected = hex::decode(signature.trim()).map_err(|_| PaymentError::InvalidSignature)?;
    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes())
        .map_err(|_| PaymentError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| PaymentError::InvalidSignature)
}

/// Dependencies for payment confirmation.
#[derive(Clone)]
pub struct PaymentEnvironment {
    /// Reserves tickets once a charge settles
    pub engine: ReservationEngine,
    /// Ledger of initialised charges
    pub payments: Arc<dyn PaymentStore>,
    /// Gateway lookups
    pub verifier: Arc<dyn PaymentVerifier>,
    /// Clock stamped on ledger changes
    pub clock: Arc<dyn Clock>,
}

/// Turns settled charges into tickets.
#[derive(Clone)]
pub struct PaymentConfirmation {
    env: PaymentEnvironment,
    webhook_secret: Option<String>,
}

impl PaymentConfirmation {
    /// Creates a handler. Without a `webhook_secret`, signatures are not checked.
    #[must_use]
    pub const fn new(env: PaymentEnvironment, webhook_secret: Option<String>) -> Self {
        Self {
            env,
            webhook_secret,
        }
    }

    /// Record a `PENDING` payment before the buyer is sent to the gateway.
    ///
    /// Availability is checked without holding seats; they are claimed when
    /// the charge is confirmed.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::Malformed`] for an empty reference
    /// - [`PaymentError::Reservation`] if the tickets cannot be sold right now
    /// - [`PaymentError::DuplicateReference`] if the reference is taken
    /// - [`PaymentError::StoreUnavailable`]
    #[tracing::instrument(skip(self), fields(reference = %reference))]
    pub async fn initialize(
        &self,
        reference: PaymentId,
        event_id: EventId,
        owner_id: OwnerId,
        quantity: u32,
    ) -> Result<Payment, PaymentError> {
        if reference.as_str().trim().is_empty() {
            return Err(PaymentError::Malformed("empty charge reference".to_string()));
        }
        self.env
            .engine
            .ensure_available(&ReservationRequest::new(event_id, quantity, owner_id))
            .await?;

        let payment = Payment::pending(reference, event_id, owner_id, quantity, self.env.clock.now());
        if !self.env.payments.insert_payment(payment.clone()).await? {
            tracing::warn!("Payment reference already recorded");
            return Err(PaymentError::DuplicateReference(payment.reference));
        }
        tracing::info!(%event_id, quantity, "Payment initialised");
        Ok(payment)
    }

    /// Handle a raw webhook delivery.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError`] for bad signatures, malformed bodies, unknown
    /// or mismatched payments, gateway failures and reservation failures.
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<ConfirmationOutcome, PaymentError> {
        if let Some(secret) = &self.webhook_secret {
            let signature = signature.ok_or(PaymentError::InvalidSignature)?;
            if let Err(error) = verify_signature(body, signature, secret) {
                tracing::warn!("Rejected webhook with bad signature");
                BusinessMetrics::record_webhook("invalid_signature");
                return Err(error);
            }
        }
        let notification = ChargeNotification::parse(body)?;
        self.confirm(&notification).await
    }

    /// Act on a parsed notification.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::UnknownPayment`] or
    /// [`PaymentError::MetadataMismatch`] if the charge is not the recorded one,
    /// [`PaymentError::Gateway`] if it cannot be verified and
    /// [`PaymentError::Reservation`] if tickets cannot be minted.
    #[tracing::instrument(
        skip(self, notification),
        fields(kind = %notification.event, reference = %notification.data.reference)
    )]
    pub async fn confirm(
        &self,
        notification: &ChargeNotification,
    ) -> Result<ConfirmationOutcome, PaymentError> {
        let result = self.confirm_inner(notification).await;
        match &result {
            Ok(outcome) => BusinessMetrics::record_webhook(outcome.label()),
            Err(error) => {
                tracing::error!(%error, "Payment confirmation failed");
                BusinessMetrics::record_webhook("failed");
            }
        }
        result
    }

    async fn confirm_inner(
        &self,
        notification: &ChargeNotification,
    ) -> Result<ConfirmationOutcome, PaymentError> {
        if notification.event != CHARGE_SUCCESS {
            tracing::debug!("Ignoring notification");
            return Ok(ConfirmationOutcome::Ignored {
                event: notification.event.clone(),
            });
        }

        let reference = notification.reference();
        let payment = self
            .env
            .payments
            .load_payment(&reference)
            .await?
            .ok_or_else(|| PaymentError::UnknownPayment(reference.clone()))?;
        if let Some(metadata) = &notification.data.metadata {
            if !metadata.describes(&payment) {
                tracing::warn!(
                    event_id = %payment.event_id,
                    claimed_event = %metadata.event_id,
                    "Notification does not match the recorded payment"
                );
                return Err(PaymentError::MetadataMismatch(reference));
            }
        }

        match payment.status {
            PaymentStatus::Successful => {
                let tickets = self.env.engine.tickets_for_payment(&reference).await?;
                return Ok(ConfirmationOutcome::Replayed(tickets));
            }
            PaymentStatus::Failed => {
                return Ok(ConfirmationOutcome::Unconfirmed {
                    reference,
                    status: ChargeStatus::Failed,
                });
            }
            PaymentStatus::Pending => {}
        }

        let status = self.env.verifier.verify(&reference).await?;
        if status != ChargeStatus::Success {
            tracing::warn!(?status, "Gateway did not confirm charge");
            if status == ChargeStatus::Failed {
                self.settle(&reference, PaymentStatus::Failed).await?;
            }
            return Ok(ConfirmationOutcome::Unconfirmed { reference, status });
        }

        let reservation = match self.env.engine.reserve(payment.reservation_request()).await {
            Ok(reservation) => reservation,
            Err(error) => {
                let error = PaymentError::from(error);
                if !error.is_retryable() {
                    tracing::error!(%error, "Charge captured but no tickets issued, refund required");
                    self.settle(&reference, PaymentStatus::Failed).await?;
                }
                return Err(error);
            }
        };
        self.settle(&reference, PaymentStatus::Successful).await?;

        if reservation.replayed {
            Ok(ConfirmationOutcome::Replayed(reservation.tickets))
        } else {
            tracing::info!(tickets = reservation.tickets.len(), "Tickets issued for payment");
            Ok(ConfirmationOutcome::Issued(reservation.tickets))
        }
    }

    /// Settle a pending payment. A concurrent delivery may have settled it
    /// first; that is not an error.
    async fn settle(&self, reference: &PaymentId, next: PaymentStatus) -> Result<(), PaymentError> {
        let settled = self
            .env
            .payments
            .set_payment_status(reference, PaymentStatus::Pending, next, self.env.clock.now())
            .await?;
        if settled.is_none() {
            tracing::debug!(%next, "Payment already settled");
        }
        Ok(())
    }
}
