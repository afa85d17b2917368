//! Business metrics for the ticketing system.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `ticketing_reservations_total{outcome}` - Reservation attempts by outcome
//! - `ticketing_tickets_issued_total` - Tickets minted
//! - `ticketing_reservation_contention_total` - Event-lock timeouts seen by the engine
//! - `ticketing_redemptions_total{outcome}` - Redemption attempts by outcome
//! - `ticketing_notifications_total{outcome}` - Outbox deliveries by outcome
//! - `ticketing_payment_webhooks_total{outcome}` - Payment webhooks by outcome
//!
//! ## Histograms
//! - `ticketing_reservation_duration_seconds` - Time spent in `reserve`, retries included

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;
use turnstile_core::{InventoryError, RedemptionError};

/// Initialize and register all business metrics descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "ticketing_reservations_total",
        "Total number of reservation attempts by outcome"
    );
    describe_counter!("ticketing_tickets_issued_total", "Total number of tickets minted");
    describe_counter!(
        "ticketing_reservation_contention_total",
        "Reservation attempts that timed out waiting for the event lock"
    );
    describe_histogram!(
        "ticketing_reservation_duration_seconds",
        "Time taken by a reservation including contention retries"
    );
    describe_counter!(
        "ticketing_redemptions_total",
        "Total number of redemption attempts by outcome"
    );
    describe_counter!(
        "ticketing_notifications_total",
        "Ticket notification deliveries by outcome (delivered, retry, dead)"
    );
    describe_counter!(
        "ticketing_payment_webhooks_total",
        "Payment webhooks by outcome"
    );

    tracing::info!("Business metrics registered");
}

/// Label for a reservation outcome.
#[must_use]
pub const fn reservation_outcome(result: Result<bool, &InventoryError>) -> &'static str {
    match result {
        Ok(false) => "issued",
        Ok(true) => "replayed",
        Err(InventoryError::NotFound(_)) => "not_found",
        Err(InventoryError::NotAvailable { .. }) => "not_available",
        Err(InventoryError::SoldOut { .. }) => "sold_out",
        Err(InventoryError::InvalidQuantity | InventoryError::OrderLimitExceeded { .. }) => {
            "rejected"
        }
        Err(InventoryError::Contention(_)) => "contention",
        Err(InventoryError::PaymentConflict { .. }) => "payment_conflict",
        Err(InventoryError::TokenIssuance(_)) => "token_error",
        Err(InventoryError::StoreUnavailable(_)) => "store_unavailable",
    }
}

/// Label for a redemption outcome.
#[must_use]
pub const fn redemption_outcome(result: Result<(), &RedemptionError>) -> &'static str {
    match result {
        Ok(()) => "redeemed",
        Err(RedemptionError::InvalidToken) => "invalid_token",
        Err(RedemptionError::WrongEvent { .. }) => "wrong_event",
        Err(RedemptionError::NotFound(_)) => "not_found",
        Err(RedemptionError::AlreadyRedeemed { .. }) => "already_redeemed",
        Err(RedemptionError::Revoked(_)) => "revoked",
        Err(RedemptionError::StoreUnavailable(_)) => "store_unavailable",
    }
}

/// Records business metrics from the services.
pub struct BusinessMetrics;

impl BusinessMetrics {
    /// Record a finished reservation. `Ok(replayed)` on success.
    pub fn record_reservation(
        result: Result<bool, &InventoryError>,
        issued: usize,
        elapsed: Duration,
    ) {
        counter!("ticketing_reservations_total", "outcome" => reservation_outcome(result))
            .increment(1);
        if issued > 0 {
            counter!("ticketing_tickets_issued_total")
                .increment(u64::try_from(issued).unwrap_or(u64::MAX));
        }
        histogram!("ticketing_reservation_duration_seconds").record(elapsed.as_secs_f64());
    }

    /// Record one contended reservation attempt.
    pub fn record_contention() {
        counter!("ticketing_reservation_contention_total").increment(1);
    }

    /// Record a redemption attempt.
    pub fn record_redemption(result: Result<(), &RedemptionError>) {
        counter!("ticketing_redemptions_total", "outcome" => redemption_outcome(result))
            .increment(1);
    }

    /// Record an outbox delivery outcome (`delivered`, `retry`, `dead`).
    pub fn record_notification(outcome: &'static str) {
        counter!("ticketing_notifications_total", "outcome" => outcome).increment(1);
    }

    /// Record a payment webhook outcome.
    pub fn record_webhook(outcome: &'static str) {
        counter!("ticketing_payment_webhooks_total", "outcome" => outcome).increment(1);
    }
}
