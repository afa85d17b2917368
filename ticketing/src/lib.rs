//! Ticket inventory reservation and single-use redemption.
//!
//! This crate holds the services that sit on top of `turnstile-core`:
//!
//! - **Reservation** ([`inventory`]): admits or rejects a request for `k`
//!   tickets under the event lock and mints signed tickets all-or-nothing.
//! - **Redemption** ([`redemption`]): moves a ticket `ACTIVE -> USED` exactly
//!   once, even when two scanners race.
//! - **Catalog** ([`catalog`]): event lifecycle and capacity changes.
//! - **Payments** ([`payments`]): records charges before checkout and turns
//!   verified `charge.success` webhooks into reservations for the recorded
//!   purchase, idempotently per charge reference across all events.
//! - **Notifications** ([`notifications`]): drains the ticket outbox into
//!   confirmation emails, at least once.
//!
//! # Architecture
//!
//! ```text
//!  webhook ──▶ PaymentConfirmation ──▶ ReservationEngine ──▶ TicketStore::reserve
//!                                                              │  (event row lock)
//!                                                              ├─▶ tickets
//!                                                              └─▶ ticket_outbox
//!                                                                     │
//!  scanner ──▶ RedemptionService ──▶ TicketStore::transition_ticket   │
//!                                       (CAS on status)               ▼
//!                                                          NotificationRelay ──▶ Mailer
//! ```
//!
//! # Usage
//!
//! See [`app::TicketingApp`] for wiring and the `tests/` directory for end to
//! end scenarios against the in-memory store.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod catalog;
pub mod config;
pub mod inventory;
pub mod metrics;
pub mod notifications;
pub mod payments;
pub mod redemption;
pub mod token;

pub use app::{Collaborators, TicketingApp};
pub use catalog::{EventCatalog, MAX_PAGE_SIZE};
pub use config::Config;
pub use inventory::{InventoryEnvironment, ReservationEngine, ReservationSettings};
pub use notifications::{ConsoleMailer, NotificationRelay, RelayReport, RelaySettings};
pub use payments::{
    ChargeNotification, ConfirmationOutcome, PaymentConfirmation, PaymentEnvironment, PaymentError,
};
pub use redemption::{RedemptionEnvironment, RedemptionOutcome, RedemptionService};
pub use token::HmacTokenSigner;
