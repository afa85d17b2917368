//! # Turnstile Core
//!
//! Core types and collaborator traits for the Turnstile ticket inventory core.
//!
//! Two components sit on top of this crate:
//!
//! - **Inventory reservation**: atomically admits or rejects a request to claim
//!   `k` tickets for an event, never letting the tickets in `ACTIVE` or `USED`
//!   state exceed the event's capacity.
//! - **Ticket redemption**: drives a ticket from `ACTIVE` to `USED` at most once,
//!   even when two scanners validate the same ticket at the same time.
//!
//! ## What lives here
//!
//! - [`types`]: identifiers, events, tickets, statuses and capacity policy
//! - [`error`]: the error taxonomy shared by every implementation
//! - [`store`]: the transactional store abstraction ([`store::TicketStore`],
//!   [`store::PaymentStore`], [`store::OutboxStore`])
//! - [`token`]: signing and verification seams for redemption tokens
//! - [`directory`]: owner lookups used for display and notification
//! - [`notify`]: the mail transport seam
//! - [`outbox`]: messages written in the reservation transaction
//! - [`environment`]: clock abstraction
//!
//! All external dependencies are abstracted behind traits and injected through
//! environment structs, so the same engine runs against `PostgreSQL` in
//! production and against the in-memory store in tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod directory;
pub mod error;
pub mod notify;
pub mod outbox;
pub mod store;
pub mod token;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{CatalogError, InventoryError, RedemptionError, StoreError};
pub use types::*;

/// Environment module - injected dependencies that are not storage
///
/// The store, token and directory traits live in their own modules; this module
/// holds the clock.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use turnstile_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
