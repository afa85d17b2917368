//! `PostgreSQL` ticket store for Turnstile.
//!
//! Implements [`TicketStore`](turnstile_core::store::TicketStore),
//! [`PaymentStore`](turnstile_core::store::PaymentStore) and
//! [`OutboxStore`](turnstile_core::store::OutboxStore) on top of sqlx:
//!
//! - reservations lock the event row (`SELECT ... FOR UPDATE`) with a bounded
//!   `lock_timeout`, derive the sold count from `tickets`, and write tickets plus
//!   an outbox row in the same transaction;
//! - a reservation carrying a payment reference first takes a transaction
//!   advisory lock on that reference, which is unique across all events;
//! - redemption and revocation are single conditional `UPDATE`s on the ticket;
//! - outbox consumers claim rows with `FOR UPDATE SKIP LOCKED`.
//!
//! # Example
//!
//! ```no_run
//! use turnstile_postgres::{PostgresTicketStore, migrate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = sqlx::PgPool::connect("postgres://localhost/turnstile").await?;
//! migrate(&pool).await?;
//! let store = PostgresTicketStore::new(pool).with_lock_timeout(Duration::from_secs(2));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod directory;
mod error;
mod rows;
mod store;

pub use directory::PostgresOwnerDirectory;
pub use error::classify;
pub use store::PostgresTicketStore;

/// Apply the bundled schema migrations.
///
/// # Errors
///
/// Returns [`sqlx::migrate::MigrateError`] if a migration fails.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
