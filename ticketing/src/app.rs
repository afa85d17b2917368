//! Service wiring.
//!
//! [`TicketingApp`] builds every service from one [`Config`] and one store, so
//! the reservation engine and the catalog always agree on the capacity policy.

use crate::catalog::EventCatalog;
use crate::config::Config;
use crate::inventory::{InventoryEnvironment, ReservationEngine, ReservationSettings};
use crate::notifications::{ConsoleMailer, NotificationRelay, RelayEnvironment, RelaySettings};
use crate::payments::{PaymentConfirmation, PaymentEnvironment, PaymentVerifier};
use crate::redemption::{RedemptionEnvironment, RedemptionService};
use crate::token::HmacTokenSigner;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use turnstile_core::directory::OwnerDirectory;
use turnstile_core::environment::{Clock, SystemClock};
use turnstile_core::notify::Mailer;
use turnstile_core::store::{OutboxStore, PaymentStore, TicketStore};
use turnstile_postgres::{PostgresOwnerDirectory, PostgresTicketStore};
use turnstile_runtime::RetryPolicy;

/// External collaborators the services run against.
#[derive(Clone)]
pub struct Collaborators {
    /// Owner lookups
    pub directory: Arc<dyn OwnerDirectory>,
    /// Mail transport
    pub mailer: Arc<dyn Mailer>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// All ticketing services.
#[derive(Clone)]
pub struct TicketingApp {
    /// Event lifecycle and capacity
    pub catalog: EventCatalog,
    /// Reservations and ticket queries
    pub reservations: ReservationEngine,
    /// Check-in and revoke
    pub redemption: RedemptionService,
    /// Outbox consumer
    pub relay: NotificationRelay,
    payments: Arc<dyn PaymentStore>,
    clock: Arc<dyn Clock>,
    webhook_secret: Option<String>,
}

impl TicketingApp {
    /// Wire the services over `store`.
    #[must_use]
    pub fn new<S>(config: &Config, store: Arc<S>, collaborators: Collaborators) -> Self
    where
        S: TicketStore + PaymentStore + OutboxStore + 'static,
    {
        let signer = Arc::new(HmacTokenSigner::new(&config.tokens.secret));
        let tickets: Arc<dyn TicketStore> = store.clone();
        let payments: Arc<dyn PaymentStore> = store.clone();
        let outbox: Arc<dyn OutboxStore> = store;
        let capacity_policy = config.reservations.capacity_policy();

        let reservations = ReservationEngine::new(
            InventoryEnvironment::new(
                Arc::clone(&tickets),
                signer.clone(),
                Arc::clone(&collaborators.clock),
            ),
            ReservationSettings {
                retry: config.reservations.retry_policy(),
                capacity_policy,
                max_per_order: config.reservations.max_per_order,
            },
        );

        let redemption = RedemptionService::new(RedemptionEnvironment {
            store: Arc::clone(&tickets),
            verifier: signer,
            directory: Arc::clone(&collaborators.directory),
            clock: Arc::clone(&collaborators.clock),
        });

        let catalog = EventCatalog::new(
            Arc::clone(&tickets),
            Arc::clone(&collaborators.clock),
            capacity_policy,
        );

        let relay = NotificationRelay::new(
            RelayEnvironment {
                outbox,
                tickets,
                directory: collaborators.directory,
                mailer: collaborators.mailer,
                clock: Arc::clone(&collaborators.clock),
            },
            relay_settings(config),
        );

        Self {
            catalog,
            reservations,
            redemption,
            relay,
            payments,
            clock: collaborators.clock,
            webhook_secret: config.payments.webhook_secret.clone(),
        }
    }

    /// Connect to `PostgreSQL`, run migrations and wire the services.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot connect or migrations fail.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres.max_connections)
            .min_connections(config.postgres.min_connections)
            .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
            .connect(&config.postgres.url)
            .await?;
        tracing::info!("Database connected");

        turnstile_postgres::migrate(&pool).await?;
        tracing::info!("Migrations applied");

        let store = Arc::new(
            PostgresTicketStore::new(pool.clone())
                .with_lock_timeout(Duration::from_millis(config.postgres.lock_timeout_ms)),
        );
        let collaborators = Collaborators {
            directory: Arc::new(PostgresOwnerDirectory::new(pool)),
            mailer: Arc::new(ConsoleMailer),
            clock: Arc::new(SystemClock),
        };
        Ok(Self::new(config, store, collaborators))
    }

    /// Payment initialisation and webhook handling, using `verifier` to
    /// double-check charges.
    #[must_use]
    pub fn payment_confirmation(&self, verifier: Arc<dyn PaymentVerifier>) -> PaymentConfirmation {
        PaymentConfirmation::new(
            PaymentEnvironment {
                engine: self.reservations.clone(),
                payments: Arc::clone(&self.payments),
                verifier,
                clock: Arc::clone(&self.clock),
            },
            self.webhook_secret.clone(),
        )
    }
}

fn relay_settings(config: &Config) -> RelaySettings {
    let notifications = &config.notifications;
    RelaySettings {
        poll_interval: Duration::from_millis(notifications.poll_interval_ms),
        batch_size: notifications.batch_size,
        max_attempts: notifications.max_attempts,
        backoff: RetryPolicy::builder()
            .initial_delay(Duration::from_millis(notifications.backoff_initial_ms))
            .max_delay(Duration::from_secs(300))
            .multiplier(2.0)
            .build(),
        ..RelaySettings::default()
    }
}
