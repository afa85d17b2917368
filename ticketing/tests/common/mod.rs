//! Shared fixtures for the ticketing integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Arc;
use ticketing::{Collaborators, Config, HmacTokenSigner, TicketingApp};
use turnstile_core::environment::Clock;
use turnstile_core::{EventId, OwnerId, ReservationRequest};
use turnstile_testing::{InMemoryTicketStore, ManualClock, RecordingMailer, StaticOwnerDirectory};

/// Token secret used by every harness.
pub const SECRET: &str = "integration-test-secret";

/// Config with fast retries plus `overrides`.
pub fn test_config(overrides: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = [
        ("TICKET_TOKEN_SECRET", SECRET),
        ("RESERVATION_RETRY_INITIAL_MS", "1"),
        ("RESERVATION_RETRY_MAX_MS", "5"),
        ("NOTIFY_POLL_INTERVAL_MS", "10"),
    ]
    .iter()
    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
    .collect();
    for (key, value) in overrides {
        vars.insert((*key).to_string(), (*value).to_string());
    }
    let config = Config::from_lookup(|key| vars.get(key).cloned());
    config.validate().unwrap();
    config
}

/// Services over the in-memory store, with handles on every double.
pub struct Harness {
    pub app: TicketingApp,
    pub store: Arc<InMemoryTicketStore>,
    pub clock: ManualClock,
    pub mailer: Arc<RecordingMailer>,
    pub signer: HmacTokenSigner,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(&[], StaticOwnerDirectory::new())
    }

    pub fn with_config(overrides: &[(&str, &str)]) -> Self {
        Self::build(overrides, StaticOwnerDirectory::new())
    }

    pub fn with_directory(directory: StaticOwnerDirectory) -> Self {
        Self::build(&[], directory)
    }

    pub fn build(overrides: &[(&str, &str)], directory: StaticOwnerDirectory) -> Self {
        let config = test_config(overrides);
        let store = Arc::new(InMemoryTicketStore::new());
        let clock = ManualClock::at_epoch();
        let mailer = Arc::new(RecordingMailer::new());
        let app = TicketingApp::new(
            &config,
            Arc::clone(&store),
            Collaborators {
                directory: Arc::new(directory),
                mailer: mailer.clone(),
                clock: Arc::new(clock.clone()),
            },
        );
        Self {
            app,
            store,
            clock,
            mailer,
            signer: HmacTokenSigner::new(SECRET),
        }
    }

    /// Create and publish an event.
    pub async fn published_event(&self, capacity: u32) -> EventId {
        let event = self
            .app
            .catalog
            .create_event("Harbour Lights", capacity)
            .await
            .unwrap();
        self.app.catalog.publish(event.id).await.unwrap();
        event.id
    }

    /// Reserve `quantity` tickets for a fresh owner and return the owner.
    pub async fn buy(&self, event_id: EventId, quantity: u32) -> OwnerId {
        let owner = OwnerId::new();
        self.app
            .reservations
            .reserve(ReservationRequest::new(event_id, quantity, owner))
            .await
            .unwrap();
        owner
    }

    pub fn now(&self) -> turnstile_core::DateTime<turnstile_core::Utc> {
        self.clock.now()
    }
}
