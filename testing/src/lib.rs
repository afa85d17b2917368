//! # Turnstile Testing
//!
//! Test doubles for the Turnstile ticket inventory core.
//!
//! This crate provides:
//! - [`InMemoryTicketStore`]: a [`TicketStore`](turnstile_core::store::TicketStore),
//!   [`PaymentStore`](turnstile_core::store::PaymentStore) and
//!   [`OutboxStore`](turnstile_core::store::OutboxStore) with the same
//!   locking guarantees as the `PostgreSQL` store, plus fault injection
//! - [`FixedClock`] and [`ManualClock`]: deterministic time
//! - [`RecordingMailer`]: captures sent emails, can be told to fail
//! - [`StaticOwnerDirectory`]: fixed owner profiles
//! - [`PlainTokenIssuer`] / [`FailingTokenIssuer`]: key-free token issuers
//!
//! ## Example
//!
//! ```
//! use turnstile_core::store::TicketStore;
//! use turnstile_core::{Capacity, Event, EventStatus};
//! use turnstile_core::environment::Clock;
//! use turnstile_testing::{InMemoryTicketStore, test_clock};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryTicketStore::new();
//! let mut event = Event::draft("Opening", Capacity::new(100), test_clock().now());
//! event.status = EventStatus::Published;
//! store.insert_event(event).await?;
//! # Ok(())
//! # }
//! ```

mod store;

pub use store::{FailingTokenIssuer, InMemoryTicketStore, OutboxRecord, PlainTokenIssuer};

use chrono::{DateTime, Utc};
use turnstile_core::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, PoisonError, RwLock};
    use turnstile_core::OwnerId;
    use turnstile_core::directory::{OwnerDirectory, OwnerProfile};
    use turnstile_core::error::StoreError;
    use turnstile_core::notify::{Mailer, NotificationError, TicketEmail};
    use turnstile_core::store::BoxFuture;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use turnstile_testing::mocks::FixedClock;
    /// use turnstile_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(epoch())
    }

    fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep one handle and pass
    /// another into an environment.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Start at 2025-01-01 00:00:00 UTC.
        #[must_use]
        pub fn at_epoch() -> Self {
            Self::new(epoch())
        }

        /// Move the clock forward.
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Mailer that records every email it is asked to send.
    #[derive(Debug, Default)]
    pub struct RecordingMailer {
        sent: Mutex<Vec<TicketEmail>>,
        failures_left: Mutex<usize>,
    }

    impl RecordingMailer {
        /// Create a mailer that always succeeds.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail the next `count` sends with a delivery error.
        pub fn fail_next(&self, count: usize) {
            *self
                .failures_left
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = count;
        }

        /// Emails sent so far, in order.
        #[must_use]
        pub fn sent(&self) -> Vec<TicketEmail> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl Mailer for RecordingMailer {
        fn send(&self, email: TicketEmail) -> BoxFuture<'_, Result<(), NotificationError>> {
            let result = {
                let mut failures = self
                    .failures_left
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if *failures > 0 {
                    *failures -= 1;
                    Err(NotificationError::Delivery(format!(
                        "smtp refused message to {}",
                        email.to
                    )))
                } else {
                    self.sent
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(email);
                    Ok(())
                }
            };
            Box::pin(async move { result })
        }
    }

    /// Owner directory backed by a fixed map.
    #[derive(Debug, Default, Clone)]
    pub struct StaticOwnerDirectory {
        profiles: HashMap<OwnerId, OwnerProfile>,
        unavailable: bool,
    }

    impl StaticOwnerDirectory {
        /// Empty directory.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a profile.
        #[must_use]
        pub fn with_owner(
            mut self,
            owner_id: OwnerId,
            name: impl Into<String>,
            email: impl Into<String>,
        ) -> Self {
            self.profiles.insert(
                owner_id,
                OwnerProfile {
                    owner_id,
                    name: name.into(),
                    email: email.into(),
                },
            );
            self
        }

        /// A directory whose every lookup fails.
        #[must_use]
        pub fn unavailable() -> Self {
            Self {
                profiles: HashMap::new(),
                unavailable: true,
            }
        }
    }

    impl OwnerDirectory for StaticOwnerDirectory {
        fn lookup(
            &self,
            owner_id: OwnerId,
        ) -> BoxFuture<'_, Result<Option<OwnerProfile>, StoreError>> {
            let result = if self.unavailable {
                Err(StoreError::Unavailable("directory offline".to_string()))
            } else {
                Ok(self.profiles.get(&owner_id).cloned())
            };
            Box::pin(async move { result })
        }
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{
    FixedClock, ManualClock, RecordingMailer, StaticOwnerDirectory, test_clock,
};
