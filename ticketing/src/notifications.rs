//! Ticket notification relay.
//!
//! Reservations write a `TicketsIssued` entry to the outbox in the same
//! transaction as the tickets. [`NotificationRelay`] drains that outbox: it
//! claims due entries under a lease, mails one confirmation per ticket, and
//! marks each entry delivered. A failed entry is rescheduled with exponential
//! backoff until `max_attempts`, then marked dead. A relay that crashes mid-batch
//! leaves its entries to be reclaimed when the lease runs out, so owners may
//! receive a confirmation twice but never zero times.

use crate::metrics::BusinessMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use turnstile_core::directory::{OwnerDirectory, OwnerProfile};
use turnstile_core::environment::Clock;
use turnstile_core::notify::{Mailer, NotificationError, TicketEmail};
use turnstile_core::outbox::{OutboxEntry, OutboxMessage};
use turnstile_core::store::{BoxFuture, OutboxStore, TicketStore};
use turnstile_core::{DateTime, Event, StoreError, Ticket, Utc};
use turnstile_runtime::RetryPolicy;

/// Mailer that writes messages to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleMailer;

impl Mailer for ConsoleMailer {
    fn send(&self, email: TicketEmail) -> BoxFuture<'_, Result<(), NotificationError>> {
        tracing::info!(
            to = %email.to,
            recipient = %email.recipient_name,
            subject = %email.subject,
            body = %email.body,
            "Sending ticket email"
        );
        Box::pin(async { Ok(()) })
    }
}

/// Render the confirmation for one ticket.
#[must_use]
pub fn render_ticket_email(owner: &OwnerProfile, event: &Event, ticket: &Ticket) -> TicketEmail {
    TicketEmail {
        to: owner.email.clone(),
        recipient_name: owner.name.clone(),
        subject: format!("Your ticket for {}", event.title),
        body: format!(
            "Hi {},\n\nYour ticket for {} is confirmed.\n\nTicket: {}\nPresent this code at the entrance:\n{}\n",
            owner.name, event.title, ticket.id, ticket.redemption_token
        ),
    }
}

/// Relay tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct RelaySettings {
    /// Delay between polls when the outbox is idle
    pub poll_interval: Duration,
    /// Entries claimed per poll
    pub batch_size: usize,
    /// How long a claimed entry stays hidden from other relays
    pub lease: Duration,
    /// Delivery attempts before an entry is marked dead
    pub max_attempts: u32,
    /// Redelivery delays (`initial_delay` doubles per attempt)
    pub backoff: RetryPolicy,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 50,
            lease: Duration::from_secs(60),
            max_attempts: 3,
            backoff: RetryPolicy::builder()
                .initial_delay(Duration::from_secs(1))
                .max_delay(Duration::from_secs(300))
                .multiplier(2.0)
                .build(),
        }
    }
}

/// Counts from one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Entries claimed
    pub claimed: usize,
    /// Entries fully delivered
    pub delivered: usize,
    /// Entries rescheduled
    pub retried: usize,
    /// Entries given up on
    pub dead: usize,
}

/// Dependencies for the relay.
#[derive(Clone)]
pub struct RelayEnvironment {
    /// Outbox to drain
    pub outbox: Arc<dyn OutboxStore>,
    /// Ticket and event lookups
    pub tickets: Arc<dyn TicketStore>,
    /// Owner contact details
    pub directory: Arc<dyn OwnerDirectory>,
    /// Transport
    pub mailer: Arc<dyn Mailer>,
    /// Clock
    pub clock: Arc<dyn Clock>,
}

/// Delivers ticket confirmations from the outbox.
#[derive(Clone)]
pub struct NotificationRelay {
    env: RelayEnvironment,
    settings: RelaySettings,
}

impl NotificationRelay {
    /// Creates a new relay.
    #[must_use]
    pub const fn new(env: RelayEnvironment, settings: RelaySettings) -> Self {
        Self { env, settings }
    }

    /// Claim and process one batch.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the outbox cannot be read or updated.
    /// Delivery failures are recorded on the entry, not returned.
    pub async fn run_once(&self) -> Result<RelayReport, StoreError> {
        let now = self.env.clock.now();
        let entries = self
            .env
            .outbox
            .claim_pending(self.settings.batch_size, now, self.settings.lease)
            .await?;

        let mut report = RelayReport {
            claimed: entries.len(),
            ..RelayReport::default()
        };

        for entry in entries {
            match self.deliver(&entry).await {
                Ok(sent) => {
                    self.env.outbox.mark_delivered(entry.id, self.env.clock.now()).await?;
                    tracing::info!(entry_id = %entry.id, kind = entry.message.kind(), sent, "Notification delivered");
                    BusinessMetrics::record_notification("delivered");
                    report.delivered += 1;
                }
                Err(error) => {
                    let message = error.to_string();
                    match self.retry_at(&entry) {
                        Some(retry_at) => {
                            tracing::warn!(
                                entry_id = %entry.id,
                                attempts = entry.attempts,
                                %retry_at,
                                error = %message,
                                "Notification failed, will retry"
                            );
                            self.env.outbox.mark_failed(entry.id, &message, Some(retry_at)).await?;
                            BusinessMetrics::record_notification("retry");
                            report.retried += 1;
                        }
                        None => {
                            tracing::error!(
                                entry_id = %entry.id,
                                attempts = entry.attempts,
                                error = %message,
                                "Notification failed permanently"
                            );
                            self.env.outbox.mark_failed(entry.id, &message, None).await?;
                            BusinessMetrics::record_notification("dead");
                            report.dead += 1;
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    /// Run until `shutdown` flips to `true`.
    ///
    /// A full batch is followed immediately by another poll; otherwise the relay
    /// sleeps for `poll_interval`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            batch_size = self.settings.batch_size,
            max_attempts = self.settings.max_attempts,
            "Notification relay started"
        );
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    loop {
                        match self.run_once().await {
                            Ok(report) if report.claimed == self.settings.batch_size => {}
                            Ok(_) => break,
                            Err(error) => {
                                tracing::error!(%error, "Outbox poll failed");
                                break;
                            }
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Notification relay stopped");
    }

    fn retry_at(&self, entry: &OutboxEntry) -> Option<DateTime<Utc>> {
        if entry.attempts >= self.settings.max_attempts {
            return None;
        }
        let attempt = usize::try_from(entry.attempts.saturating_sub(1)).unwrap_or(usize::MAX);
        let delay = chrono::Duration::from_std(self.settings.backoff.delay_for_attempt(attempt))
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        Some(self.env.clock.now() + delay)
    }

    async fn deliver(&self, entry: &OutboxEntry) -> Result<usize, NotificationError> {
        match &entry.message {
            OutboxMessage::TicketsIssued {
                event_id,
                owner_id,
                ticket_ids,
                ..
            } => {
                let owner = self
                    .env
                    .directory
                    .lookup(*owner_id)
                    .await
                    .map_err(|e| NotificationError::Delivery(format!("owner lookup: {e}")))?
                    .ok_or_else(|| NotificationError::Render(format!("unknown owner {owner_id}")))?;
                let event = self
                    .env
                    .tickets
                    .load_event(*event_id)
                    .await
                    .map_err(|e| NotificationError::Delivery(format!("event lookup: {e}")))?
                    .ok_or_else(|| NotificationError::Render(format!("unknown event {event_id}")))?;

                for ticket_id in ticket_ids {
                    let ticket = self
                        .env
                        .tickets
                        .load_ticket(*ticket_id)
                        .await
                        .map_err(|e| NotificationError::Delivery(format!("ticket lookup: {e}")))?
                        .ok_or_else(|| {
                            NotificationError::Render(format!("unknown ticket {ticket_id}"))
                        })?;
                    self.env
                        .mailer
                        .send(render_ticket_email(&owner, &event, &ticket))
                        .await?;
                }
                Ok(ticket_ids.len())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use turnstile_core::{Capacity, OwnerId, PaymentId, RedemptionToken, TicketId, TicketStatus};

    #[test]
    fn test_email_carries_the_token() {
        let owner = OwnerProfile {
            owner_id: OwnerId::new(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
        };
        let event = Event::draft("Harbour Lights", Capacity::new(10), Utc::now());
        let ticket = Ticket {
            id: TicketId::new(),
            event_id: event.id,
            owner_id: owner.owner_id,
            payment_id: Some(PaymentId::new("ref_1")),
            redemption_token: RedemptionToken::new("v1.payload.signature"),
            status: TicketStatus::Active,
            issued_at: Utc::now(),
            used_at: None,
            revoked_at: None,
        };

        let email = render_ticket_email(&owner, &event, &ticket);
        assert_eq!(email.to, "ada@example.com");
        assert_eq!(email.subject, "Your ticket for Harbour Lights");
        assert!(email.body.contains("v1.payload.signature"));
        assert!(email.body.contains(&ticket.id.to_string()));
    }

    #[test]
    fn test_default_settings() {
        let settings = RelaySettings::default();
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.backoff.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(settings.backoff.delay_for_attempt(1), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_console_mailer_always_succeeds() {
        let email = TicketEmail {
            to: "ada@example.com".to_string(),
            recipient_name: "Ada".to_string(),
            subject: "Your ticket".to_string(),
            body: "See you there".to_string(),
        };
        assert!(ConsoleMailer.send(email).await.is_ok());
    }
}
