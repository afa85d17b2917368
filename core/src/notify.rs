//! Mail transport seam.

use crate::store::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A rendered ticket confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketEmail {
    /// Recipient address
    pub to: String,
    /// Recipient display name
    pub recipient_name: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
}

/// Delivery failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotificationError {
    /// The transport rejected or failed to send the message.
    #[error("Mail delivery failed: {0}")]
    Delivery(String),

    /// The message could not be rendered (unknown owner, missing ticket, ...).
    #[error("Cannot render notification: {0}")]
    Render(String),
}

/// Outbound mail transport.
pub trait Mailer: Send + Sync {
    /// Send one email.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError::Delivery`] if the transport fails.
    fn send(&self, email: TicketEmail) -> BoxFuture<'_, Result<(), NotificationError>>;
}
