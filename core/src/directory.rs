//! Owner lookups.
//!
//! The inventory core never owns user records. Redemption and notification ask
//! an [`OwnerDirectory`] for a display name and mailing address, and treat a
//! failed lookup as non-fatal.

use crate::error::StoreError;
use crate::store::BoxFuture;
use crate::types::OwnerId;
use serde::{Deserialize, Serialize};

/// Contact details for a ticket owner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerProfile {
    /// Owner ID
    pub owner_id: OwnerId,
    /// Display name
    pub name: String,
    /// Mailing address
    pub email: String,
}

/// Owner fields attached to a redemption result.
///
/// Name and email are `None` when the directory had no record or the lookup
/// failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerIdentity {
    /// Owner ID
    pub owner_id: OwnerId,
    /// Display name
    pub name: Option<String>,
    /// Mailing address
    pub email: Option<String>,
}

impl OwnerIdentity {
    /// Identity with only the id known.
    #[must_use]
    pub const fn anonymous(owner_id: OwnerId) -> Self {
        Self {
            owner_id,
            name: None,
            email: None,
        }
    }
}

impl From<OwnerProfile> for OwnerIdentity {
    fn from(profile: OwnerProfile) -> Self {
        Self {
            owner_id: profile.owner_id,
            name: Some(profile.name),
            email: Some(profile.email),
        }
    }
}

/// Source of owner contact details.
pub trait OwnerDirectory: Send + Sync {
    /// Look up an owner.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory is unreachable.
    fn lookup(&self, owner_id: OwnerId) -> BoxFuture<'_, Result<Option<OwnerProfile>, StoreError>>;
}
