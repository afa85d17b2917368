//! Owner lookups against the `users` table.

use sqlx::PgPool;
use sqlx::types::Uuid;
use turnstile_core::OwnerId;
use turnstile_core::directory::{OwnerDirectory, OwnerProfile};
use turnstile_core::error::StoreError;
use turnstile_core::store::BoxFuture;

use crate::error::classify;

/// Reads owner profiles from `users`.
#[derive(Clone, Debug)]
pub struct PostgresOwnerDirectory {
    pool: PgPool,
}

impl PostgresOwnerDirectory {
    /// Create a directory over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl OwnerDirectory for PostgresOwnerDirectory {
    fn lookup(&self, owner_id: OwnerId) -> BoxFuture<'_, Result<Option<OwnerProfile>, StoreError>> {
        Box::pin(async move {
            let row: Option<(Uuid, String, String)> =
                sqlx::query_as("SELECT id, name, email FROM users WHERE id = $1")
                    .bind(*owner_id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| classify(&e))?;

            Ok(row.map(|(id, name, email)| OwnerProfile {
                owner_id: OwnerId::from_uuid(id),
                name,
                email,
            }))
        })
    }
}
