//! `PostgreSQL` implementation of the store traits.
//!
//! Queries are checked at runtime (`query` / `query_as` with `FromRow` row
//! structs), so the crate builds without a live database.

mod catalog;
mod discounts;
mod orders;

use sqlx::PgPool;
use tracing::instrument;

use super::{RepositoryError, Store};

/// Store backed by the `storefront` schema.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Store for PgStore {
    #[instrument(skip(self))]
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
