//! Subcommand implementations.

pub mod migrate;
pub mod orders;
pub mod quote;
pub mod seed;

use backline_storefront::config::{ConfigError, get_database_url};
use backline_storefront::db::{self, PgStore};
use thiserror::Error;

/// Errors shared by the subcommands.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Connect to the storefront database named by `STOREFRONT_DATABASE_URL`.
pub async fn connect() -> Result<PgStore, CommandError> {
    dotenvy::dotenv().ok();

    let database_url = get_database_url("STOREFRONT_DATABASE_URL")?;

    tracing::info!("Connecting to storefront database...");
    let pool = db::create_pool(&database_url).await?;
    Ok(PgStore::new(pool))
}
