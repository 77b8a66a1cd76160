//! Persistence for the storefront.
//!
//! # Schema: `storefront`
//!
//! ## Tables
//!
//! - `products` / `product_variants` - Catalog, variants keyed by `(product_id, position)`
//! - `shipping_options` - Per-country shipping overrides
//! - `promotions` - Promotion codes
//! - `gift_cards` - Gift cards and their balances
//! - `orders` - Orders, with line items and shipping address as JSONB snapshots
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p backline-cli -- migrate
//! ```
//!
//! # Stores
//!
//! Handlers and services never touch SQL directly. They go through the
//! [`CatalogStore`], [`DiscountStore`] and [`OrderStore`] traits, implemented
//! by [`PgStore`] and (for tests and local runs) `MemoryStore`.

#[cfg(any(test, feature = "memory-store"))]
pub mod memory;
pub mod postgres;

use std::future::Future;
use std::time::Duration;

use backline_core::catalog::Product;
use backline_core::discount::{GiftCard, Promotion};
use backline_core::order::{NewOrder, Order, PaymentConfirmation};
use backline_core::types::Cents;
use backline_core::{CountryCode, OrderId, OrderStatus, PaymentProvider, ProductId};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

#[cfg(any(test, feature = "memory-store"))]
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate code).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Map unique violations to `Conflict`, everything else to `Database`.
    pub(crate) fn from_insert(err: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.is_unique_violation()
        {
            return Self::Conflict(format!("{what} already exists"));
        }
        Self::Database(err)
    }
}

/// Result of applying a payment confirmation to an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The order moved `pending -> paid`; stock and gift card were debited.
    Confirmed(Order),
    /// The order exists but was not pending. Nothing changed.
    NotPending(OrderStatus),
    /// No order with that id.
    NotFound,
}

/// Result of a conditional status change such as a refund or cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition was applied.
    Applied(Order),
    /// The order was already in a state the transition does not start from.
    Rejected(OrderStatus),
    /// No matching order.
    NotFound,
}

/// Read access to the catalog.
pub trait CatalogStore {
    /// Fetch the active products with the given ids, variants included.
    ///
    /// Missing or inactive ids are simply absent from the result.
    fn active_products(
        &self,
        ids: &[ProductId],
    ) -> impl Future<Output = Result<Vec<Product>, RepositoryError>> + Send;

    /// First active shipping option per country, as a flat fee override.
    fn shipping_overrides(
        &self,
    ) -> impl Future<Output = Result<Vec<(CountryCode, Cents)>, RepositoryError>> + Send;
}

/// Read access to promotions and gift cards, by normalised code.
pub trait DiscountStore {
    fn promotion_by_code(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<Option<Promotion>, RepositoryError>> + Send;

    fn gift_card_by_code(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<Option<GiftCard>, RepositoryError>> + Send;
}

/// Order persistence and the atomic state transitions applied to orders.
pub trait OrderStore {
    /// Insert a draft order in `pending` status.
    fn create_order(
        &self,
        order: NewOrder,
    ) -> impl Future<Output = Result<Order, RepositoryError>> + Send;

    fn get_order(
        &self,
        id: OrderId,
    ) -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    /// Find the order a gateway payment id was recorded on.
    fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    /// Record the gateway session on a still-pending order.
    ///
    /// Returns `false` if the order is no longer pending.
    fn set_checkout_session(
        &self,
        id: OrderId,
        provider: PaymentProvider,
        session_id: &str,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Move a pending order to `paid`, decrement stock and debit the gift card.
    ///
    /// All three happen atomically, and only if the order was `pending` at
    /// the moment of the update. Stock counters are clamped at zero.
    fn confirm_payment(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> impl Future<Output = Result<ConfirmOutcome, RepositoryError>> + Send;

    /// Move a `paid` order to `refunded`.
    fn mark_refunded(
        &self,
        id: OrderId,
    ) -> impl Future<Output = Result<TransitionOutcome, RepositoryError>> + Send;

    /// Move a `paid` order to `fulfilled`, recording the tracking number.
    fn mark_fulfilled(
        &self,
        id: OrderId,
        tracking_number: &str,
    ) -> impl Future<Output = Result<TransitionOutcome, RepositoryError>> + Send;

    /// Move a `pending` or `paid` order to `cancelled`.
    fn cancel_order(
        &self,
        id: OrderId,
    ) -> impl Future<Output = Result<TransitionOutcome, RepositoryError>> + Send;
}

/// Everything the storefront needs from its backing store.
pub trait Store: CatalogStore + DiscountStore + OrderStore + Clone + Send + Sync + 'static {
    /// Cheap connectivity check used by the readiness endpoint.
    fn ping(&self) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
