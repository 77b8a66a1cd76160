//! Catalog queries.

use backline_core::catalog::{Product, Variant};
use backline_core::types::Cents;
use backline_core::{CountryCode, CurrencyCode, ProductId};
use tracing::{debug, instrument};

use super::PgStore;
use crate::db::{CatalogStore, RepositoryError};

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: ProductId,
    title: String,
    sku: Option<String>,
    price_cents: Cents,
    currency: String,
    stock: i32,
    active: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct VariantRow {
    product_id: ProductId,
    position: i32,
    name: String,
    value: String,
    sku: Option<String>,
    price_cents: Option<Cents>,
    stock: Option<i32>,
}

#[derive(Debug, sqlx::FromRow)]
struct ShippingOverrideRow {
    country: String,
    price_cents: Cents,
}

impl ProductRow {
    fn into_product(self, variants: Vec<Variant>) -> Result<Product, RepositoryError> {
        let currency = self.currency.parse::<CurrencyCode>().map_err(|e| {
            RepositoryError::DataCorruption(format!("product {}: {e}", self.id))
        })?;

        Ok(Product {
            id: self.id,
            title: self.title,
            sku: self.sku,
            price: self.price_cents,
            currency,
            stock: self.stock,
            active: self.active,
            variants,
        })
    }
}

/// Group variant rows by product, checking positions are contiguous from zero.
fn variants_for(product_id: ProductId, rows: &[VariantRow]) -> Result<Vec<Variant>, RepositoryError> {
    rows.iter()
        .filter(|row| row.product_id == product_id)
        .enumerate()
        .map(|(expected, row)| {
            if usize::try_from(row.position).ok() != Some(expected) {
                return Err(RepositoryError::DataCorruption(format!(
                    "product {product_id}: variant position {} out of sequence",
                    row.position
                )));
            }
            Ok(Variant {
                name: row.name.clone(),
                value: row.value.clone(),
                sku: row.sku.clone(),
                price: row.price_cents,
                stock: row.stock,
            })
        })
        .collect()
}

impl CatalogStore for PgStore {
    #[instrument(skip(self), fields(count = ids.len()))]
    async fn active_products(&self, ids: &[ProductId]) -> Result<Vec<Product>, RepositoryError> {
        let raw_ids: Vec<i32> = ids.iter().map(ProductId::as_i32).collect();

        let products: Vec<ProductRow> = sqlx::query_as(
            r"
            SELECT id, title, sku, price_cents, currency, stock, active
            FROM storefront.products
            WHERE id = ANY($1) AND active
            ",
        )
        .bind(&raw_ids)
        .fetch_all(self.pool())
        .await?;

        let variants: Vec<VariantRow> = sqlx::query_as(
            r"
            SELECT product_id, position, name, value, sku, price_cents, stock
            FROM storefront.product_variants
            WHERE product_id = ANY($1)
            ORDER BY product_id, position
            ",
        )
        .bind(&raw_ids)
        .fetch_all(self.pool())
        .await?;

        debug!(
            products = products.len(),
            variants = variants.len(),
            "Fetched catalog rows"
        );

        products
            .into_iter()
            .map(|row| {
                let product_variants = variants_for(row.id, &variants)?;
                row.into_product(product_variants)
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn shipping_overrides(&self) -> Result<Vec<(CountryCode, Cents)>, RepositoryError> {
        let rows: Vec<ShippingOverrideRow> = sqlx::query_as(
            r"
            SELECT DISTINCT ON (country) country, price_cents
            FROM storefront.shipping_options
            WHERE active
            ORDER BY country, sort_order, id
            ",
        )
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                let country = CountryCode::parse(&row.country).map_err(|e| {
                    RepositoryError::DataCorruption(format!("shipping option country: {e}"))
                })?;
                Ok((country, row.price_cents))
            })
            .collect()
    }
}
