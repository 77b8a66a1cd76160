//! Seed the catalog from a YAML file.
//!
//! Everything in the file is inserted in one transaction: a duplicate code or
//! SKU rolls the whole file back.
//!
//! ```yaml
//! products:
//!   - title: Tour Shirt 2026
//!     sku: SHIRT-26
//!     price: 2500
//!     stock: 0
//!     variants:
//!       - { name: Size, value: S, stock: 10 }
//!       - { name: Size, value: XXL, price: 2800, stock: 4 }
//! promotions:
//!   - { code: tour10, kind: percent, value: 10 }
//! gift_cards:
//!   - { code: GIFT-7F3K, amount: 5000 }
//! shipping_options:
//!   - { country: CH, name: Swiss Post, price: 900 }
//! ```

use std::path::Path;

use backline_core::catalog::Variant;
use backline_core::discount::{PromotionKind, normalize_code};
use backline_core::types::Cents;
use backline_core::{CountryCode, CurrencyCode, GiftCardStatus};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use super::{CommandError, connect};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Failed to read {0}: {1}")]
    Io(String, std::io::Error),

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid seed entry: {0}")]
    Invalid(String),

    #[error(transparent)]
    Connect(#[from] CommandError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedFile {
    #[serde(default)]
    pub products: Vec<SeedProduct>,
    #[serde(default)]
    pub promotions: Vec<SeedPromotion>,
    #[serde(default)]
    pub gift_cards: Vec<SeedGiftCard>,
    #[serde(default)]
    pub shipping_options: Vec<SeedShippingOption>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedProduct {
    pub title: String,
    #[serde(default)]
    pub sku: Option<String>,
    pub price: Cents,
    #[serde(default)]
    pub currency: CurrencyCode,
    #[serde(default)]
    pub stock: i32,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedPromotion {
    pub code: String,
    pub kind: PromotionKind,
    pub value: i64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub min_subtotal: Option<Cents>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedGiftCard {
    pub code: String,
    pub amount: Cents,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedShippingOption {
    pub country: String,
    pub name: String,
    pub price: Cents,
    #[serde(default = "default_true")]
    pub active: bool,
}

const fn default_true() -> bool {
    true
}

/// Row counts inserted by a seed run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub products: usize,
    pub variants: usize,
    pub promotions: usize,
    pub gift_cards: usize,
    pub shipping_options: usize,
}

fn invalid(msg: impl Into<String>) -> SeedError {
    SeedError::Invalid(msg.into())
}

impl SeedFile {
    /// Parse and validate a seed document.
    ///
    /// Codes are normalised to upper case and country codes checked.
    ///
    /// # Errors
    ///
    /// Returns `Yaml` for malformed documents and `Invalid` for values the
    /// schema would reject.
    pub fn parse(yaml: &str) -> Result<Self, SeedError> {
        let mut file: Self = serde_yaml::from_str(yaml)?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&mut self) -> Result<(), SeedError> {
        for product in &self.products {
            if product.title.trim().is_empty() {
                return Err(invalid("product title must not be empty"));
            }
            if product.price.is_negative() || product.stock < 0 {
                return Err(invalid(format!(
                    "product `{}` has a negative price or stock",
                    product.title
                )));
            }
            if product.variants.iter().any(|v| {
                v.price.is_some_and(Cents::is_negative) || v.stock.is_some_and(|s| s < 0)
            }) {
                return Err(invalid(format!(
                    "product `{}` has a variant with a negative price or stock",
                    product.title
                )));
            }
        }

        for promotion in &mut self.promotions {
            promotion.code = normalize_code(&promotion.code)
                .ok_or_else(|| invalid("promotion code must not be empty"))?;
            let value_ok = match promotion.kind {
                PromotionKind::Percent => (1..=100).contains(&promotion.value),
                PromotionKind::Fixed => promotion.value > 0,
            };
            if !value_ok {
                return Err(invalid(format!(
                    "promotion {} has an out-of-range value {}",
                    promotion.code, promotion.value
                )));
            }
            if let (Some(starts), Some(ends)) = (promotion.starts_at, promotion.ends_at)
                && ends <= starts
            {
                return Err(invalid(format!(
                    "promotion {} ends before it starts",
                    promotion.code
                )));
            }
        }

        for card in &mut self.gift_cards {
            card.code = normalize_code(&card.code)
                .ok_or_else(|| invalid("gift card code must not be empty"))?;
            if card.amount.is_negative() || card.amount.is_zero() {
                return Err(invalid(format!(
                    "gift card {} must have a positive amount",
                    card.code
                )));
            }
        }

        for option in &mut self.shipping_options {
            option.country = CountryCode::parse(&option.country)
                .map_err(|e| invalid(e.to_string()))?
                .to_string();
            if option.price.is_negative() {
                return Err(invalid(format!(
                    "shipping option {} has a negative price",
                    option.name
                )));
            }
        }

        Ok(())
    }
}

/// Read, validate and insert a seed file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or validated, or any insert fails.
pub async fn from_file(path: &str) -> Result<SeedSummary, SeedError> {
    let yaml = std::fs::read_to_string(Path::new(path))
        .map_err(|e| SeedError::Io(path.to_string(), e))?;
    let file = SeedFile::parse(&yaml)?;

    let store = connect().await?;
    let mut tx = store.pool().begin().await?;
    let mut summary = SeedSummary::default();

    for product in &file.products {
        let product_id: i32 = sqlx::query_scalar(
            r"
            INSERT INTO storefront.products (title, sku, price_cents, currency, stock, active)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            ",
        )
        .bind(&product.title)
        .bind(&product.sku)
        .bind(product.price)
        .bind(product.currency.code())
        .bind(product.stock)
        .bind(product.active)
        .fetch_one(&mut *tx)
        .await?;

        for (position, variant) in product.variants.iter().enumerate() {
            let position = i32::try_from(position)
                .map_err(|_| invalid(format!("too many variants on `{}`", product.title)))?;
            sqlx::query(
                r"
                INSERT INTO storefront.product_variants
                    (product_id, position, name, value, sku, price_cents, stock)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(product_id)
            .bind(position)
            .bind(&variant.name)
            .bind(&variant.value)
            .bind(&variant.sku)
            .bind(variant.price)
            .bind(variant.stock)
            .execute(&mut *tx)
            .await?;
            summary.variants += 1;
        }

        info!(product_id, title = %product.title, "Product seeded");
        summary.products += 1;
    }

    for promotion in &file.promotions {
        sqlx::query(
            r"
            INSERT INTO storefront.promotions
                (code, kind, value, active, starts_at, ends_at, min_subtotal_cents)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(&promotion.code)
        .bind(promotion.kind)
        .bind(promotion.value)
        .bind(promotion.active)
        .bind(promotion.starts_at)
        .bind(promotion.ends_at)
        .bind(promotion.min_subtotal)
        .execute(&mut *tx)
        .await?;
        summary.promotions += 1;
    }

    for card in &file.gift_cards {
        sqlx::query(
            r"
            INSERT INTO storefront.gift_cards
                (code, balance_cents, original_amount_cents, status, expires_at)
            VALUES ($1, $2, $2, $3, $4)
            ",
        )
        .bind(&card.code)
        .bind(card.amount)
        .bind(GiftCardStatus::Active)
        .bind(card.expires_at)
        .execute(&mut *tx)
        .await?;
        summary.gift_cards += 1;
    }

    for (sort_order, option) in file.shipping_options.iter().enumerate() {
        sqlx::query(
            r"
            INSERT INTO storefront.shipping_options (country, name, price_cents, active, sort_order)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(&option.country)
        .bind(&option.name)
        .bind(option.price)
        .bind(option.active)
        .bind(i32::try_from(sort_order).unwrap_or(i32::MAX))
        .execute(&mut *tx)
        .await?;
        summary.shipping_options += 1;
    }

    tx.commit().await?;

    info!(
        products = summary.products,
        variants = summary.variants,
        promotions = summary.promotions,
        gift_cards = summary.gift_cards,
        shipping_options = summary.shipping_options,
        "Seed complete"
    );
    Ok(summary)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
products:
  - title: Tour Shirt 2026
    sku: SHIRT-26
    price: 2500
    stock: 0
    variants:
      - { name: Size, value: S, stock: 10 }
      - { name: Size, value: XXL, price: 2800, stock: 4 }
  - title: Live at the Roundhouse (LP)
    price: 2200
    stock: 30
promotions:
  - { code: ' tour10 ', kind: percent, value: 10 }
  - code: early5
    kind: fixed
    value: 500
    ends_at: 2026-03-01T00:00:00Z
gift_cards:
  - { code: gift-7f3k, amount: 5000 }
shipping_options:
  - { country: ch, name: Swiss Post, price: 900 }
";

    #[test]
    fn test_parse_sample() {
        let file = SeedFile::parse(SAMPLE).unwrap();

        assert_eq!(file.products.len(), 2);
        let shirt = &file.products[0];
        assert_eq!(shirt.currency, CurrencyCode::EUR);
        assert!(shirt.active);
        assert_eq!(shirt.variants.len(), 2);
        assert_eq!(shirt.variants[1].price, Some(Cents::new(2800)));
        assert_eq!(shirt.variants[0].price, None);

        assert_eq!(file.promotions[0].code, "TOUR10");
        assert_eq!(file.promotions[1].kind, PromotionKind::Fixed);
        assert!(file.promotions[1].ends_at.is_some());
        assert_eq!(file.gift_cards[0].code, "GIFT-7F3K");
        assert_eq!(file.shipping_options[0].country, "CH");
    }

    #[test]
    fn test_empty_document_is_valid() {
        let file = SeedFile::parse("{}").unwrap();
        assert!(file.products.is_empty());
        assert!(file.gift_cards.is_empty());
    }

    #[test]
    fn test_rejects_percent_over_100() {
        let err = SeedFile::parse("promotions:\n  - { code: big, kind: percent, value: 150 }\n")
            .unwrap_err();
        assert!(matches!(err, SeedError::Invalid(_)));
    }

    #[test]
    fn test_rejects_negative_stock() {
        let err = SeedFile::parse("products:\n  - { title: Pin, price: 300, stock: -1 }\n")
            .unwrap_err();
        assert!(matches!(err, SeedError::Invalid(_)));
    }

    #[test]
    fn test_rejects_bad_country() {
        let err = SeedFile::parse(
            "shipping_options:\n  - { country: Switzerland, name: Post, price: 900 }\n",
        )
        .unwrap_err();
        assert!(matches!(err, SeedError::Invalid(_)));
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let err = SeedFile::parse("products:\n  - { title: Pin, price: 300, colour: red }\n")
            .unwrap_err();
        assert!(matches!(err, SeedError::Yaml(_)));
    }

    #[test]
    fn test_rejects_empty_gift_card_code() {
        let err = SeedFile::parse("gift_cards:\n  - { code: '  ', amount: 1000 }\n").unwrap_err();
        assert!(matches!(err, SeedError::Invalid(_)));
    }
}
