//! Catalog lookup: products, variants and cart line resolution.
//!
//! The storefront fetches the active products referenced by a cart in one
//! batch and hands them to [`resolve_lines`], which turns each requested
//! `(product, quantity, variant)` into a [`ResolvedLine`] carrying the
//! canonical unit price and the stock counter that governs it. Resolution is
//! all-or-nothing: one bad line rejects the whole cart.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Cents, CurrencyCode, ProductId};

/// Largest quantity accepted for a single cart line.
pub const MAX_LINE_QUANTITY: u32 = 99;

/// Stable position of a variant in its product's ordered variant list.
///
/// Carried unchanged from the cart to the order line item so that stock
/// reconciliation never has to re-derive a variant from its display label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantIndex(u16);

impl VariantIndex {
    /// Create a variant index.
    #[must_use]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// The index as a `usize` for slice access.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// The index as stored in the `product_variants.position` column.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        i32::from(self.0)
    }
}

impl fmt::Display for VariantIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i32> for VariantIndex {
    type Error = std::num::TryFromIntError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        u16::try_from(value).map(Self)
    }
}

/// A product option such as a shirt size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// Option name, e.g. `Size`.
    pub name: String,
    /// Option value, e.g. `M`.
    pub value: String,
    /// Variant SKU, if it differs from the product's.
    #[serde(default)]
    pub sku: Option<String>,
    /// Price override. `None` means the product price applies.
    #[serde(default)]
    pub price: Option<Cents>,
    /// Own stock counter. `None` means the product's stock is shared.
    #[serde(default)]
    pub stock: Option<i32>,
}

impl Variant {
    /// Display label stored on order line items, e.g. `Size: M`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}: {}", self.name, self.value)
    }
}

/// A catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub title: String,
    pub sku: Option<String>,
    /// Unit price in minor units.
    pub price: Cents,
    pub currency: CurrencyCode,
    /// Stock shared by the product and every variant without its own counter.
    pub stock: i32,
    pub active: bool,
    /// Ordered variants; the position is the [`VariantIndex`].
    pub variants: Vec<Variant>,
}

impl Product {
    /// Look up a variant by index.
    #[must_use]
    pub fn variant(&self, index: VariantIndex) -> Option<&Variant> {
        self.variants.get(index.as_usize())
    }
}

/// One requested line of a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(default)]
    pub variant_index: Option<VariantIndex>,
}

/// The stock counter a line draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StockKey {
    /// The product's own counter (shared by variants without stock).
    Product(ProductId),
    /// A variant with its own counter.
    Variant(ProductId, VariantIndex),
}

/// A cart line resolved against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLine {
    pub product_id: ProductId,
    pub variant_index: Option<VariantIndex>,
    pub title: String,
    pub variant_label: Option<String>,
    pub sku: Option<String>,
    pub unit_price: Cents,
    pub quantity: u32,
    /// Stock available on the counter this line draws from.
    pub available_stock: i32,
    pub stock_key: StockKey,
}

/// Errors raised while resolving a cart against the catalog.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The cart has no lines.
    #[error("cart is empty")]
    EmptyCart,

    /// A product is missing or inactive.
    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    /// The requested variant does not exist on the product.
    #[error("product {product_id} has no variant {index}")]
    VariantNotFound {
        product_id: ProductId,
        index: VariantIndex,
    },

    /// Quantity is zero or above [`MAX_LINE_QUANTITY`].
    #[error("invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// The catalog row itself is unusable (negative price or stock).
    #[error("invalid catalog data for product {0}: {1}")]
    InvalidCatalogData(ProductId, String),

    /// The product is priced in a different currency than the store.
    #[error("product {product_id} is priced in {found}, store currency is {expected}")]
    CurrencyMismatch {
        product_id: ProductId,
        expected: CurrencyCode,
        found: CurrencyCode,
    },

    /// More units were requested than the stock counter holds.
    #[error("insufficient stock for {title}: requested {requested}, available {available}")]
    InsufficientStock {
        title: String,
        requested: u32,
        available: i32,
    },
}

/// Resolve cart items against a batch of fetched products.
///
/// `products` should contain the active products whose ids appear in
/// `items`; inactive or absent products fail with
/// [`CatalogError::ProductNotFound`]. Stock is reported but not checked; see
/// [`check_stock`].
///
/// # Errors
///
/// Returns the first [`CatalogError`] encountered, in cart order.
pub fn resolve_lines(
    items: &[CartItem],
    products: &[Product],
    currency: CurrencyCode,
) -> Result<Vec<ResolvedLine>, CatalogError> {
    if items.is_empty() {
        return Err(CatalogError::EmptyCart);
    }

    let by_id: HashMap<ProductId, &Product> = products
        .iter()
        .filter(|p| p.active)
        .map(|p| (p.id, p))
        .collect();

    items
        .iter()
        .map(|item| resolve_line(item, &by_id, currency))
        .collect()
}

fn resolve_line(
    item: &CartItem,
    by_id: &HashMap<ProductId, &Product>,
    currency: CurrencyCode,
) -> Result<ResolvedLine, CatalogError> {
    let product = by_id
        .get(&item.product_id)
        .copied()
        .ok_or(CatalogError::ProductNotFound(item.product_id))?;

    if item.quantity == 0 || item.quantity > MAX_LINE_QUANTITY {
        return Err(CatalogError::InvalidQuantity {
            product_id: product.id,
            quantity: item.quantity,
        });
    }

    if product.currency != currency {
        return Err(CatalogError::CurrencyMismatch {
            product_id: product.id,
            expected: currency,
            found: product.currency,
        });
    }

    let variant = match item.variant_index {
        Some(index) => Some((
            index,
            product
                .variant(index)
                .ok_or(CatalogError::VariantNotFound {
                    product_id: product.id,
                    index,
                })?,
        )),
        None => None,
    };

    let unit_price = variant
        .and_then(|(_, v)| v.price)
        .unwrap_or(product.price);
    if unit_price.is_negative() {
        return Err(CatalogError::InvalidCatalogData(
            product.id,
            format!("negative price {unit_price}"),
        ));
    }

    let (available_stock, stock_key) = match variant {
        Some((index, v)) if v.stock.is_some() => (
            v.stock.unwrap_or_default(),
            StockKey::Variant(product.id, index),
        ),
        _ => (product.stock, StockKey::Product(product.id)),
    };
    if available_stock < 0 {
        return Err(CatalogError::InvalidCatalogData(
            product.id,
            format!("negative stock {available_stock}"),
        ));
    }

    Ok(ResolvedLine {
        product_id: product.id,
        variant_index: item.variant_index,
        title: product.title.clone(),
        variant_label: variant.map(|(_, v)| v.label()),
        sku: variant
            .and_then(|(_, v)| v.sku.clone())
            .or_else(|| product.sku.clone()),
        unit_price,
        quantity: item.quantity,
        available_stock,
        stock_key,
    })
}

/// Check that every stock counter covers the quantities drawn from it.
///
/// Quantities are summed per [`StockKey`], so two lines for the same variant,
/// or several variants sharing the product's stock, are checked together.
/// This is a point-in-time check only: nothing is reserved, and concurrent
/// checkouts may both pass it.
///
/// # Errors
///
/// Returns [`CatalogError::InsufficientStock`] for the first counter that
/// would be overdrawn.
pub fn check_stock(lines: &[ResolvedLine]) -> Result<(), CatalogError> {
    let mut demand: Vec<(StockKey, u32, &ResolvedLine)> = Vec::new();

    for line in lines {
        if let Some(entry) = demand.iter_mut().find(|(key, _, _)| *key == line.stock_key) {
            entry.1 = entry.1.saturating_add(line.quantity);
        } else {
            demand.push((line.stock_key, line.quantity, line));
        }
    }

    for (_, requested, line) in demand {
        let available = u32::try_from(line.available_stock).unwrap_or(0);
        if requested > available {
            return Err(CatalogError::InsufficientStock {
                title: line
                    .variant_label
                    .as_ref()
                    .filter(|_| matches!(line.stock_key, StockKey::Variant(..)))
                    .map_or_else(
                        || line.title.clone(),
                        |label| format!("{} ({label})", line.title),
                    ),
                requested,
                available: line.available_stock,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn shirt() -> Product {
        Product {
            id: ProductId::new(1),
            title: "Tour Shirt".to_string(),
            sku: Some("TS".to_string()),
            price: Cents::new(2500),
            currency: CurrencyCode::EUR,
            stock: 10,
            active: true,
            variants: vec![
                Variant {
                    name: "Size".to_string(),
                    value: "S".to_string(),
                    sku: Some("TS-S".to_string()),
                    price: None,
                    stock: Some(2),
                },
                Variant {
                    name: "Size".to_string(),
                    value: "XXL".to_string(),
                    sku: None,
                    price: Some(Cents::new(2800)),
                    stock: None,
                },
            ],
        }
    }

    fn vinyl() -> Product {
        Product {
            id: ProductId::new(2),
            title: "Debut LP".to_string(),
            sku: None,
            price: Cents::new(1500),
            currency: CurrencyCode::EUR,
            stock: 3,
            active: true,
            variants: vec![],
        }
    }

    fn item(product: i32, quantity: u32, variant: Option<u16>) -> CartItem {
        CartItem {
            product_id: ProductId::new(product),
            quantity,
            variant_index: variant.map(VariantIndex::new),
        }
    }

    #[test]
    fn test_resolves_parent_values() {
        let lines = resolve_lines(&[item(2, 2, None)], &[vinyl()], CurrencyCode::EUR).unwrap();
        assert_eq!(lines[0].unit_price, Cents::new(1500));
        assert_eq!(lines[0].available_stock, 3);
        assert_eq!(lines[0].stock_key, StockKey::Product(ProductId::new(2)));
        assert_eq!(lines[0].variant_label, None);
    }

    #[test]
    fn test_variant_overrides_take_precedence() {
        let products = [shirt()];
        let lines = resolve_lines(
            &[item(1, 1, Some(0)), item(1, 1, Some(1))],
            &products,
            CurrencyCode::EUR,
        )
        .unwrap();

        // Size S: own stock, parent price
        assert_eq!(lines[0].unit_price, Cents::new(2500));
        assert_eq!(lines[0].available_stock, 2);
        assert_eq!(
            lines[0].stock_key,
            StockKey::Variant(ProductId::new(1), VariantIndex::new(0))
        );
        assert_eq!(lines[0].sku.as_deref(), Some("TS-S"));
        assert_eq!(lines[0].variant_label.as_deref(), Some("Size: S"));

        // Size XXL: own price, shared stock
        assert_eq!(lines[1].unit_price, Cents::new(2800));
        assert_eq!(lines[1].available_stock, 10);
        assert_eq!(lines[1].stock_key, StockKey::Product(ProductId::new(1)));
        assert_eq!(lines[1].sku.as_deref(), Some("TS"));
    }

    #[test]
    fn test_missing_product_fails_whole_cart() {
        let err = resolve_lines(
            &[item(2, 1, None), item(99, 1, None)],
            &[vinyl()],
            CurrencyCode::EUR,
        )
        .unwrap_err();
        assert_eq!(err, CatalogError::ProductNotFound(ProductId::new(99)));
    }

    #[test]
    fn test_inactive_product_is_not_found() {
        let mut product = vinyl();
        product.active = false;
        let err = resolve_lines(&[item(2, 1, None)], &[product], CurrencyCode::EUR).unwrap_err();
        assert_eq!(err, CatalogError::ProductNotFound(ProductId::new(2)));
    }

    #[test]
    fn test_unknown_variant() {
        let err = resolve_lines(&[item(1, 1, Some(7))], &[shirt()], CurrencyCode::EUR).unwrap_err();
        assert!(matches!(err, CatalogError::VariantNotFound { .. }));
    }

    #[test]
    fn test_quantity_bounds() {
        assert!(matches!(
            resolve_lines(&[item(2, 0, None)], &[vinyl()], CurrencyCode::EUR),
            Err(CatalogError::InvalidQuantity { quantity: 0, .. })
        ));
        assert!(matches!(
            resolve_lines(&[item(2, 100, None)], &[vinyl()], CurrencyCode::EUR),
            Err(CatalogError::InvalidQuantity { quantity: 100, .. })
        ));
    }

    #[test]
    fn test_negative_price_rejected() {
        let mut product = vinyl();
        product.price = Cents::new(-1);
        let err = resolve_lines(&[item(2, 1, None)], &[product], CurrencyCode::EUR).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidCatalogData(..)));
    }

    #[test]
    fn test_currency_mismatch() {
        let err = resolve_lines(&[item(2, 1, None)], &[vinyl()], CurrencyCode::GBP).unwrap_err();
        assert!(matches!(err, CatalogError::CurrencyMismatch { .. }));
    }

    #[test]
    fn test_empty_cart() {
        assert_eq!(
            resolve_lines(&[], &[vinyl()], CurrencyCode::EUR),
            Err(CatalogError::EmptyCart)
        );
    }

    #[test]
    fn test_check_stock_sums_shared_counter() {
        let mut product = shirt();
        product.stock = 3;
        // Two lines of XXL (shared stock) plus the parent itself: 2 + 2 > 3
        let lines = resolve_lines(
            &[item(1, 2, Some(1)), item(1, 2, None)],
            &[product],
            CurrencyCode::EUR,
        )
        .unwrap();
        let err = check_stock(&lines).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::InsufficientStock {
                requested: 4,
                available: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_check_stock_variant_counter_is_independent() {
        // Size S has 2 of its own; the parent's 10 don't help it.
        let lines =
            resolve_lines(&[item(1, 3, Some(0))], &[shirt()], CurrencyCode::EUR).unwrap();
        let err = check_stock(&lines).unwrap_err();
        assert_eq!(
            err,
            CatalogError::InsufficientStock {
                title: "Tour Shirt (Size: S)".to_string(),
                requested: 3,
                available: 2,
            }
        );

        let lines =
            resolve_lines(&[item(1, 2, Some(0))], &[shirt()], CurrencyCode::EUR).unwrap();
        assert!(check_stock(&lines).is_ok());
    }
}
