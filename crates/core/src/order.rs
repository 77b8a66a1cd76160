//! Orders and their line-item snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{ResolvedLine, VariantIndex};
use crate::discount::AppliedDiscounts;
use crate::pricing::{PricedLine, Totals};
use crate::types::{
    Cents, CountryCode, CurrencyCode, OrderId, OrderStatus, PaymentProvider, ProductId,
};

/// A line item as it was priced when the order was created.
///
/// Never re-read from the catalog: later price changes do not alter
/// historical orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub product_id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_index: Option<VariantIndex>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub unit_price: Cents,
    pub quantity: u32,
}

impl OrderLineItem {
    /// Title with the variant label appended, as shown to gateways.
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.variant_label {
            Some(label) => format!("{} ({label})", self.title),
            None => self.title.clone(),
        }
    }
}

impl From<&ResolvedLine> for OrderLineItem {
    fn from(line: &ResolvedLine) -> Self {
        Self {
            product_id: line.product_id,
            variant_index: line.variant_index,
            title: line.title.clone(),
            variant_label: line.variant_label.clone(),
            sku: line.sku.clone(),
            unit_price: line.unit_price,
            quantity: line.quantity,
        }
    }
}

impl PricedLine for OrderLineItem {
    fn unit_price(&self) -> Cents {
        self.unit_price
    }

    fn quantity(&self) -> u32 {
        self.quantity
    }
}

/// Shipping address as returned by a payment gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub name: Option<String>,
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

/// The order aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub status: OrderStatus,
    pub currency: CurrencyCode,
    pub country: CountryCode,
    pub line_items: Vec<OrderLineItem>,
    pub raw_subtotal: Cents,
    /// Subtotal after discounts.
    pub subtotal: Cents,
    pub shipping: Cents,
    pub tax: Cents,
    pub total: Cents,
    pub promotion_code: Option<String>,
    pub promotion_amount: Cents,
    pub gift_card_code: Option<String>,
    /// Exact amount to debit from the gift card once paid.
    pub gift_card_amount: Cents,
    pub provider: Option<PaymentProvider>,
    /// Stripe Checkout session id or PayPal order id.
    pub checkout_session_id: Option<String>,
    /// Stripe payment intent id or PayPal capture id.
    pub payment_intent_id: Option<String>,
    pub customer_email: Option<String>,
    pub shipping_address: Option<ShippingAddress>,
    pub tracking_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Totals as stored on the order.
    #[must_use]
    pub const fn totals(&self) -> Totals {
        Totals {
            raw_subtotal: self.raw_subtotal,
            discount: self.discount(),
            subtotal: self.subtotal,
            shipping: self.shipping,
            tax: self.tax,
            total: self.total,
        }
    }

    /// Discount applied to the raw subtotal.
    #[must_use]
    pub const fn discount(&self) -> Cents {
        self.raw_subtotal.saturating_sub(self.subtotal)
    }

    /// Whether the order can still be sent to a payment gateway.
    #[must_use]
    pub fn is_payable(&self) -> bool {
        self.status == OrderStatus::Pending
    }
}

/// Everything needed to insert a draft order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub currency: CurrencyCode,
    pub country: CountryCode,
    pub line_items: Vec<OrderLineItem>,
    pub totals: Totals,
    pub discounts: AppliedDiscounts,
    pub provider: Option<PaymentProvider>,
    pub customer_email: Option<String>,
}

impl NewOrder {
    /// Snapshot resolved lines and their totals into a draft.
    #[must_use]
    pub fn from_quote(
        lines: &[ResolvedLine],
        totals: Totals,
        discounts: AppliedDiscounts,
        currency: CurrencyCode,
        country: CountryCode,
    ) -> Self {
        Self {
            currency,
            country,
            line_items: lines.iter().map(OrderLineItem::from).collect(),
            totals,
            discounts,
            provider: None,
            customer_email: None,
        }
    }

    #[must_use]
    pub const fn with_provider(mut self, provider: PaymentProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn with_customer_email(mut self, email: Option<String>) -> Self {
        self.customer_email = email;
        self
    }

    /// Materialise the order row as the store would return it.
    #[must_use]
    pub fn into_order(self, id: OrderId, now: DateTime<Utc>) -> Order {
        Order {
            id,
            status: OrderStatus::Pending,
            currency: self.currency,
            country: self.country,
            line_items: self.line_items,
            raw_subtotal: self.totals.raw_subtotal,
            subtotal: self.totals.subtotal,
            shipping: self.totals.shipping,
            tax: self.totals.tax,
            total: self.totals.total,
            promotion_code: self.discounts.promotion.as_ref().map(|p| p.code.clone()),
            promotion_amount: self
                .discounts
                .promotion
                .as_ref()
                .map_or(Cents::ZERO, |p| p.amount),
            gift_card_code: self.discounts.gift_card.as_ref().map(|g| g.code.clone()),
            gift_card_amount: self.discounts.gift_card_amount(),
            provider: self.provider,
            checkout_session_id: None,
            payment_intent_id: None,
            customer_email: self.customer_email,
            shipping_address: None,
            tracking_number: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
        }
    }
}

/// Facts a gateway reports when a payment for an order succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    pub order_id: OrderId,
    pub payment_intent_id: Option<String>,
    pub customer_email: Option<String>,
    pub shipping_address: Option<ShippingAddress>,
}

/// Units to take off one stock counter when an order is paid.
///
/// Whether `variant_index` hits the variant's own counter or falls through to
/// the product's is decided by the store, which knows if the variant tracks
/// stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockDecrement {
    pub product_id: ProductId,
    pub variant_index: Option<VariantIndex>,
    pub quantity: u32,
}

/// Collapse line items into one decrement per product/variant pair.
#[must_use]
pub fn stock_decrements(items: &[OrderLineItem]) -> Vec<StockDecrement> {
    let mut grouped: BTreeMap<(ProductId, Option<VariantIndex>), u32> = BTreeMap::new();
    for item in items {
        let qty = grouped
            .entry((item.product_id, item.variant_index))
            .or_default();
        *qty = qty.saturating_add(item.quantity);
    }
    grouped
        .into_iter()
        .map(|((product_id, variant_index), quantity)| StockDecrement {
            product_id,
            variant_index,
            quantity,
        })
        .collect()
}

/// Take `quantity` units off `stock`, never going below zero.
///
/// Returns the new stock level and whether the request exceeded what was
/// left (an oversell between draft creation and payment).
#[must_use]
pub fn decrement_floor(stock: i32, quantity: u32) -> (i32, bool) {
    let requested = i64::from(quantity);
    let current = i64::from(stock.max(0));
    let remaining = (current - requested).max(0);
    (
        i32::try_from(remaining).unwrap_or(0),
        requested > current,
    )
}
