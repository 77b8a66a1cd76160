//! In-memory store for tests and local development.
//!
//! All state sits behind one async mutex. Each trait method takes the lock
//! once, so conditional transitions are as atomic as the `PostgreSQL`
//! versions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use backline_core::catalog::Product;
use backline_core::discount::{GiftCard, Promotion, normalize_code};
use backline_core::order::{
    NewOrder, Order, PaymentConfirmation, StockDecrement, decrement_floor, stock_decrements,
};
use backline_core::types::Cents;
use backline_core::{CountryCode, GiftCardStatus, OrderId, OrderStatus, PaymentProvider, ProductId};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::warn;

use super::{
    CatalogStore, ConfirmOutcome, DiscountStore, OrderStore, RepositoryError, Store,
    TransitionOutcome,
};

#[derive(Debug, Default)]
struct Inner {
    products: BTreeMap<ProductId, Product>,
    promotions: HashMap<String, Promotion>,
    gift_cards: HashMap<String, GiftCard>,
    shipping_overrides: BTreeMap<String, (CountryCode, Cents)>,
    orders: BTreeMap<OrderId, Order>,
    last_order_id: i32,
}

impl Inner {
    fn decrement(&mut self, decrement: StockDecrement) {
        let Some(product) = self.products.get_mut(&decrement.product_id) else {
            warn!(product_id = %decrement.product_id, "Product for paid line item no longer exists");
            return;
        };

        let variant_stock = decrement
            .variant_index
            .and_then(|index| product.variants.get_mut(index.as_usize()))
            .and_then(|variant| variant.stock.as_mut());
        let counter = match variant_stock {
            Some(stock) => stock,
            None => &mut product.stock,
        };

        let (remaining, oversold) = decrement_floor(*counter, decrement.quantity);
        if oversold {
            warn!(
                product_id = %decrement.product_id,
                requested = decrement.quantity,
                available = *counter,
                "Stock oversold, clamped at zero"
            );
        }
        *counter = remaining;
    }

    fn debit(&mut self, code: &str, amount: Cents) {
        let Some(card) = self.gift_cards.get_mut(code) else {
            warn!(gift_card = code, "Gift card on paid order no longer exists");
            return;
        };
        card.balance = card.balance.saturating_sub(amount).clamp_to(Cents::ZERO, card.balance);
        if card.balance.is_zero() {
            card.status = GiftCardStatus::Redeemed;
        }
    }

    fn transition(
        &mut self,
        id: OrderId,
        to: OrderStatus,
        apply: impl FnOnce(&mut Order),
    ) -> TransitionOutcome {
        let Some(order) = self.orders.get_mut(&id) else {
            return TransitionOutcome::NotFound;
        };
        if !order.status.can_transition_to(to) {
            return TransitionOutcome::Rejected(order.status);
        }
        order.status = to;
        order.updated_at = Utc::now();
        apply(order);
        TransitionOutcome::Applied(order.clone())
    }
}

/// Store holding everything in process memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a product.
    pub async fn insert_product(&self, product: Product) {
        self.inner.lock().await.products.insert(product.id, product);
    }

    /// Add or replace a promotion. The code is normalised.
    pub async fn insert_promotion(&self, mut promotion: Promotion) {
        let code = normalize_code(&promotion.code).unwrap_or_default();
        promotion.code.clone_from(&code);
        self.inner.lock().await.promotions.insert(code, promotion);
    }

    /// Add or replace a gift card. The code is normalised.
    pub async fn insert_gift_card(&self, mut card: GiftCard) {
        let code = normalize_code(&card.code).unwrap_or_default();
        card.code.clone_from(&code);
        self.inner.lock().await.gift_cards.insert(code, card);
    }

    /// Set the flat shipping fee for one country.
    pub async fn set_shipping_override(&self, country: CountryCode, fee: Cents) {
        self.inner
            .lock()
            .await
            .shipping_overrides
            .insert(country.as_str().to_owned(), (country, fee));
    }

    /// Current state of a product.
    pub async fn product(&self, id: ProductId) -> Option<Product> {
        self.inner.lock().await.products.get(&id).cloned()
    }

    /// Current state of a gift card.
    pub async fn gift_card(&self, code: &str) -> Option<GiftCard> {
        let code = normalize_code(code)?;
        self.inner.lock().await.gift_cards.get(&code).cloned()
    }

    /// Number of orders created so far.
    pub async fn order_count(&self) -> usize {
        self.inner.lock().await.orders.len()
    }
}

impl CatalogStore for MemoryStore {
    async fn active_products(&self, ids: &[ProductId]) -> Result<Vec<Product>, RepositoryError> {
        let inner = self.inner.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| inner.products.get(id))
            .filter(|p| p.active)
            .cloned()
            .collect())
    }

    async fn shipping_overrides(&self) -> Result<Vec<(CountryCode, Cents)>, RepositoryError> {
        let inner = self.inner.lock().await;
        Ok(inner.shipping_overrides.values().cloned().collect())
    }
}

impl DiscountStore for MemoryStore {
    async fn promotion_by_code(&self, code: &str) -> Result<Option<Promotion>, RepositoryError> {
        Ok(self.inner.lock().await.promotions.get(code).cloned())
    }

    async fn gift_card_by_code(&self, code: &str) -> Result<Option<GiftCard>, RepositoryError> {
        Ok(self.inner.lock().await.gift_cards.get(code).cloned())
    }
}

impl OrderStore for MemoryStore {
    async fn create_order(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        let mut inner = self.inner.lock().await;
        inner.last_order_id += 1;
        let id = OrderId::new(inner.last_order_id);
        let order = order.into_order(id, Utc::now());
        inner.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.inner.lock().await.orders.get(&id).cloned())
    }

    async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .inner
            .lock()
            .await
            .orders
            .values()
            .find(|o| o.payment_intent_id.as_deref() == Some(payment_intent_id))
            .cloned())
    }

    async fn set_checkout_session(
        &self,
        id: OrderId,
        provider: PaymentProvider,
        session_id: &str,
    ) -> Result<bool, RepositoryError> {
        let mut inner = self.inner.lock().await;
        match inner.orders.get_mut(&id) {
            Some(order) if order.status == OrderStatus::Pending => {
                order.provider = Some(provider);
                order.checkout_session_id = Some(session_id.to_owned());
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn confirm_payment(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<ConfirmOutcome, RepositoryError> {
        let mut inner = self.inner.lock().await;

        let order = match inner.orders.get_mut(&confirmation.order_id) {
            None => return Ok(ConfirmOutcome::NotFound),
            Some(order) if order.status != OrderStatus::Pending => {
                return Ok(ConfirmOutcome::NotPending(order.status));
            }
            Some(order) => {
                let now = Utc::now();
                order.status = OrderStatus::Paid;
                if confirmation.payment_intent_id.is_some() {
                    order
                        .payment_intent_id
                        .clone_from(&confirmation.payment_intent_id);
                }
                if confirmation.customer_email.is_some() {
                    order.customer_email.clone_from(&confirmation.customer_email);
                }
                if confirmation.shipping_address.is_some() {
                    order
                        .shipping_address
                        .clone_from(&confirmation.shipping_address);
                }
                order.paid_at = Some(now);
                order.updated_at = now;
                order.clone()
            }
        };

        for decrement in stock_decrements(&order.line_items) {
            inner.decrement(decrement);
        }
        if let Some(code) = order.gift_card_code.as_deref()
            && order.gift_card_amount > Cents::ZERO
        {
            inner.debit(code, order.gift_card_amount);
        }

        Ok(ConfirmOutcome::Confirmed(order))
    }

    async fn mark_refunded(&self, id: OrderId) -> Result<TransitionOutcome, RepositoryError> {
        Ok(self
            .inner
            .lock()
            .await
            .transition(id, OrderStatus::Refunded, |_| {}))
    }

    async fn mark_fulfilled(
        &self,
        id: OrderId,
        tracking_number: &str,
    ) -> Result<TransitionOutcome, RepositoryError> {
        Ok(self
            .inner
            .lock()
            .await
            .transition(id, OrderStatus::Fulfilled, |order| {
                order.tracking_number = Some(tracking_number.to_owned());
            }))
    }

    async fn cancel_order(&self, id: OrderId) -> Result<TransitionOutcome, RepositoryError> {
        Ok(self
            .inner
            .lock()
            .await
            .transition(id, OrderStatus::Cancelled, |_| {}))
    }
}

impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use backline_core::catalog::{Variant, VariantIndex};
    use backline_core::discount::AppliedDiscounts;
    use backline_core::order::OrderLineItem;
    use backline_core::pricing::Totals;
    use backline_core::{CurrencyCode, GiftCardId};

    use super::*;

    fn product() -> Product {
        Product {
            id: ProductId::new(1),
            title: "Tour Shirt".to_string(),
            sku: None,
            price: Cents::new(2500),
            currency: CurrencyCode::EUR,
            stock: 4,
            active: true,
            variants: vec![Variant {
                name: "Size".to_string(),
                value: "S".to_string(),
                sku: None,
                price: None,
                stock: Some(1),
            }],
        }
    }

    fn draft(variant: Option<u16>, quantity: u32) -> NewOrder {
        NewOrder {
            currency: CurrencyCode::EUR,
            country: CountryCode::parse("DE").unwrap(),
            line_items: vec![OrderLineItem {
                product_id: ProductId::new(1),
                variant_index: variant.map(VariantIndex::new),
                title: "Tour Shirt".to_string(),
                variant_label: None,
                sku: None,
                unit_price: Cents::new(2500),
                quantity,
            }],
            totals: Totals::default(),
            discounts: AppliedDiscounts::default(),
            provider: None,
            customer_email: None,
        }
    }

    fn confirmation(id: OrderId) -> PaymentConfirmation {
        PaymentConfirmation {
            order_id: id,
            payment_intent_id: Some("pi_123".to_string()),
            customer_email: Some("fan@example.org".to_string()),
            shipping_address: None,
        }
    }

    #[tokio::test]
    async fn test_confirm_payment_applies_once() {
        let store = MemoryStore::new();
        store.insert_product(product()).await;
        let order = store.create_order(draft(None, 3)).await.unwrap();

        let first = store.confirm_payment(&confirmation(order.id)).await.unwrap();
        let second = store.confirm_payment(&confirmation(order.id)).await.unwrap();

        assert!(matches!(first, ConfirmOutcome::Confirmed(_)));
        assert_eq!(second, ConfirmOutcome::NotPending(OrderStatus::Paid));
        assert_eq!(store.product(ProductId::new(1)).await.unwrap().stock, 1);
    }

    #[tokio::test]
    async fn test_variant_stock_is_decremented_and_clamped() {
        let store = MemoryStore::new();
        store.insert_product(product()).await;
        let order = store.create_order(draft(Some(0), 2)).await.unwrap();

        store.confirm_payment(&confirmation(order.id)).await.unwrap();

        let product = store.product(ProductId::new(1)).await.unwrap();
        assert_eq!(product.variants.first().unwrap().stock, Some(0));
        assert_eq!(product.stock, 4);
    }

    #[tokio::test]
    async fn test_gift_card_debit_redeems_card() {
        let store = MemoryStore::new();
        store.insert_product(product()).await;
        store
            .insert_gift_card(GiftCard {
                id: GiftCardId::new(1),
                code: "gift-1".to_string(),
                balance: Cents::new(1000),
                original_amount: Cents::new(1000),
                status: GiftCardStatus::Active,
                expires_at: None,
            })
            .await;

        let mut new_order = draft(None, 1);
        new_order.discounts.gift_card = Some(backline_core::discount::AppliedCode {
            code: "GIFT-1".to_string(),
            amount: Cents::new(1000),
        });
        let order = store.create_order(new_order).await.unwrap();
        store.confirm_payment(&confirmation(order.id)).await.unwrap();

        let card = store.gift_card("GIFT-1").await.unwrap();
        assert_eq!(card.balance, Cents::ZERO);
        assert_eq!(card.status, GiftCardStatus::Redeemed);
    }

    #[tokio::test]
    async fn test_transitions_follow_state_machine() {
        let store = MemoryStore::new();
        let order = store.create_order(draft(None, 1)).await.unwrap();

        assert_eq!(
            store.mark_fulfilled(order.id, "TRACK").await.unwrap(),
            TransitionOutcome::Rejected(OrderStatus::Pending)
        );
        assert!(matches!(
            store.cancel_order(order.id).await.unwrap(),
            TransitionOutcome::Applied(_)
        ));
        assert_eq!(
            store.mark_refunded(order.id).await.unwrap(),
            TransitionOutcome::Rejected(OrderStatus::Cancelled)
        );
        assert_eq!(
            store.cancel_order(OrderId::new(99)).await.unwrap(),
            TransitionOutcome::NotFound
        );
    }
}
