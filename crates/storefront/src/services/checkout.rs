//! Cart pricing, draft orders and gateway sessions.
//!
//! Every checkout entry point goes through [`CheckoutService::create_draft`],
//! the only place orders are inserted. Stock is checked there but not
//! reserved: two shoppers can both pass the check and the later payment
//! overdraws the counter (clamped at zero when the payment lands).

use std::collections::BTreeSet;

use backline_core::catalog::{CartItem, CatalogError, ResolvedLine, check_stock, resolve_lines};
use backline_core::discount::{AppliedDiscounts, apply_discounts, normalize_code};
use backline_core::order::{NewOrder, Order};
use backline_core::pricing::{PricedLine, Totals};
use backline_core::types::Cents;
use backline_core::{CountryCode, CurrencyCode, OrderId, OrderStatus, PaymentProvider, ProductId};
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::config::StorefrontConfig;
use crate::db::{RepositoryError, Store};
use crate::payments::{CallbackUrls, CheckoutGateway, CheckoutSession, PaymentError};

/// Errors raised while pricing a cart or starting a payment.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The gateway is not configured or could not create a session.
    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(#[from] PaymentError),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// The order can no longer be paid.
    #[error("order {0} is {1}")]
    NotPending(OrderId, OrderStatus),

    /// Fully discounted orders cannot be sent to a gateway.
    #[error("order {0} has nothing to pay")]
    ZeroTotal(OrderId),

    /// Malformed input such as an unknown country.
    #[error("{0}")]
    InvalidRequest(String),
}

/// A cart as submitted by the storefront.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub items: Vec<CartItem>,
    /// ISO 3166-1 alpha-2 destination country.
    pub country: String,
    #[serde(default)]
    pub promotion_code: Option<String>,
    #[serde(default)]
    pub gift_card_code: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// A priced cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub currency: CurrencyCode,
    pub country: CountryCode,
    pub lines: Vec<ResolvedLine>,
    pub totals: Totals,
    pub discounts: AppliedDiscounts,
}

fn normalize_email(email: Option<&str>) -> Result<Option<String>, CheckoutError> {
    match email.map(str::trim).filter(|e| !e.is_empty()) {
        None => Ok(None),
        Some(email) if email.contains('@') && !email.contains(char::is_whitespace) => {
            Ok(Some(email.to_string()))
        }
        Some(_) => Err(CheckoutError::InvalidRequest(
            "invalid email address".to_string(),
        )),
    }
}

/// Checkout operations over a store.
pub struct CheckoutService<'a, S> {
    store: &'a S,
    config: &'a StorefrontConfig,
}

impl<'a, S: Store> CheckoutService<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S, config: &'a StorefrontConfig) -> Self {
        Self { store, config }
    }

    /// Price a cart without checking stock or persisting anything.
    ///
    /// Unknown, expired or exhausted codes resolve to no discount.
    ///
    /// # Errors
    ///
    /// Returns `Catalog` for unresolvable lines, `InvalidRequest` for a bad
    /// country and `Repository` if the store fails.
    #[instrument(skip(self, request), fields(items = request.items.len(), country = %request.country))]
    pub async fn quote(&self, request: &CheckoutRequest) -> Result<Quote, CheckoutError> {
        let country = CountryCode::parse(&request.country)
            .map_err(|e| CheckoutError::InvalidRequest(e.to_string()))?;

        let ids: Vec<ProductId> = request
            .items
            .iter()
            .map(|item| item.product_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let products = self.store.active_products(&ids).await?;
        let lines = resolve_lines(&request.items, &products, self.config.currency)?;
        let raw_subtotal: Cents = lines.iter().map(PricedLine::line_total).sum();

        let promotion = match request.promotion_code.as_deref().and_then(normalize_code) {
            Some(code) => self.store.promotion_by_code(&code).await?,
            None => None,
        };
        let gift_card = match request.gift_card_code.as_deref().and_then(normalize_code) {
            Some(code) => self.store.gift_card_by_code(&code).await?,
            None => None,
        };

        let discounts = apply_discounts(
            raw_subtotal,
            promotion.as_ref(),
            gift_card.as_ref(),
            Utc::now(),
        );
        if request.promotion_code.is_some() && discounts.promotion.is_none() {
            debug!("Promotion code did not apply");
        }
        if request.gift_card_code.is_some() && discounts.gift_card.is_none() {
            debug!("Gift card did not apply");
        }

        let policy = self
            .config
            .pricing
            .policy(self.store.shipping_overrides().await?);
        let totals = policy.quote(&lines, &country, discounts.total());

        Ok(Quote {
            currency: self.config.currency,
            country,
            lines,
            totals,
            discounts,
        })
    }

    /// Price a cart, check stock and insert a `pending` order.
    ///
    /// # Errors
    ///
    /// As [`Self::quote`], plus `Catalog(InsufficientStock)` when a stock
    /// counter cannot cover the cart.
    #[instrument(skip(self, request))]
    pub async fn create_draft(
        &self,
        request: &CheckoutRequest,
        provider: Option<PaymentProvider>,
    ) -> Result<Order, CheckoutError> {
        let email = normalize_email(request.email.as_deref())?;
        let quote = self.quote(request).await?;
        check_stock(&quote.lines)?;

        let mut draft = NewOrder::from_quote(
            &quote.lines,
            quote.totals,
            quote.discounts,
            quote.currency,
            quote.country,
        )
        .with_customer_email(email);
        if let Some(provider) = provider {
            draft = draft.with_provider(provider);
        }

        let order = self.store.create_order(draft).await?;
        info!(order_id = %order.id, total = %order.total, "Created draft order");
        Ok(order)
    }

    /// Create a hosted session for a pending order and record it.
    ///
    /// On gateway failure the order is left `pending` with no session, so
    /// the call can be retried.
    ///
    /// # Errors
    ///
    /// Returns `NotPending`, `ZeroTotal` or `GatewayUnavailable`.
    #[instrument(skip(self, gateway, order), fields(order_id = %order.id, provider = %gateway.provider()))]
    pub async fn start_session<G: CheckoutGateway + Sync>(
        &self,
        gateway: &G,
        order: &Order,
    ) -> Result<CheckoutSession, CheckoutError> {
        if !order.is_payable() {
            return Err(CheckoutError::NotPending(order.id, order.status));
        }
        if order.total.is_zero() {
            return Err(CheckoutError::ZeroTotal(order.id));
        }

        let urls = match gateway.provider() {
            PaymentProvider::Stripe => CallbackUrls::for_order(&self.config.base_url, order.id),
            PaymentProvider::Paypal => CallbackUrls::for_paypal(&self.config.base_url, order.id),
        };

        let session = gateway.create_session(order, &urls).await?;

        let recorded = self
            .store
            .set_checkout_session(order.id, gateway.provider(), &session.session_id)
            .await?;
        if !recorded {
            let status = self
                .store
                .get_order(order.id)
                .await?
                .map_or(order.status, |o| o.status);
            return Err(CheckoutError::NotPending(order.id, status));
        }

        info!(session_id = %session.session_id, "Started payment session");
        Ok(session)
    }

    /// Draft an order and start a session with `gateway`.
    ///
    /// A missing gateway fails before anything is persisted.
    ///
    /// # Errors
    ///
    /// See [`Self::create_draft`] and [`Self::start_session`].
    pub async fn checkout<G: CheckoutGateway + Sync>(
        &self,
        gateway: Option<&G>,
        provider: PaymentProvider,
        request: &CheckoutRequest,
    ) -> Result<(Order, CheckoutSession), CheckoutError> {
        let gateway = gateway.ok_or(PaymentError::NotConfigured(provider))?;
        let order = self.create_draft(request, Some(provider)).await?;
        let session = self.start_session(gateway, &order).await?;
        Ok((order, session))
    }

    /// Start a fresh session for an existing pending order.
    ///
    /// # Errors
    ///
    /// Returns `OrderNotFound` for unknown ids, otherwise as
    /// [`Self::start_session`].
    pub async fn retry<G: CheckoutGateway + Sync>(
        &self,
        gateway: Option<&G>,
        provider: PaymentProvider,
        order_id: OrderId,
    ) -> Result<(Order, CheckoutSession), CheckoutError> {
        let gateway = gateway.ok_or(PaymentError::NotConfigured(provider))?;
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(order_id))?;
        let session = self.start_session(gateway, &order).await?;
        Ok((order, session))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use backline_core::catalog::{Product, Variant, VariantIndex};
    use backline_core::discount::{GiftCard, Promotion, PromotionKind};
    use backline_core::{GiftCardId, GiftCardStatus, PromotionId};
    use chrono::Duration;
    use secrecy::SecretString;

    use super::*;
    use crate::db::{MemoryStore, OrderStore};

    struct FakeGateway {
        provider: PaymentProvider,
        fail: bool,
        seen: Mutex<Vec<String>>,
    }

    impl FakeGateway {
        fn new(provider: PaymentProvider, fail: bool) -> Self {
            Self {
                provider,
                fail,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl CheckoutGateway for FakeGateway {
        fn provider(&self) -> PaymentProvider {
            self.provider
        }

        async fn create_session(
            &self,
            order: &Order,
            urls: &CallbackUrls,
        ) -> Result<CheckoutSession, PaymentError> {
            self.seen.lock().unwrap().push(urls.success_url.clone());
            if self.fail {
                return Err(PaymentError::Api {
                    status: 500,
                    message: "down".to_string(),
                });
            }
            Ok(CheckoutSession {
                session_id: format!("sess_{}", order.id),
                redirect_url: format!("https://pay.example/{}", order.id),
            })
        }
    }

    fn config() -> StorefrontConfig {
        StorefrontConfig::new(
            SecretString::from("postgres://localhost/backline".to_string()),
            "https://shop.example",
        )
    }

    async fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_product(Product {
                id: ProductId::new(1),
                title: "Tour Shirt".to_string(),
                sku: Some("SHIRT".to_string()),
                price: Cents::new(1500),
                currency: CurrencyCode::EUR,
                stock: 10,
                active: true,
                variants: vec![Variant {
                    name: "Size".to_string(),
                    value: "M".to_string(),
                    sku: None,
                    price: None,
                    stock: Some(1),
                }],
            })
            .await;
        store
            .insert_promotion(Promotion {
                id: PromotionId::new(1),
                code: "OLDTOUR".to_string(),
                kind: PromotionKind::Percent,
                value: 50,
                active: true,
                starts_at: None,
                ends_at: Some(Utc::now() - Duration::days(1)),
                min_subtotal: None,
            })
            .await;
        store
            .insert_gift_card(GiftCard {
                id: GiftCardId::new(1),
                code: "GIFT-BIG".to_string(),
                balance: Cents::new(5000),
                original_amount: Cents::new(5000),
                status: GiftCardStatus::Active,
                expires_at: None,
            })
            .await;
        store
    }

    fn request(quantity: u32, variant: Option<u16>) -> CheckoutRequest {
        CheckoutRequest {
            items: vec![CartItem {
                product_id: ProductId::new(1),
                quantity,
                variant_index: variant.map(VariantIndex::new),
            }],
            country: "de".to_string(),
            promotion_code: None,
            gift_card_code: None,
            email: Some("fan@example.com".to_string()),
        }
    }

    #[tokio::test]
    async fn test_quote_simple_order() {
        let store = store().await;
        let config = config();
        let quote = CheckoutService::new(&store, &config)
            .quote(&request(2, None))
            .await
            .unwrap();

        assert_eq!(quote.totals.subtotal, Cents::new(3000));
        assert_eq!(quote.totals.shipping, Cents::new(500));
        assert_eq!(quote.totals.tax, Cents::new(570));
        assert_eq!(quote.totals.total, Cents::new(4070));
    }

    #[tokio::test]
    async fn test_expired_promotion_prices_at_full() {
        let store = store().await;
        let config = config();
        let mut req = request(2, None);
        req.promotion_code = Some("oldtour".to_string());

        let quote = CheckoutService::new(&store, &config).quote(&req).await.unwrap();
        assert!(quote.discounts.promotion.is_none());
        assert_eq!(quote.totals.total, Cents::new(4070));
    }

    #[tokio::test]
    async fn test_gift_card_capped_at_subtotal() {
        let store = store().await;
        let config = config();
        let mut req = request(1, None);
        req.gift_card_code = Some("gift-big".to_string());

        let quote = CheckoutService::new(&store, &config).quote(&req).await.unwrap();
        assert_eq!(quote.discounts.gift_card_amount(), Cents::new(1500));
        assert_eq!(quote.totals.subtotal, Cents::ZERO);
        assert_eq!(quote.totals.tax, Cents::ZERO);
    }

    #[tokio::test]
    async fn test_invalid_country_rejected() {
        let store = store().await;
        let config = config();
        let mut req = request(1, None);
        req.country = "Germany".to_string();

        assert!(matches!(
            CheckoutService::new(&store, &config).quote(&req).await,
            Err(CheckoutError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_draft_rejects_insufficient_variant_stock() {
        let store = store().await;
        let config = config();
        let result = CheckoutService::new(&store, &config)
            .create_draft(&request(2, Some(0)), None)
            .await;

        assert!(matches!(
            result,
            Err(CheckoutError::Catalog(CatalogError::InsufficientStock { .. }))
        ));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_draft_rejects_bad_email() {
        let store = store().await;
        let config = config();
        let mut req = request(1, None);
        req.email = Some("not an email".to_string());

        assert!(matches!(
            CheckoutService::new(&store, &config).create_draft(&req, None).await,
            Err(CheckoutError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_checkout_records_session() {
        let store = store().await;
        let config = config();
        let gateway = FakeGateway::new(PaymentProvider::Stripe, false);

        let (order, session) = CheckoutService::new(&store, &config)
            .checkout(Some(&gateway), PaymentProvider::Stripe, &request(1, None))
            .await
            .unwrap();

        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.checkout_session_id, Some(session.session_id));
        assert_eq!(stored.provider, Some(PaymentProvider::Stripe));
        assert_eq!(stored.customer_email.as_deref(), Some("fan@example.com"));
    }

    #[tokio::test]
    async fn test_paypal_gets_return_url() {
        let store = store().await;
        let config = config();
        let gateway = FakeGateway::new(PaymentProvider::Paypal, false);

        let (order, _) = CheckoutService::new(&store, &config)
            .checkout(Some(&gateway), PaymentProvider::Paypal, &request(1, None))
            .await
            .unwrap();

        assert_eq!(
            gateway.seen.lock().unwrap().first().cloned(),
            Some(format!(
                "https://shop.example/checkout/paypal/return?order_id={}",
                order.id
            ))
        );
    }

    #[tokio::test]
    async fn test_missing_gateway_persists_nothing() {
        let store = store().await;
        let config = config();

        let result = CheckoutService::new(&store, &config)
            .checkout::<FakeGateway>(None, PaymentProvider::Stripe, &request(1, None))
            .await;

        assert!(matches!(
            result,
            Err(CheckoutError::GatewayUnavailable(PaymentError::NotConfigured(_)))
        ));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_order_pending_and_retryable() {
        let store = store().await;
        let config = config();
        let service = CheckoutService::new(&store, &config);

        let failing = FakeGateway::new(PaymentProvider::Stripe, true);
        let result = service
            .checkout(Some(&failing), PaymentProvider::Stripe, &request(1, None))
            .await;
        assert!(matches!(result, Err(CheckoutError::GatewayUnavailable(_))));

        let order_id = OrderId::new(1);
        let stored = store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
        assert!(stored.checkout_session_id.is_none());

        let working = FakeGateway::new(PaymentProvider::Stripe, false);
        let (_, session) = service
            .retry(Some(&working), PaymentProvider::Stripe, order_id)
            .await
            .unwrap();
        assert_eq!(session.session_id, "sess_1");
    }

    #[tokio::test]
    async fn test_fully_discounted_order_not_sent_to_gateway() {
        let store = store().await;
        let config = config();
        let gateway = FakeGateway::new(PaymentProvider::Stripe, false);
        let mut req = request(1, None);
        req.gift_card_code = Some("GIFT-BIG".to_string());
        req.country = "US".to_string();

        // International shipping keeps the total above zero.
        let (order, _) = CheckoutService::new(&store, &config)
            .checkout(Some(&gateway), PaymentProvider::Stripe, &req)
            .await
            .unwrap();
        assert_eq!(order.subtotal, Cents::ZERO);
        assert_eq!(order.total, Cents::new(1500));

        let mut zero = store.get_order(order.id).await.unwrap().unwrap();
        zero.total = Cents::ZERO;
        assert!(matches!(
            CheckoutService::new(&store, &config)
                .start_session(&gateway, &zero)
                .await,
            Err(CheckoutError::ZeroTotal(_))
        ));
    }
}
