//! PayPal Orders v2 client.
//!
//! Authenticates with OAuth client credentials; the bearer token is held in
//! a [`TokenCache`] shared by all clones of the client. The PayPal order id
//! is stored on our order as its checkout session id, and the capture id as
//! its payment intent id.

use std::sync::Arc;

use backline_core::order::{Order, PaymentConfirmation, ShippingAddress};
use backline_core::types::Cents;
use backline_core::{CurrencyCode, OrderId, PaymentProvider};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use super::token_cache::{IssuedToken, TokenCache};
use super::{CallbackUrls, CheckoutGateway, CheckoutSession, GatewayEvent, PaymentError};
use crate::config::PaypalConfig;

/// PayPal rejects item names longer than this.
const MAX_ITEM_NAME_LEN: usize = 127;

/// PayPal REST client.
#[derive(Clone)]
pub struct PaypalClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: SecretString,
    webhook_id: String,
    api_base: String,
    tokens: Arc<TokenCache>,
}

impl std::fmt::Debug for PaypalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaypalClient")
            .field("client_id", &self.client_id)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

/// Transmission headers PayPal signs each webhook delivery with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub auth_algo: String,
    pub cert_url: String,
    pub transmission_id: String,
    pub transmission_sig: String,
    pub transmission_time: String,
}

impl Transmission {
    /// Read the `paypal-*` transmission headers.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignature` if any header is missing.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, PaymentError> {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string)
                .ok_or_else(|| PaymentError::InvalidSignature(format!("missing {name} header")))
        };

        Ok(Self {
            auth_algo: get("paypal-auth-algo")?,
            cert_url: get("paypal-cert-url")?,
            transmission_id: get("paypal-transmission-id")?,
            transmission_sig: get("paypal-transmission-sig")?,
            transmission_time: get("paypal-transmission-time")?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct CreatedOrder {
    id: String,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    verification_status: String,
}

#[derive(Debug, Deserialize)]
struct PaypalOrder {
    id: String,
    payer: Option<Payer>,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

#[derive(Debug, Deserialize)]
struct Payer {
    email_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    custom_id: Option<String>,
    shipping: Option<PaypalShipping>,
    payments: Option<Payments>,
}

#[derive(Debug, Deserialize)]
struct PaypalShipping {
    name: Option<PaypalName>,
    address: Option<PaypalAddress>,
}

#[derive(Debug, Deserialize)]
struct PaypalName {
    full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaypalAddress {
    address_line_1: Option<String>,
    address_line_2: Option<String>,
    admin_area_2: Option<String>,
    admin_area_1: Option<String>,
    postal_code: Option<String>,
    country_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct Capture {
    id: String,
    status: Option<String>,
    custom_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event_type: String,
    resource: Value,
}

#[derive(Debug, Deserialize)]
struct RefundResource {
    amount: Option<Money>,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Money {
    value: String,
}

impl PaypalShipping {
    fn into_shipping_address(self) -> ShippingAddress {
        let name = self.name.and_then(|n| n.full_name);
        match self.address {
            Some(address) => ShippingAddress {
                name,
                line1: address.address_line_1,
                line2: address.address_line_2,
                city: address.admin_area_2,
                postal_code: address.postal_code,
                state: address.admin_area_1,
                country: address.country_code,
            },
            None => ShippingAddress {
                name,
                ..ShippingAddress::default()
            },
        }
    }
}

impl PaypalOrder {
    /// Turn a captured order into a payment confirmation.
    ///
    /// Returns `None` while the capture is still pending.
    fn into_confirmation(self) -> Result<Option<PaymentConfirmation>, PaymentError> {
        let unit = self.purchase_units.into_iter().next().ok_or_else(|| {
            PaymentError::Parse(format!("PayPal order {} has no purchase unit", self.id))
        })?;

        let captures = unit.payments.map(|p| p.captures).unwrap_or_default();
        let Some(capture) = captures
            .into_iter()
            .find(|c| c.status.as_deref() == Some("COMPLETED"))
        else {
            debug!(paypal_order_id = %self.id, "PayPal capture not completed yet");
            return Ok(None);
        };

        let order_id: OrderId = unit
            .custom_id
            .as_ref()
            .or(capture.custom_id.as_ref())
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| {
                PaymentError::Parse(format!("PayPal order {} has no custom_id", self.id))
            })?;

        Ok(Some(PaymentConfirmation {
            order_id,
            payment_intent_id: Some(capture.id),
            customer_email: self.payer.and_then(|p| p.email_address),
            shipping_address: unit.shipping.map(PaypalShipping::into_shipping_address),
        }))
    }
}

impl PaypalClient {
    #[must_use]
    pub fn new(config: &PaypalConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            webhook_id: config.webhook_id.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            tokens: Arc::new(TokenCache::new()),
        }
    }

    async fn fetch_token(&self) -> Result<IssuedToken, PaymentError> {
        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PaymentError::from_response(response).await);
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))?;

        Ok(IssuedToken {
            value: SecretString::from(token.access_token),
            expires_in: token.expires_in,
        })
    }

    async fn access_token(&self) -> Result<SecretString, PaymentError> {
        self.tokens.get_or_refresh(|| self.fetch_token()).await
    }

    /// POST a JSON body with the cached bearer token.
    ///
    /// A 401 drops the cached token so the next call fetches a fresh one.
    async fn post_json(&self, path: &str, body: &Value) -> Result<reqwest::Response, PaymentError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{}{path}", self.api_base))
            .bearer_auth(token.expose_secret())
            .json(body)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("PayPal rejected cached access token");
            self.tokens.invalidate().await;
        }

        Ok(response)
    }

    async fn get_order(&self, paypal_order_id: &str) -> Result<PaypalOrder, PaymentError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!("{}/v2/checkout/orders/{paypal_order_id}", self.api_base))
            .bearer_auth(token.expose_secret())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PaymentError::from_response(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))
    }

    /// Capture an approved PayPal order.
    ///
    /// An order that was already captured is read back instead, so a buyer
    /// reloading the return page gets the same result. Returns `None` when
    /// PayPal reports the capture as still pending.
    ///
    /// # Errors
    ///
    /// Returns error if PayPal is unreachable or rejects the capture.
    #[instrument(skip(self))]
    pub async fn capture_order(
        &self,
        paypal_order_id: &str,
    ) -> Result<Option<PaymentConfirmation>, PaymentError> {
        let response = self
            .post_json(
                &format!("/v2/checkout/orders/{paypal_order_id}/capture"),
                &json!({}),
            )
            .await?;

        let order: PaypalOrder = if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| PaymentError::Parse(e.to_string()))?
        } else {
            match PaymentError::from_response(response).await {
                PaymentError::Api { status: 422, message }
                    if message.contains("ORDER_ALREADY_CAPTURED") =>
                {
                    debug!("PayPal order already captured, reading it back");
                    self.get_order(paypal_order_id).await?
                }
                other => return Err(other),
            }
        };

        order.into_confirmation()
    }

    /// Ask PayPal to verify a webhook delivery.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignature` if PayPal answers `FAILURE` or rejects the
    /// request with a 4xx, or a transport error if PayPal could not be asked.
    #[instrument(skip(self, transmission, payload))]
    pub async fn verify_webhook(
        &self,
        transmission: &Transmission,
        payload: &[u8],
    ) -> Result<(), PaymentError> {
        let event: Value =
            serde_json::from_slice(payload).map_err(|e| PaymentError::Parse(e.to_string()))?;

        let body = json!({
            "auth_algo": transmission.auth_algo,
            "cert_url": transmission.cert_url,
            "transmission_id": transmission.transmission_id,
            "transmission_sig": transmission.transmission_sig,
            "transmission_time": transmission.transmission_time,
            "webhook_id": self.webhook_id,
            "webhook_event": event,
        });

        let response = self
            .post_json("/v1/notifications/verify-webhook-signature", &body)
            .await?;

        if !response.status().is_success() {
            return Err(verification_error(PaymentError::from_response(response).await));
        }

        let verdict: VerifyResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))?;

        if verdict.verification_status != "SUCCESS" {
            return Err(PaymentError::InvalidSignature(format!(
                "PayPal verification status {}",
                verdict.verification_status
            )));
        }

        debug!("PayPal webhook verified");
        Ok(())
    }

    /// Verify and decode a webhook delivery.
    ///
    /// # Errors
    ///
    /// See [`Self::verify_webhook`] and [`parse_event`].
    pub async fn verify_event(
        &self,
        headers: &HeaderMap,
        payload: &[u8],
    ) -> Result<GatewayEvent, PaymentError> {
        let transmission = Transmission::from_headers(headers)?;
        self.verify_webhook(&transmission, payload).await?;
        parse_event(payload)
    }
}

/// A 4xx from the verification call means the delivery itself is bad and
/// will never verify. Server errors stay retryable.
fn verification_error(err: PaymentError) -> PaymentError {
    match err {
        PaymentError::Api { status, message } if (400..500).contains(&status) => {
            PaymentError::InvalidSignature(format!(
                "PayPal rejected verification ({status}): {message}"
            ))
        }
        other => other,
    }
}

impl CheckoutGateway for PaypalClient {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Paypal
    }

    #[instrument(skip(self, order, urls), fields(order_id = %order.id))]
    async fn create_session(
        &self,
        order: &Order,
        urls: &CallbackUrls,
    ) -> Result<CheckoutSession, PaymentError> {
        let body = order_body(order, urls);
        let response = self.post_json("/v2/checkout/orders", &body).await?;

        if !response.status().is_success() {
            return Err(PaymentError::from_response(response).await);
        }

        let created: CreatedOrder = response
            .json()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))?;

        let redirect_url = created
            .links
            .into_iter()
            .find(|link| link.rel == "approve" || link.rel == "payer-action")
            .map(|link| link.href)
            .ok_or_else(|| PaymentError::Parse("PayPal order has no approve link".to_string()))?;

        debug!(paypal_order_id = %created.id, "Created PayPal order");

        Ok(CheckoutSession {
            session_id: created.id,
            redirect_url,
        })
    }
}

fn money(currency: CurrencyCode, amount: Cents) -> Value {
    json!({ "currency_code": currency.code(), "value": amount.decimal() })
}

/// Build the `POST /v2/checkout/orders` body for an order.
fn order_body(order: &Order, urls: &CallbackUrls) -> Value {
    let currency = order.currency;

    let items: Vec<Value> = order
        .line_items
        .iter()
        .map(|item| {
            let name: String = item.display_name().chars().take(MAX_ITEM_NAME_LEN).collect();
            let mut value = json!({
                "name": name,
                "unit_amount": money(currency, item.unit_price),
                "quantity": item.quantity.to_string(),
            });
            if let (Some(sku), Some(map)) = (&item.sku, value.as_object_mut()) {
                map.insert("sku".to_string(), Value::String(sku.clone()));
            }
            value
        })
        .collect();

    json!({
        "intent": "CAPTURE",
        "purchase_units": [{
            "reference_id": order.id.to_string(),
            "custom_id": order.id.to_string(),
            "amount": {
                "currency_code": currency.code(),
                "value": order.total.decimal(),
                "breakdown": {
                    "item_total": money(currency, order.raw_subtotal),
                    "tax_total": money(currency, order.tax),
                    "shipping": money(currency, order.shipping),
                    "discount": money(currency, order.discount()),
                },
            },
            "items": items,
        }],
        "application_context": {
            "return_url": urls.success_url,
            "cancel_url": urls.cancel_url,
            "shipping_preference": "GET_FROM_FILE",
            "user_action": "PAY_NOW",
        },
    })
}

/// Decode a PayPal webhook body into a [`GatewayEvent`].
///
/// # Errors
///
/// Returns `Parse` if the body is not a PayPal webhook event.
pub fn parse_event(payload: &[u8]) -> Result<GatewayEvent, PaymentError> {
    let event: WebhookEvent =
        serde_json::from_slice(payload).map_err(|e| PaymentError::Parse(e.to_string()))?;

    match event.event_type.as_str() {
        "PAYMENT.CAPTURE.COMPLETED" => {
            let capture: Capture = serde_json::from_value(event.resource)
                .map_err(|e| PaymentError::Parse(e.to_string()))?;

            let Some(order_id) = capture
                .custom_id
                .as_ref()
                .and_then(|raw| raw.parse::<OrderId>().ok())
            else {
                return Ok(GatewayEvent::ignored(event.event_type, "no custom_id on capture"));
            };

            Ok(GatewayEvent::PaymentCompleted(PaymentConfirmation {
                order_id,
                payment_intent_id: Some(capture.id),
                customer_email: None,
                shipping_address: None,
            }))
        }
        "PAYMENT.CAPTURE.REFUNDED" => {
            let refund: RefundResource = serde_json::from_value(event.resource)
                .map_err(|e| PaymentError::Parse(e.to_string()))?;

            let capture_id = refund
                .links
                .iter()
                .find(|link| link.rel == "up")
                .and_then(|link| link.href.rsplit('/').next())
                .filter(|id| !id.is_empty());

            let Some(capture_id) = capture_id else {
                return Ok(GatewayEvent::ignored(event.event_type, "no capture link on refund"));
            };

            let amount = match refund.amount {
                Some(money) => Some(Cents::parse_decimal(&money.value).ok_or_else(|| {
                    PaymentError::Parse(format!("invalid refund amount {:?}", money.value))
                })?),
                None => None,
            };

            Ok(GatewayEvent::PaymentRefunded {
                payment_intent_id: capture_id.to_string(),
                amount,
            })
        }
        _ => Ok(GatewayEvent::ignored(event.event_type, "unhandled event type")),
    }
}
