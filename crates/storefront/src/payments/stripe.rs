//! Stripe Checkout client and webhook handling.
//!
//! Sessions are created with a form-encoded `POST /v1/checkout/sessions`.
//! Webhooks are verified against the `Stripe-Signature` header
//! (`t=<unix>,v1=<hex>`), an HMAC-SHA256 over `"{t}.{raw body}"`.

use std::collections::HashMap;

use backline_core::order::{Order, PaymentConfirmation, ShippingAddress};
use backline_core::types::Cents;
use backline_core::{OrderId, PaymentProvider};
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, instrument};

use super::{CallbackUrls, CheckoutGateway, CheckoutSession, GatewayEvent, PaymentError};
use crate::config::StripeConfig;

/// Maximum age of a signed webhook, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Name of the header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Stripe API client.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: SecretString,
    webhook_secret: SecretString,
    api_base: String,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    payment_status: Option<String>,
    payment_intent: Option<String>,
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    customer_email: Option<String>,
    customer_details: Option<CustomerDetails>,
    shipping_details: Option<StripeShipping>,
    collected_information: Option<CollectedInformation>,
}

#[derive(Debug, Deserialize)]
struct CustomerDetails {
    email: Option<String>,
    name: Option<String>,
    address: Option<StripeAddress>,
}

#[derive(Debug, Deserialize)]
struct CollectedInformation {
    shipping_details: Option<StripeShipping>,
}

#[derive(Debug, Deserialize)]
struct StripeShipping {
    name: Option<String>,
    address: Option<StripeAddress>,
}

#[derive(Debug, Deserialize)]
struct StripeAddress {
    line1: Option<String>,
    line2: Option<String>,
    city: Option<String>,
    postal_code: Option<String>,
    state: Option<String>,
    country: Option<String>,
}

impl StripeAddress {
    fn into_shipping_address(self, name: Option<String>) -> ShippingAddress {
        ShippingAddress {
            name,
            line1: self.line1,
            line2: self.line2,
            city: self.city,
            postal_code: self.postal_code,
            state: self.state,
            country: self.country,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChargeObject {
    payment_intent: Option<String>,
    #[serde(default)]
    refunded: bool,
}

impl CheckoutSessionObject {
    fn order_id(&self) -> Option<OrderId> {
        self.metadata
            .get("order_id")
            .or(self.client_reference_id.as_ref())
            .and_then(|raw| raw.parse().ok())
    }

    fn into_confirmation(self, order_id: OrderId) -> PaymentConfirmation {
        let details = self.customer_details;
        let shipping = self
            .collected_information
            .and_then(|c| c.shipping_details)
            .or(self.shipping_details);

        let shipping_address = match shipping {
            Some(StripeShipping {
                name,
                address: Some(address),
            }) => Some(address.into_shipping_address(name)),
            _ => None,
        };

        let (email, fallback_address) = match details {
            Some(CustomerDetails {
                email,
                name,
                address,
            }) => (email, address.map(|a| a.into_shipping_address(name))),
            None => (None, None),
        };

        PaymentConfirmation {
            order_id,
            payment_intent_id: self.payment_intent,
            customer_email: email.or(self.customer_email),
            shipping_address: shipping_address.or(fallback_address),
        }
    }
}

impl StripeClient {
    #[must_use]
    pub fn new(config: &StripeConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Verify a webhook's `Stripe-Signature` header against the raw body.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignature` if the header is malformed, too old, or no
    /// `v1` entry matches.
    pub fn verify_signature(&self, payload: &[u8], header: &str) -> Result<(), PaymentError> {
        verify_signature_at(
            payload,
            header,
            self.webhook_secret.expose_secret(),
            Utc::now().timestamp(),
        )
    }

    /// Verify and decode a webhook delivery.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignature` on a bad signature and `Parse` on a body
    /// that is not a Stripe event.
    pub fn verify_event(&self, payload: &[u8], header: &str) -> Result<GatewayEvent, PaymentError> {
        self.verify_signature(payload, header)?;
        parse_event(payload)
    }
}

impl CheckoutGateway for StripeClient {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    #[instrument(skip(self, order, urls), fields(order_id = %order.id))]
    async fn create_session(
        &self,
        order: &Order,
        urls: &CallbackUrls,
    ) -> Result<CheckoutSession, PaymentError> {
        let form = session_form(order, urls);

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(self.secret_key.expose_secret())
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PaymentError::from_response(response).await);
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))?;

        let redirect_url = session
            .url
            .ok_or_else(|| PaymentError::Parse("checkout session has no url".to_string()))?;

        debug!(session_id = %session.id, "Created Stripe checkout session");

        Ok(CheckoutSession {
            session_id: session.id,
            redirect_url,
        })
    }
}

/// Compute the hex `v1` signature for `payload` signed at `timestamp`.
///
/// # Errors
///
/// Returns `InvalidSignature` if the HMAC key is rejected.
pub fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, PaymentError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::InvalidSignature(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a signature header as of `now` (unix seconds).
///
/// # Errors
///
/// Returns `InvalidSignature` on any failure.
pub fn verify_signature_at(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), PaymentError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| PaymentError::InvalidSignature("missing or invalid timestamp".to_string()))?;

    if candidates.is_empty() {
        return Err(PaymentError::InvalidSignature(
            "no v1 signature in header".to_string(),
        ));
    }

    if now.abs_diff(timestamp) > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        return Err(PaymentError::InvalidSignature(
            "timestamp outside tolerance".to_string(),
        ));
    }

    let expected = compute_signature(secret, timestamp, payload)?;

    if !candidates
        .iter()
        .any(|candidate| constant_time_compare(&expected, candidate))
    {
        return Err(PaymentError::InvalidSignature(
            "signature mismatch".to_string(),
        ));
    }

    debug!("Stripe signature verified");
    Ok(())
}

/// Decode a Stripe event body into a [`GatewayEvent`].
///
/// # Errors
///
/// Returns `Parse` if the body is not a Stripe event.
pub fn parse_event(payload: &[u8]) -> Result<GatewayEvent, PaymentError> {
    let event: StripeEvent =
        serde_json::from_slice(payload).map_err(|e| PaymentError::Parse(e.to_string()))?;

    match event.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            let session: CheckoutSessionObject = serde_json::from_value(event.data.object)
                .map_err(|e| PaymentError::Parse(e.to_string()))?;

            if session.payment_status.as_deref() != Some("paid") {
                return Ok(GatewayEvent::ignored(event.event_type, "payment not yet paid"));
            }

            let Some(order_id) = session.order_id() else {
                return Ok(GatewayEvent::ignored(event.event_type, "no order id in metadata"));
            };

            Ok(GatewayEvent::PaymentCompleted(
                session.into_confirmation(order_id),
            ))
        }
        "charge.refunded" => {
            let charge: ChargeObject = serde_json::from_value(event.data.object)
                .map_err(|e| PaymentError::Parse(e.to_string()))?;

            if !charge.refunded {
                return Ok(GatewayEvent::ignored(event.event_type, "partial refund"));
            }

            match charge.payment_intent {
                Some(payment_intent_id) => Ok(GatewayEvent::PaymentRefunded {
                    payment_intent_id,
                    amount: None,
                }),
                None => Ok(GatewayEvent::ignored(event.event_type, "no payment intent")),
            }
        }
        _ => Ok(GatewayEvent::ignored(event.event_type, "unhandled event type")),
    }
}

/// Build the form body for a Checkout session.
///
/// Discounted orders are sent as one summary line with the discounted
/// subtotal, since Stripe line items cannot carry negative amounts.
fn session_form(order: &Order, urls: &CallbackUrls) -> Vec<(String, String)> {
    let currency = order.currency.code().to_ascii_lowercase();
    let order_id = order.id.to_string();

    let mut form: Vec<(String, String)> = vec![
        ("mode".to_string(), "payment".to_string()),
        (
            "success_url".to_string(),
            format!("{}&session_id={{CHECKOUT_SESSION_ID}}", urls.success_url),
        ),
        ("cancel_url".to_string(), urls.cancel_url.clone()),
        ("client_reference_id".to_string(), order_id.clone()),
        ("metadata[order_id]".to_string(), order_id.clone()),
        (
            "payment_intent_data[metadata][order_id]".to_string(),
            order_id.clone(),
        ),
        (
            "shipping_address_collection[allowed_countries][0]".to_string(),
            order.country.as_str().to_string(),
        ),
    ];

    if let Some(email) = &order.customer_email {
        form.push(("customer_email".to_string(), email.clone()));
    }

    let mut lines: Vec<(String, Cents, u32)> = if order.discount().is_zero() {
        order
            .line_items
            .iter()
            .map(|item| (item.display_name(), item.unit_price, item.quantity))
            .collect()
    } else {
        vec![(format!("Order #{order_id}"), order.subtotal, 1)]
    };
    lines.push(("VAT".to_string(), order.tax, 1));
    lines.push(("Shipping".to_string(), order.shipping, 1));

    for (index, (name, unit_amount, quantity)) in lines
        .into_iter()
        .filter(|(_, amount, _)| !amount.is_zero())
        .enumerate()
    {
        let prefix = format!("line_items[{index}]");
        form.extend([
            (
                format!("{prefix}[price_data][currency]"),
                currency.clone(),
            ),
            (format!("{prefix}[price_data][product_data][name]"), name),
            (
                format!("{prefix}[price_data][unit_amount]"),
                unit_amount.as_i64().to_string(),
            ),
            (format!("{prefix}[quantity]"), quantity.to_string()),
        ]);
    }

    form
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}
