//! Payment gateway clients.
//!
//! # Gateways
//!
//! - [`stripe`] - Stripe Checkout sessions and signed webhooks
//! - [`paypal`] - PayPal Orders v2, captures and webhook verification
//!
//! Both implement [`CheckoutGateway`] for session creation and translate
//! their webhook payloads into the same [`GatewayEvent`] union, so the
//! reconciler never looks at gateway-specific JSON.

pub mod paypal;
pub mod stripe;
pub mod token_cache;

use std::future::Future;
use std::time::Duration;

use backline_core::order::{Order, PaymentConfirmation};
use backline_core::types::Cents;
use backline_core::{OrderId, PaymentProvider};
use thiserror::Error;

pub use paypal::PaypalClient;
pub use stripe::StripeClient;
pub use token_cache::TokenCache;

/// Errors that can occur when talking to a payment gateway.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The gateway has no credentials configured.
    #[error("{0} is not configured")]
    NotConfigured(PaymentProvider),

    /// HTTP request failed (connect error, timeout, ...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to parse a response or payload.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Webhook signature did not verify.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
}

impl PaymentError {
    /// Build an `Api` error from a non-success response.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Self::Api { status, message }
    }
}

/// Hosted payment session created for an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    /// Stripe Checkout session id or PayPal order id.
    pub session_id: String,
    /// Where to send the buyer.
    pub redirect_url: String,
}

/// Callback URLs handed to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackUrls {
    pub success_url: String,
    pub cancel_url: String,
}

impl CallbackUrls {
    /// Standard success/cancel pages for `order_id` under `base_url`.
    #[must_use]
    pub fn for_order(base_url: &str, order_id: OrderId) -> Self {
        Self {
            success_url: format!("{base_url}/checkout/success?order_id={order_id}"),
            cancel_url: format!("{base_url}/checkout/cancel?order_id={order_id}"),
        }
    }

    /// PayPal returns the buyer to the capture endpoint rather than the
    /// success page.
    #[must_use]
    pub fn for_paypal(base_url: &str, order_id: OrderId) -> Self {
        Self {
            success_url: format!("{base_url}/checkout/paypal/return?order_id={order_id}"),
            ..Self::for_order(base_url, order_id)
        }
    }
}

/// A gateway that can host a payment page for an order.
pub trait CheckoutGateway {
    /// Which provider this is.
    fn provider(&self) -> PaymentProvider;

    /// Create a hosted session for `order`.
    ///
    /// Line items are taken from the order snapshot, never re-priced.
    fn create_session(
        &self,
        order: &Order,
        urls: &CallbackUrls,
    ) -> impl Future<Output = Result<CheckoutSession, PaymentError>> + Send;
}

/// The webhook events the reconciler acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Money for an order was captured.
    PaymentCompleted(PaymentConfirmation),
    /// A payment was refunded.
    PaymentRefunded {
        /// Stripe payment intent id or PayPal capture id.
        payment_intent_id: String,
        /// Refunded amount, when the gateway reports it per refund. `None`
        /// means the gateway already confirmed the refund is full.
        amount: Option<Cents>,
    },
    /// Anything else. Acknowledged and dropped.
    Ignored {
        event_type: String,
        reason: &'static str,
    },
}

impl GatewayEvent {
    pub(crate) fn ignored(event_type: impl Into<String>, reason: &'static str) -> Self {
        Self::Ignored {
            event_type: event_type.into(),
            reason,
        }
    }
}

/// Build the HTTP client shared by the gateway clients.
///
/// # Errors
///
/// Returns error if the HTTP client fails to build.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, PaymentError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(concat!("backline-storefront/", env!("CARGO_PKG_VERSION")))
        .build()?)
}
