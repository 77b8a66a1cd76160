//! Integration test harness for the Backline storefront.
//!
//! Tests drive the real router (middleware, rate limiting, error mapping)
//! with `tower::ServiceExt::oneshot` against the in-memory store. Gateways
//! that need an outbound API are pointed at a local axum mock.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p backline-integration-tests
//! ```

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::Path;
use axum::http::{Request, StatusCode, header};
use axum::routing::post;
use axum::{Json, Router};
use backline_core::catalog::{Product, Variant};
use backline_core::types::Cents;
use backline_core::{CurrencyCode, ProductId};
use backline_storefront::config::{PaypalConfig, StorefrontConfig, StripeConfig};
use backline_storefront::db::MemoryStore;
use backline_storefront::payments::stripe::compute_signature;
use backline_storefront::{AppState, app};
use secrecy::SecretString;
use serde_json::Value;
use tower::ServiceExt;

/// Stripe webhook signing secret used by [`TestApp::with_stripe`].
pub const STRIPE_WEBHOOK_SECRET: &str = "whsec_it_9f2c1e7d4b8a";

/// Session id returned by the mock Stripe API.
pub const MOCK_SESSION_ID: &str = "cs_test_backline_1";

/// Transmission id the mock PayPal API rejects with a 400.
pub const PAYPAL_REJECTED_TRANSMISSION: &str = "tx-malformed";

/// Transmission id the mock PayPal API answers `FAILURE` for.
pub const PAYPAL_FAILED_TRANSMISSION: &str = "tx-forged";

/// Client address sent with every request, for the checkout rate limiter.
const CLIENT_IP: &str = "198.51.100.23";

/// A router over a fresh in-memory store.
pub struct TestApp {
    pub router: Router,
    pub store: MemoryStore,
}

impl TestApp {
    /// App with no payment gateways configured.
    #[must_use]
    pub fn new() -> Self {
        Self::build(config())
    }

    /// App with Stripe configured against `api_base`.
    #[must_use]
    pub fn with_stripe(api_base: &str) -> Self {
        let mut config = config();
        config.stripe = Some(StripeConfig {
            secret_key: SecretString::from("sk_test_it_51Hx7kQ2eZvKYlo2C"),
            webhook_secret: SecretString::from(STRIPE_WEBHOOK_SECRET),
            api_base: api_base.to_string(),
        });
        Self::build(config)
    }

    /// App with PayPal configured against `api_base`.
    #[must_use]
    pub fn with_paypal(api_base: &str) -> Self {
        let mut config = config();
        config.paypal = Some(PaypalConfig {
            client_id: "AZit-backline-client".to_string(),
            client_secret: SecretString::from("EKit-backline-secret-7c1f0a9d"),
            webhook_id: "WH-IT-1".to_string(),
            api_base: api_base.to_string(),
        });
        Self::build(config)
    }

    fn build(config: StorefrontConfig) -> Self {
        let store = MemoryStore::new();
        let state = AppState::new(config, store.clone()).expect("state builds");
        Self {
            router: app(state),
            store,
        }
    }

    /// Send a request and decode the response body.
    ///
    /// JSON bodies are parsed; anything else comes back as a string value.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body reads");
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::get(uri)
                .header("x-forwarded-for", CLIENT_IP)
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
    }

    pub async fn post_json(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .header("x-forwarded-for", CLIENT_IP)
                .body(Body::from(body.to_string()))
                .expect("request builds"),
        )
        .await
    }

    /// GET `uri` and return the status and `Location` header.
    pub async fn get_redirect(&self, uri: &str) -> (StatusCode, Option<String>) {
        let response = self
            .router
            .clone()
            .oneshot(
                Request::get(uri)
                    .header("x-forwarded-for", CLIENT_IP)
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("router is infallible");
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        (response.status(), location)
    }

    /// Post a PayPal webhook with transmission headers for `transmission_id`.
    pub async fn paypal_webhook(&self, event: &Value, transmission_id: &str) -> (StatusCode, Value) {
        self.send(
            Request::post("/webhooks/paypal")
                .header("content-type", "application/json")
                .header("paypal-auth-algo", "SHA256withRSA")
                .header("paypal-cert-url", "https://api.sandbox.paypal.com/v1/notifications/certs/CERT-1")
                .header("paypal-transmission-id", transmission_id)
                .header("paypal-transmission-sig", "c2lnbmF0dXJl")
                .header("paypal-transmission-time", "2026-10-17T09:30:00Z")
                .body(Body::from(event.to_string()))
                .expect("request builds"),
        )
        .await
    }

    /// Post a Stripe webhook, signed now with [`STRIPE_WEBHOOK_SECRET`].
    pub async fn stripe_webhook(&self, event: &Value) -> (StatusCode, Value) {
        let body = event.to_string();
        let header = stripe_signature(STRIPE_WEBHOOK_SECRET, body.as_bytes());
        self.stripe_webhook_with_header(body, &header).await
    }

    pub async fn stripe_webhook_with_header(
        &self,
        body: String,
        header: &str,
    ) -> (StatusCode, Value) {
        self.send(
            Request::post("/webhooks/stripe")
                .header("content-type", "application/json")
                .header("stripe-signature", header)
                .body(Body::from(body))
                .expect("request builds"),
        )
        .await
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

fn config() -> StorefrontConfig {
    StorefrontConfig::new(
        SecretString::from("postgres://unused@localhost/backline"),
        "https://shop.backline.test",
    )
}

/// `Stripe-Signature` header value for `payload`, timestamped now.
#[must_use]
pub fn stripe_signature(secret: &str, payload: &[u8]) -> String {
    let timestamp = chrono::Utc::now().timestamp();
    let signature = compute_signature(secret, timestamp, payload).expect("hmac accepts any key");
    format!("t={timestamp},v1={signature}")
}

/// An active product with no variants.
#[must_use]
pub fn product(id: i32, title: &str, price: i64, stock: i32) -> Product {
    Product {
        id: ProductId::new(id),
        title: title.to_string(),
        sku: None,
        price: Cents::new(price),
        currency: CurrencyCode::EUR,
        stock,
        active: true,
        variants: Vec::new(),
    }
}

/// A size variant with its own stock counter.
#[must_use]
pub fn size(value: &str, stock: i32) -> Variant {
    Variant {
        name: "Size".to_string(),
        value: value.to_string(),
        sku: None,
        price: None,
        stock: Some(stock),
    }
}

/// Serve a stand-in for the Stripe Checkout Sessions API on a random port.
///
/// Returns the base URL to use as `StripeConfig::api_base`.
pub async fn mock_stripe() -> String {
    let router = Router::new().route(
        "/v1/checkout/sessions",
        post(|| async {
            axum::Json(serde_json::json!({
                "id": MOCK_SESSION_ID,
                "object": "checkout.session",
                "url": format!("https://checkout.stripe.com/c/pay/{MOCK_SESSION_ID}"),
            }))
        }),
    );

    serve(router, "bind mock stripe").await
}

/// PayPal order id the mock assigns to our order `custom_id`.
#[must_use]
pub fn paypal_order_id(custom_id: &str) -> String {
    format!("PP-{custom_id}")
}

/// Capture id the mock assigns when capturing our order `custom_id`.
#[must_use]
pub fn paypal_capture_id(custom_id: &str) -> String {
    format!("CAP-{custom_id}")
}

/// Serve a stand-in for the PayPal REST API on a random port.
///
/// Orders and captures are derived from the `custom_id` sent on create, so
/// the mock keeps no state. Webhook verification succeeds except for
/// [`PAYPAL_REJECTED_TRANSMISSION`] and [`PAYPAL_FAILED_TRANSMISSION`].
/// Returns the base URL to use as `PaypalConfig::api_base`.
pub async fn mock_paypal() -> String {
    let router = Router::new()
        .route(
            "/v1/oauth2/token",
            post(|| async {
                Json(serde_json::json!({
                    "scope": "https://uri.paypal.com/services/payments",
                    "access_token": "A21AA-it-token",
                    "token_type": "Bearer",
                    "expires_in": 32_400,
                }))
            }),
        )
        .route(
            "/v2/checkout/orders",
            post(|Json(body): Json<Value>| async move {
                let custom_id = body["purchase_units"][0]["custom_id"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let id = paypal_order_id(&custom_id);
                (
                    StatusCode::CREATED,
                    Json(serde_json::json!({
                        "id": id,
                        "status": "CREATED",
                        "links": [
                            { "href": format!("https://api.sandbox.paypal.com/v2/checkout/orders/{id}"), "rel": "self" },
                            { "href": format!("https://www.sandbox.paypal.com/checkoutnow?token={id}"), "rel": "approve" }
                        ]
                    })),
                )
            }),
        )
        .route(
            "/v2/checkout/orders/{id}/capture",
            post(|Path(id): Path<String>| async move {
                let custom_id = id.strip_prefix("PP-").unwrap_or_default().to_string();
                (
                    StatusCode::CREATED,
                    Json(serde_json::json!({
                        "id": id,
                        "status": "COMPLETED",
                        "payer": { "email_address": "fan@example.com" },
                        "purchase_units": [{
                            "reference_id": custom_id,
                            "shipping": {
                                "name": { "full_name": "Robin Vega" },
                                "address": {
                                    "address_line_1": "Torstrasse 101",
                                    "admin_area_2": "Berlin",
                                    "postal_code": "10119",
                                    "country_code": "DE"
                                }
                            },
                            "payments": {
                                "captures": [{
                                    "id": paypal_capture_id(&custom_id),
                                    "status": "COMPLETED",
                                    "custom_id": custom_id
                                }]
                            }
                        }]
                    })),
                )
            }),
        )
        .route(
            "/v1/notifications/verify-webhook-signature",
            post(|Json(body): Json<Value>| async move {
                match body["transmission_id"].as_str() {
                    Some(PAYPAL_REJECTED_TRANSMISSION) => (
                        StatusCode::BAD_REQUEST,
                        Json(serde_json::json!({
                            "name": "VALIDATION_ERROR",
                            "message": "Invalid request - see details"
                        })),
                    ),
                    Some(PAYPAL_FAILED_TRANSMISSION) => (
                        StatusCode::OK,
                        Json(serde_json::json!({ "verification_status": "FAILURE" })),
                    ),
                    _ => (
                        StatusCode::OK,
                        Json(serde_json::json!({ "verification_status": "SUCCESS" })),
                    ),
                }
            }),
        );

    serve(router, "bind mock paypal").await
}

async fn serve(router: Router, bind_failure: &str) -> String {
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect(bind_failure);
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{addr}")
}

/// A `PAYMENT.CAPTURE.COMPLETED` event for `order_id`.
#[must_use]
pub fn capture_completed(order_id: i32, capture_id: &str) -> Value {
    serde_json::json!({
        "id": format!("WH-{capture_id}"),
        "event_type": "PAYMENT.CAPTURE.COMPLETED",
        "resource_type": "capture",
        "resource": {
            "id": capture_id,
            "status": "COMPLETED",
            "custom_id": order_id.to_string(),
            "amount": { "currency_code": "EUR", "value": "0.00" }
        }
    })
}

/// A `PAYMENT.CAPTURE.REFUNDED` event for `capture_id` refunding `value`.
#[must_use]
pub fn capture_refunded(capture_id: &str, value: &str) -> Value {
    serde_json::json!({
        "id": format!("WH-refund-{capture_id}-{value}"),
        "event_type": "PAYMENT.CAPTURE.REFUNDED",
        "resource_type": "refund",
        "resource": {
            "id": format!("REF-{capture_id}"),
            "status": "COMPLETED",
            "amount": { "currency_code": "EUR", "value": value },
            "links": [
                { "href": format!("https://api.sandbox.paypal.com/v2/payments/refunds/REF-{capture_id}"), "rel": "self" },
                { "href": format!("https://api.sandbox.paypal.com/v2/payments/captures/{capture_id}"), "rel": "up" }
            ]
        }
    })
}

/// A `checkout.session.completed` event for `order_id`.
#[must_use]
pub fn session_completed(order_id: i32, payment_intent: &str) -> Value {
    serde_json::json!({
        "id": format!("evt_{payment_intent}"),
        "object": "event",
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": MOCK_SESSION_ID,
                "object": "checkout.session",
                "payment_status": "paid",
                "payment_intent": payment_intent,
                "client_reference_id": order_id.to_string(),
                "metadata": { "order_id": order_id.to_string() },
                "customer_details": {
                    "email": "fan@example.com",
                    "name": "Robin Vega",
                    "address": {
                        "line1": "Torstrasse 101",
                        "line2": null,
                        "city": "Berlin",
                        "postal_code": "10119",
                        "state": null,
                        "country": "DE"
                    }
                }
            }
        }
    })
}

/// A fully refunded `charge.refunded` event.
#[must_use]
pub fn charge_refunded(payment_intent: &str) -> Value {
    serde_json::json!({
        "id": format!("evt_refund_{payment_intent}"),
        "object": "event",
        "type": "charge.refunded",
        "data": {
            "object": {
                "id": "ch_test_1",
                "object": "charge",
                "payment_intent": payment_intent,
                "refunded": true
            }
        }
    })
}
