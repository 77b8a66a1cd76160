//! HTTP route handlers for the storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                    - Liveness
//! GET  /health/ready              - Readiness (store reachable)
//!
//! # Checkout (rate limited)
//! POST /checkout/quote            - Price a cart, nothing persisted
//! POST /checkout/draft            - Pay-later draft order
//! POST /checkout/stripe           - Draft order + Stripe Checkout session
//! POST /checkout/paypal           - Draft order + PayPal order
//! POST /checkout/{order_id}/retry - New gateway session for a pending order
//! GET  /checkout/paypal/return    - Capture an approved PayPal order
//!
//! # Orders
//! GET  /orders/{order_id}         - Order snapshot
//!
//! # Webhooks (raw body, not rate limited)
//! POST /webhooks/stripe
//! POST /webhooks/paypal
//! ```

pub mod checkout;
pub mod health;
pub mod orders;
pub mod webhooks;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::db::Store;
use crate::middleware::{checkout_rate_limiter, request_id_middleware};
use crate::state::AppState;

/// Create the checkout routes router.
pub fn checkout_routes<S: Store>() -> Router<AppState<S>> {
    Router::new()
        .route("/quote", post(checkout::quote::<S>))
        .route("/draft", post(checkout::draft::<S>))
        .route("/stripe", post(checkout::stripe::<S>))
        .route("/paypal", post(checkout::paypal::<S>))
        .route("/{order_id}/retry", post(checkout::retry::<S>))
        .layer(checkout_rate_limiter())
        // Buyer redirect from PayPal, not rate limited
        .route("/paypal/return", get(checkout::paypal_return::<S>))
}

/// Create the webhook routes router.
pub fn webhook_routes<S: Store>() -> Router<AppState<S>> {
    Router::new()
        .route("/stripe", post(webhooks::stripe::<S>))
        .route("/paypal", post(webhooks::paypal::<S>))
}

/// Create all routes for the storefront.
pub fn routes<S: Store>() -> Router<AppState<S>> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness::<S>))
        .nest("/checkout", checkout_routes())
        .route("/orders/{order_id}", get(orders::show::<S>))
        .nest("/webhooks", webhook_routes())
}

/// Build the full application with its middleware stack.
pub fn app<S: Store>(state: AppState<S>) -> Router {
    routes()
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<axum::body::Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = tracing::field::Empty,
                )
            },
        ))
        .with_state(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use secrecy::SecretString;
    use tower::ServiceExt;

    use super::*;
    use crate::config::StorefrontConfig;
    use crate::db::MemoryStore;

    fn test_app() -> Router {
        let config = StorefrontConfig::new(
            SecretString::from("postgres://localhost/backline_test"),
            "http://localhost:3000",
        );
        app(AppState::new(config, MemoryStore::new()).unwrap())
    }

    fn post(uri: &str, body: &'static str) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_checkout_is_rate_limited_per_client() {
        let app = test_app();
        let mut statuses = Vec::new();
        for _ in 0..12 {
            let response = app
                .clone()
                .oneshot(post("/checkout/quote", r#"{"items":[],"country":"DE"}"#))
                .await
                .unwrap();
            statuses.push(response.status());
        }

        assert_eq!(statuses.first(), Some(&StatusCode::BAD_REQUEST));
        assert_eq!(statuses.last(), Some(&StatusCode::TOO_MANY_REQUESTS));
    }

    #[tokio::test]
    async fn test_webhooks_are_not_rate_limited() {
        let app = test_app();
        for _ in 0..12 {
            let response = app
                .clone()
                .oneshot(post("/webhooks/stripe", "{}"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        }
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = test_app()
            .oneshot(Request::get("/admin").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
