//! Checkout endpoints: quotes, draft orders and Stripe sessions.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use backline_core::discount::{GiftCard, Promotion, PromotionKind};
use backline_core::types::Cents;
use backline_core::{CountryCode, GiftCardId, GiftCardStatus, PromotionId};
use backline_integration_tests::{MOCK_SESSION_ID, TestApp, mock_stripe, product, size};
use chrono::{Duration, Utc};
use serde_json::json;

fn cart(product_id: i32, quantity: u32, country: &str) -> serde_json::Value {
    json!({
        "items": [{ "product_id": product_id, "quantity": quantity }],
        "country": country,
    })
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");

    let (status, _) = app.get("/health/ready").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_quote_simple_order_to_germany() {
    let app = TestApp::new();
    app.store.insert_product(product(1, "Tour Shirt", 1500, 20)).await;

    let (status, body) = app.post_json("/checkout/quote", &cart(1, 2, "DE")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["currency"], "EUR");
    assert_eq!(body["country"], "DE");
    assert_eq!(body["subtotal"], 3000);
    assert_eq!(body["shipping"], 500);
    assert_eq!(body["tax"], 570);
    assert_eq!(body["total"], 4070);
    assert_eq!(body["lines"][0]["line_total"], 3000);
    assert_eq!(app.store.order_count().await, 0);
}

#[tokio::test]
async fn test_quote_gift_card_capped_at_subtotal() {
    let app = TestApp::new();
    app.store.insert_product(product(1, "Enamel Pin", 1000, 5)).await;
    app.store
        .insert_gift_card(GiftCard {
            id: GiftCardId::new(1),
            code: "BIRTHDAY".to_string(),
            balance: Cents::new(5000),
            original_amount: Cents::new(5000),
            status: GiftCardStatus::Active,
            expires_at: None,
        })
        .await;

    let mut request = cart(1, 1, "DE");
    request["gift_card_code"] = json!("birthday");
    let (status, body) = app.post_json("/checkout/quote", &request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["raw_subtotal"], 1000);
    assert_eq!(body["gift_card"]["amount"], 1000);
    assert_eq!(body["subtotal"], 0);
    assert_eq!(body["tax"], 0);
}

#[tokio::test]
async fn test_quote_expired_promotion_applies_nothing() {
    let app = TestApp::new();
    app.store.insert_product(product(1, "Tour Shirt", 1500, 20)).await;
    app.store
        .insert_promotion(Promotion {
            id: PromotionId::new(1),
            code: "SPRING".to_string(),
            kind: PromotionKind::Percent,
            value: 20,
            active: true,
            starts_at: None,
            ends_at: Some(Utc::now() - Duration::days(1)),
            min_subtotal: None,
        })
        .await;

    let mut request = cart(1, 2, "DE");
    request["promotion_code"] = json!("spring");
    let (status, body) = app.post_json("/checkout/quote", &request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["promotion"], serde_json::Value::Null);
    assert_eq!(body["discount"], 0);
    assert_eq!(body["total"], 4070);
}

#[tokio::test]
async fn test_quote_uses_shipping_override() {
    let app = TestApp::new();
    app.store.insert_product(product(1, "Tour Shirt", 1500, 20)).await;
    app.store
        .set_shipping_override(CountryCode::parse("CH").unwrap(), Cents::new(900))
        .await;

    let (status, body) = app.post_json("/checkout/quote", &cart(1, 1, "CH")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["shipping"], 900);
}

#[tokio::test]
async fn test_quote_unknown_product_is_404() {
    let app = TestApp::new();
    let (status, body) = app.post_json("/checkout/quote", &cart(99, 1, "DE")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_quote_bad_country_is_400() {
    let app = TestApp::new();
    app.store.insert_product(product(1, "Tour Shirt", 1500, 20)).await;
    let (status, _) = app
        .post_json("/checkout/quote", &cart(1, 1, "Germany"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_draft_creates_pending_order() {
    let app = TestApp::new();
    app.store.insert_product(product(1, "Tour Shirt", 1500, 20)).await;

    let mut request = cart(1, 2, "DE");
    request["email"] = json!("Fan@Example.com");
    let (status, body) = app.post_json("/checkout/draft", &request).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], 1);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["total"], 4070);
    assert_eq!(body["line_items"][0]["unit_price"], 1500);
    assert_eq!(body["line_items"][0]["quantity"], 2);

    let (status, order) = app.get("/orders/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "pending");
    assert_eq!(order["total"], 4070);
}

#[tokio::test]
async fn test_draft_insufficient_stock_persists_nothing() {
    let app = TestApp::new();
    app.store.insert_product(product(1, "Signed LP", 3000, 1)).await;

    let (status, body) = app.post_json("/checkout/draft", &cart(1, 2, "DE")).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());
    assert_eq!(app.store.order_count().await, 0);
}

#[tokio::test]
async fn test_draft_checks_variant_stock() {
    let app = TestApp::new();
    let mut shirt = product(1, "Tour Shirt", 1500, 0);
    shirt.variants = vec![size("S", 0), size("M", 3)];
    app.store.insert_product(shirt).await;

    let request = json!({
        "items": [{ "product_id": 1, "quantity": 1, "variant_index": 0 }],
        "country": "DE",
    });
    let (status, _) = app.post_json("/checkout/draft", &request).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let request = json!({
        "items": [{ "product_id": 1, "quantity": 2, "variant_index": 1 }],
        "country": "DE",
    });
    let (status, body) = app.post_json("/checkout/draft", &request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["line_items"][0]["variant_label"], "Size: M");
}

#[tokio::test]
async fn test_unknown_order_is_404() {
    let app = TestApp::new();
    let (status, _) = app.get("/orders/4242").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stripe_checkout_without_gateway_is_503() {
    let app = TestApp::new();
    app.store.insert_product(product(1, "Tour Shirt", 1500, 20)).await;

    let (status, _) = app.post_json("/checkout/stripe", &cart(1, 1, "DE")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(app.store.order_count().await, 0);
}

#[tokio::test]
async fn test_stripe_checkout_records_session() {
    let api_base = mock_stripe().await;
    let app = TestApp::with_stripe(&api_base);
    app.store.insert_product(product(1, "Tour Shirt", 1500, 20)).await;

    let (status, body) = app.post_json("/checkout/stripe", &cart(1, 2, "DE")).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["order_id"], 1);
    assert_eq!(body["provider"], "stripe");
    assert_eq!(body["session_id"], MOCK_SESSION_ID);
    assert_eq!(body["total"], 4070);
    assert!(
        body["redirect_url"]
            .as_str()
            .unwrap()
            .starts_with("https://checkout.stripe.com/")
    );

    let (_, order) = app.get("/orders/1").await;
    assert_eq!(order["status"], "pending");
    assert_eq!(order["provider"], "stripe");
    assert_eq!(order["checkout_session_id"], MOCK_SESSION_ID);
}

#[tokio::test]
async fn test_retry_pending_order() {
    let api_base = mock_stripe().await;
    let app = TestApp::with_stripe(&api_base);
    app.store.insert_product(product(1, "Tour Shirt", 1500, 20)).await;
    app.post_json("/checkout/stripe", &cart(1, 1, "DE")).await;

    let (status, body) = app.post_json("/checkout/1/retry", &json!({})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order_id"], 1);
    assert_eq!(body["session_id"], MOCK_SESSION_ID);
    assert_eq!(app.store.order_count().await, 1);
}

#[tokio::test]
async fn test_retry_unknown_order_is_404() {
    let api_base = mock_stripe().await;
    let app = TestApp::with_stripe(&api_base);
    let (status, _) = app
        .post_json("/checkout/77/retry?provider=stripe", &json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let app = TestApp::new();
    let response = tower::ServiceExt::oneshot(
        app.router.clone(),
        axum::http::Request::get("/health")
            .header("x-request-id", "it-trace-1")
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(response.headers()["x-request-id"], "it-trace-1");
}
