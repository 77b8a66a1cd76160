//! PayPal return capture and webhooks through the HTTP surface.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use backline_core::ProductId;
use backline_integration_tests::{
    PAYPAL_FAILED_TRANSMISSION, PAYPAL_REJECTED_TRANSMISSION, TestApp, capture_completed,
    capture_refunded, mock_paypal, paypal_capture_id, paypal_order_id, product,
};
use serde_json::json;

const TRANSMISSION: &str = "tx-8d1e0c52";

async fn paypal_app() -> TestApp {
    let app = TestApp::with_paypal(&mock_paypal().await);
    app.store.insert_product(product(1, "Tour Shirt", 1500, 5)).await;
    app
}

/// Start a PayPal checkout for two shirts and return the order id.
async fn place_order(app: &TestApp) -> i32 {
    let (status, body) = app
        .post_json(
            "/checkout/paypal",
            &json!({
                "items": [{ "product_id": 1, "quantity": 2 }],
                "country": "DE",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id = i32::try_from(body["order_id"].as_i64().unwrap()).unwrap();
    assert_eq!(body["session_id"], paypal_order_id(&order_id.to_string()));
    assert!(
        body["redirect_url"]
            .as_str()
            .unwrap()
            .contains("checkoutnow?token=PP-")
    );
    order_id
}

/// Send the buyer back from PayPal and assert the success redirect.
async fn return_from_paypal(app: &TestApp, order_id: i32) {
    let token = paypal_order_id(&order_id.to_string());
    let (status, location) = app
        .get_redirect(&format!(
            "/checkout/paypal/return?token={token}&order_id={order_id}"
        ))
        .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(
        location.as_deref(),
        Some(format!("https://shop.backline.test/checkout/success?order_id={order_id}").as_str())
    );
}

async fn stock(app: &TestApp) -> i32 {
    app.store.product(ProductId::new(1)).await.unwrap().stock
}

#[tokio::test]
async fn test_return_captures_and_settles_order() {
    let app = paypal_app().await;
    let order_id = place_order(&app).await;

    return_from_paypal(&app, order_id).await;

    let (_, order) = app.get(&format!("/orders/{order_id}")).await;
    assert_eq!(order["status"], "paid");
    assert_eq!(order["provider"], "paypal");
    assert_eq!(
        order["payment_intent_id"],
        paypal_capture_id(&order_id.to_string())
    );
    assert_eq!(order["customer_email"], "fan@example.com");
    assert_eq!(order["shipping_address"]["city"], "Berlin");
    assert_eq!(stock(&app).await, 3);
}

#[tokio::test]
async fn test_capture_webhook_after_return_changes_nothing() {
    let app = paypal_app().await;
    let order_id = place_order(&app).await;
    return_from_paypal(&app, order_id).await;
    let (_, settled) = app.get(&format!("/orders/{order_id}")).await;

    let capture_id = paypal_capture_id(&order_id.to_string());
    let (status, body) = app
        .paypal_webhook(&capture_completed(order_id, &capture_id), TRANSMISSION)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "already_processed");
    assert_eq!(stock(&app).await, 3);
    let (_, order) = app.get(&format!("/orders/{order_id}")).await;
    assert_eq!(order, settled);
}

#[tokio::test]
async fn test_reloading_return_page_settles_once() {
    let app = paypal_app().await;
    let order_id = place_order(&app).await;

    return_from_paypal(&app, order_id).await;
    return_from_paypal(&app, order_id).await;

    assert_eq!(stock(&app).await, 3);
    let (_, order) = app.get(&format!("/orders/{order_id}")).await;
    assert_eq!(order["status"], "paid");
}

#[tokio::test]
async fn test_capture_webhook_without_return_settles_order() {
    let app = paypal_app().await;
    let order_id = place_order(&app).await;

    let (status, body) = app
        .paypal_webhook(&capture_completed(order_id, "CAP-direct"), TRANSMISSION)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "paid");
    assert_eq!(stock(&app).await, 3);
}

#[tokio::test]
async fn test_partial_refund_keeps_order_paid() {
    let app = paypal_app().await;
    let order_id = place_order(&app).await;
    return_from_paypal(&app, order_id).await;
    let capture_id = paypal_capture_id(&order_id.to_string());

    let (status, body) = app
        .paypal_webhook(&capture_refunded(&capture_id, "1.00"), TRANSMISSION)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "ignored");
    let (_, order) = app.get(&format!("/orders/{order_id}")).await;
    assert_eq!(order["status"], "paid");

    let total = order["total"].as_i64().unwrap();
    let full = format!("{}.{:02}", total / 100, total % 100);
    let (status, body) = app
        .paypal_webhook(&capture_refunded(&capture_id, &full), TRANSMISSION)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "refunded");
    let (_, order) = app.get(&format!("/orders/{order_id}")).await;
    assert_eq!(order["status"], "refunded");
}

#[tokio::test]
async fn test_unverifiable_delivery_is_400_and_changes_nothing() {
    let app = paypal_app().await;
    let order_id = place_order(&app).await;
    let event = capture_completed(order_id, "CAP-forged");

    for transmission in [PAYPAL_REJECTED_TRANSMISSION, PAYPAL_FAILED_TRANSMISSION] {
        let (status, body) = app.paypal_webhook(&event, transmission).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{transmission}");
        assert!(body["error"].is_string());
    }

    assert_eq!(stock(&app).await, 5);
    let (_, order) = app.get(&format!("/orders/{order_id}")).await;
    assert_eq!(order["status"], "pending");
}
