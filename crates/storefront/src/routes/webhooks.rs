//! Payment gateway webhooks.
//!
//! Bodies are taken as raw bytes: signatures cover the exact bytes sent.
//! Responses: 200 for handled or ignored events, 400 for bad signatures,
//! 5xx for failures the gateway should retry.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use backline_core::PaymentProvider;
use serde::Serialize;
use tracing::instrument;

use crate::db::Store;
use crate::error::{Result, add_breadcrumb};
use crate::payments::GatewayEvent;
use crate::payments::stripe::SIGNATURE_HEADER;
use crate::services::{ReconcileOutcome, Reconciler, WebhookError};
use crate::state::AppState;

/// Acknowledgement body.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: &'static str,
}

async fn reconcile<S: Store>(
    state: &AppState<S>,
    provider: PaymentProvider,
    event: GatewayEvent,
) -> Result<Json<WebhookAck>> {
    let outcome: ReconcileOutcome = Reconciler::new(state.store(), state.notifier())
        .apply(event)
        .await
        .map_err(WebhookError::from)?;

    let provider = provider.to_string();
    add_breadcrumb(
        "webhook",
        outcome.as_str(),
        Some(&[("provider", provider.as_str())]),
    );

    Ok(Json(WebhookAck {
        received: true,
        outcome: outcome.as_str(),
    }))
}

/// `POST /webhooks/stripe`
#[instrument(skip_all)]
pub async fn stripe<S: Store>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    let client = state
        .stripe()
        .ok_or(WebhookError::NotConfigured(PaymentProvider::Stripe))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| WebhookError::InvalidSignature("missing Stripe-Signature header".to_string()))?;

    let event = client
        .verify_event(&body, signature)
        .map_err(WebhookError::from)?;

    reconcile(&state, PaymentProvider::Stripe, event).await
}

/// `POST /webhooks/paypal`
#[instrument(skip_all)]
pub async fn paypal<S: Store>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    let client = state
        .paypal()
        .ok_or(WebhookError::NotConfigured(PaymentProvider::Paypal))?;

    let event = client
        .verify_event(&headers, &body)
        .await
        .map_err(WebhookError::from)?;

    reconcile(&state, PaymentProvider::Paypal, event).await
}
