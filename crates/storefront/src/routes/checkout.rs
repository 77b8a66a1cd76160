//! Checkout route handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Redirect;
use backline_core::catalog::VariantIndex;
use backline_core::discount::AppliedCode;
use backline_core::order::Order;
use backline_core::pricing::{PricedLine, Totals};
use backline_core::types::Cents;
use backline_core::{CountryCode, CurrencyCode, OrderId, PaymentProvider, ProductId};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::db::Store;
use crate::error::{AppError, Result};
use crate::payments::{CheckoutSession, GatewayEvent, PaymentError};
use crate::services::{CheckoutError, CheckoutRequest, CheckoutService, Quote, Reconciler};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct QuoteLine {
    pub product_id: ProductId,
    pub variant_index: Option<VariantIndex>,
    pub title: String,
    pub variant_label: Option<String>,
    pub unit_price: Cents,
    pub quantity: u32,
    pub line_total: Cents,
}

/// Priced cart returned by `POST /checkout/quote`.
#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub currency: CurrencyCode,
    pub country: CountryCode,
    pub lines: Vec<QuoteLine>,
    #[serde(flatten)]
    pub totals: Totals,
    pub promotion: Option<AppliedCode>,
    pub gift_card: Option<AppliedCode>,
}

impl From<Quote> for QuoteResponse {
    fn from(quote: Quote) -> Self {
        Self {
            currency: quote.currency,
            country: quote.country,
            lines: quote
                .lines
                .iter()
                .map(|line| QuoteLine {
                    product_id: line.product_id,
                    variant_index: line.variant_index,
                    title: line.title.clone(),
                    variant_label: line.variant_label.clone(),
                    unit_price: line.unit_price,
                    quantity: line.quantity,
                    line_total: line.line_total(),
                })
                .collect(),
            totals: quote.totals,
            promotion: quote.discounts.promotion,
            gift_card: quote.discounts.gift_card,
        }
    }
}

/// Response for the checkout endpoints that start a gateway session.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub order_id: OrderId,
    pub provider: PaymentProvider,
    pub session_id: String,
    pub redirect_url: String,
    pub total: Cents,
}

impl SessionResponse {
    fn new(order: &Order, provider: PaymentProvider, session: CheckoutSession) -> Self {
        Self {
            order_id: order.id,
            provider,
            session_id: session.session_id,
            redirect_url: session.redirect_url,
            total: order.total,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RetryParams {
    /// Gateway to retry with; defaults to the order's own.
    pub provider: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaypalReturnParams {
    /// PayPal order id, appended by PayPal.
    pub token: String,
    pub order_id: Option<OrderId>,
}

/// `POST /checkout/quote`
#[instrument(skip(state, request))]
pub async fn quote<S: Store>(
    State(state): State<AppState<S>>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<QuoteResponse>> {
    let quote = CheckoutService::new(state.store(), state.config())
        .quote(&request)
        .await?;
    Ok(Json(quote.into()))
}

/// `POST /checkout/draft` - pay-later order, no gateway involved.
#[instrument(skip(state, request))]
pub async fn draft<S: Store>(
    State(state): State<AppState<S>>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<Order>)> {
    let order = CheckoutService::new(state.store(), state.config())
        .create_draft(&request, None)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// `POST /checkout/stripe`
#[instrument(skip(state, request))]
pub async fn stripe<S: Store>(
    State(state): State<AppState<S>>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<SessionResponse>)> {
    let (order, session) = CheckoutService::new(state.store(), state.config())
        .checkout(state.stripe(), PaymentProvider::Stripe, &request)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse::new(&order, PaymentProvider::Stripe, session)),
    ))
}

/// `POST /checkout/paypal`
#[instrument(skip(state, request))]
pub async fn paypal<S: Store>(
    State(state): State<AppState<S>>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<SessionResponse>)> {
    let (order, session) = CheckoutService::new(state.store(), state.config())
        .checkout(state.paypal(), PaymentProvider::Paypal, &request)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse::new(&order, PaymentProvider::Paypal, session)),
    ))
}

/// `POST /checkout/{order_id}/retry[?provider=stripe|paypal]`
#[instrument(skip(state))]
pub async fn retry<S: Store>(
    State(state): State<AppState<S>>,
    Path(order_id): Path<OrderId>,
    Query(params): Query<RetryParams>,
) -> Result<Json<SessionResponse>> {
    let requested = params
        .provider
        .as_deref()
        .map(str::parse::<PaymentProvider>)
        .transpose()
        .map_err(AppError::BadRequest)?;

    let provider = match requested {
        Some(provider) => provider,
        None => state
            .store()
            .get_order(order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(order_id))?
            .provider
            .ok_or_else(|| AppError::BadRequest("order has no payment provider".to_string()))?,
    };

    let service = CheckoutService::new(state.store(), state.config());
    let (order, session) = match provider {
        PaymentProvider::Stripe => service.retry(state.stripe(), provider, order_id).await?,
        PaymentProvider::Paypal => service.retry(state.paypal(), provider, order_id).await?,
    };

    Ok(Json(SessionResponse::new(&order, provider, session)))
}

/// `GET /checkout/paypal/return?token=<paypal order>&order_id=<id>`
///
/// Captures the approved PayPal order and settles it through the reconciler,
/// so the `PAYMENT.CAPTURE.COMPLETED` webhook that follows is a no-op.
#[instrument(skip(state))]
pub async fn paypal_return<S: Store>(
    State(state): State<AppState<S>>,
    Query(params): Query<PaypalReturnParams>,
) -> Result<Redirect> {
    let client = state.paypal().ok_or(CheckoutError::GatewayUnavailable(
        PaymentError::NotConfigured(PaymentProvider::Paypal),
    ))?;

    let confirmation = client
        .capture_order(&params.token)
        .await
        .map_err(CheckoutError::from)?;

    let order_id = match confirmation {
        Some(confirmation) => {
            let order_id = confirmation.order_id;
            if params.order_id.is_some_and(|id| id != order_id) {
                warn!(
                    query_order_id = ?params.order_id,
                    %order_id,
                    "PayPal return order id does not match capture"
                );
            }
            Reconciler::new(state.store(), state.notifier())
                .apply(GatewayEvent::PaymentCompleted(confirmation))
                .await?;
            Some(order_id)
        }
        None => params.order_id,
    };

    let base = &state.config().base_url;
    Ok(Redirect::to(&order_id.map_or_else(
        || format!("{base}/checkout/success"),
        |id| format!("{base}/checkout/success?order_id={id}"),
    )))
}
