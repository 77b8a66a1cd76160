//! Order lookup.

use axum::Json;
use axum::extract::{Path, State};
use backline_core::OrderId;
use backline_core::order::Order;
use tracing::instrument;

use crate::db::Store;
use crate::error::{AppError, Result};
use crate::state::AppState;

/// `GET /orders/{order_id}` - the order snapshot shown on the success page.
#[instrument(skip(state))]
pub async fn show<S: Store>(
    State(state): State<AppState<S>>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Order>> {
    state
        .store()
        .get_order(order_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id}")))
}
