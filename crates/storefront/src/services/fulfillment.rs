//! Operator-driven order transitions: shipping and cancelling.

use backline_core::order::Order;
use backline_core::{OrderId, OrderStatus};
use thiserror::Error;
use tracing::{info, instrument};

use super::notifications::Notifier;
use crate::db::{OrderStore, RepositoryError, TransitionOutcome};

#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("order {id} is {status}")]
    InvalidTransition { id: OrderId, status: OrderStatus },

    #[error("tracking number must not be empty")]
    EmptyTracking,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

fn applied(id: OrderId, outcome: TransitionOutcome) -> Result<Order, FulfillmentError> {
    match outcome {
        TransitionOutcome::Applied(order) => Ok(order),
        TransitionOutcome::Rejected(status) => Err(FulfillmentError::InvalidTransition { id, status }),
        TransitionOutcome::NotFound => Err(FulfillmentError::OrderNotFound(id)),
    }
}

/// Mark a paid order as shipped and notify the customer.
///
/// # Errors
///
/// Returns `InvalidTransition` unless the order is `paid`.
#[instrument(skip(store, notifier))]
pub async fn fulfill<S: OrderStore + Sync>(
    store: &S,
    notifier: &Notifier,
    id: OrderId,
    tracking_number: &str,
) -> Result<Order, FulfillmentError> {
    let tracking_number = tracking_number.trim();
    if tracking_number.is_empty() {
        return Err(FulfillmentError::EmptyTracking);
    }

    let order = applied(id, store.mark_fulfilled(id, tracking_number).await?)?;
    info!(order_id = %id, tracking_number, "Order fulfilled");
    notifier.order_shipped(&order).await;
    Ok(order)
}

/// Cancel a pending or paid order.
///
/// Stock and gift card balances are not restored.
///
/// # Errors
///
/// Returns `InvalidTransition` for fulfilled, refunded or cancelled orders.
#[instrument(skip(store))]
pub async fn cancel<S: OrderStore + Sync>(store: &S, id: OrderId) -> Result<Order, FulfillmentError> {
    let order = applied(id, store.cancel_order(id).await?)?;
    info!(order_id = %id, "Order cancelled");
    Ok(order)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use backline_core::order::{NewOrder, PaymentConfirmation};
    use backline_core::pricing::Totals;
    use backline_core::types::Cents;
    use backline_core::{CountryCode, CurrencyCode};

    use super::*;
    use crate::db::MemoryStore;

    async fn order(store: &MemoryStore) -> OrderId {
        store
            .create_order(NewOrder {
                currency: CurrencyCode::EUR,
                country: CountryCode::parse("NL").unwrap(),
                line_items: Vec::new(),
                totals: Totals {
                    total: Cents::new(500),
                    shipping: Cents::new(500),
                    ..Totals::default()
                },
                discounts: backline_core::discount::AppliedDiscounts::default(),
                provider: None,
                customer_email: None,
            })
            .await
            .unwrap()
            .id
    }

    async fn pay(store: &MemoryStore, id: OrderId) {
        store
            .confirm_payment(&PaymentConfirmation {
                order_id: id,
                payment_intent_id: Some("pi_ship".to_string()),
                customer_email: None,
                shipping_address: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fulfill_paid_order() {
        let store = MemoryStore::new();
        let id = order(&store).await;
        pay(&store, id).await;

        let shipped = fulfill(&store, &Notifier::disabled(), id, " DHL123 ").await.unwrap();
        assert_eq!(shipped.status, OrderStatus::Fulfilled);
        assert_eq!(shipped.tracking_number.as_deref(), Some("DHL123"));
    }

    #[tokio::test]
    async fn test_fulfill_pending_order_rejected() {
        let store = MemoryStore::new();
        let id = order(&store).await;

        assert!(matches!(
            fulfill(&store, &Notifier::disabled(), id, "DHL123").await,
            Err(FulfillmentError::InvalidTransition {
                status: OrderStatus::Pending,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_fulfill_requires_tracking() {
        let store = MemoryStore::new();
        let id = order(&store).await;
        assert!(matches!(
            fulfill(&store, &Notifier::disabled(), id, "  ").await,
            Err(FulfillmentError::EmptyTracking)
        ));
    }

    #[tokio::test]
    async fn test_cancel_twice() {
        let store = MemoryStore::new();
        let id = order(&store).await;

        assert_eq!(cancel(&store, id).await.unwrap().status, OrderStatus::Cancelled);
        assert!(matches!(
            cancel(&store, id).await,
            Err(FulfillmentError::InvalidTransition {
                status: OrderStatus::Cancelled,
                ..
            })
        ));
        assert!(matches!(
            cancel(&store, OrderId::new(77)).await,
            Err(FulfillmentError::OrderNotFound(_))
        ));
    }
}
