//! Fire-and-forget order notifications.
//!
//! Failures are logged and never propagate: a notification must not fail
//! or roll back the payment it describes.

use backline_core::order::Order;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::klaviyo::{KlaviyoClient, TrackEvent};

/// Metric recorded when an order is paid.
pub const PLACED_ORDER: &str = "Placed Order";

/// Metric recorded when an order ships.
pub const SHIPPED_ORDER: &str = "Shipped Order";

/// Dispatches order notifications, or does nothing when unconfigured.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    klaviyo: Option<KlaviyoClient>,
}

impl Notifier {
    #[must_use]
    pub const fn new(klaviyo: Option<KlaviyoClient>) -> Self {
        Self { klaviyo }
    }

    /// A notifier that drops every message.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { klaviyo: None }
    }

    /// Notify that `order` was paid.
    pub async fn order_paid(&self, order: &Order) {
        self.send(PLACED_ORDER, "placed", order).await;
    }

    /// Notify that `order` shipped.
    pub async fn order_shipped(&self, order: &Order) {
        self.send(SHIPPED_ORDER, "shipped", order).await;
    }

    /// Run [`Self::order_paid`] on a detached task.
    pub fn spawn_order_paid(&self, order: Order) {
        let notifier = self.clone();
        tokio::spawn(async move { notifier.order_paid(&order).await });
    }

    async fn send(&self, metric: &str, suffix: &str, order: &Order) {
        let Some(client) = &self.klaviyo else {
            debug!(order_id = %order.id, metric, "Klaviyo not configured, skipping notification");
            return;
        };

        let Some(event) = order_event(metric, suffix, order) else {
            debug!(order_id = %order.id, metric, "Order has no email, skipping notification");
            return;
        };

        if let Err(e) = client.track_event(&event).await {
            warn!(order_id = %order.id, metric, error = %e, "Failed to send order notification");
        }
    }
}

/// Build the event for `order`, or `None` if there is nobody to notify.
fn order_event(metric: &str, suffix: &str, order: &Order) -> Option<TrackEvent> {
    let email = order.customer_email.clone()?;

    let items: Vec<Value> = order
        .line_items
        .iter()
        .map(|item| {
            json!({
                "ProductID": item.product_id.to_string(),
                "ProductName": item.display_name(),
                "SKU": item.sku,
                "Quantity": item.quantity,
                "ItemPrice": item.unit_price.decimal(),
            })
        })
        .collect();

    let mut properties = Map::new();
    properties.insert("OrderId".to_string(), json!(order.id.to_string()));
    properties.insert("Currency".to_string(), json!(order.currency.code()));
    properties.insert("Subtotal".to_string(), json!(order.subtotal.decimal()));
    properties.insert("Shipping".to_string(), json!(order.shipping.decimal()));
    properties.insert("Tax".to_string(), json!(order.tax.decimal()));
    properties.insert("Total".to_string(), json!(order.total.decimal()));
    properties.insert("Items".to_string(), Value::Array(items));
    if let Some(tracking) = &order.tracking_number {
        properties.insert("TrackingNumber".to_string(), json!(tracking));
    }

    Some(TrackEvent {
        metric: metric.to_string(),
        email,
        value: order.total.decimal().parse().ok(),
        unique_id: format!("order-{}-{suffix}", order.id),
        properties,
    })
}
