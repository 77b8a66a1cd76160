//! Order fulfillment and cancellation.
//!
//! # Usage
//!
//! ```bash
//! bl-cli orders fulfill 42 --tracking 00340434161094042557
//! bl-cli orders cancel 42
//! ```
//!
//! Fulfilling sends the "Shipped Order" Klaviyo event when `KLAVIYO_API_KEY`
//! is set. Cancelling does not restore stock or gift card balances.

use std::time::Duration;

use backline_core::OrderId;
use backline_storefront::config::KlaviyoConfig;
use backline_storefront::services::Notifier;
use backline_storefront::services::fulfillment;
use backline_storefront::services::klaviyo::KlaviyoClient;

use super::connect;

const KLAVIYO_TIMEOUT: Duration = Duration::from_secs(10);

fn notifier() -> Result<Notifier, Box<dyn std::error::Error>> {
    let client = KlaviyoConfig::from_env()?
        .map(|config| KlaviyoClient::new(&config, KLAVIYO_TIMEOUT))
        .transpose()?;
    if client.is_none() {
        tracing::warn!("KLAVIYO_API_KEY not set, customer will not be notified");
    }
    Ok(Notifier::new(client))
}

/// Mark a paid order as fulfilled.
///
/// # Errors
///
/// Returns an error unless the order exists and is `paid`.
pub async fn fulfill(id: i32, tracking_number: &str) -> Result<(), Box<dyn std::error::Error>> {
    let notifier = notifier()?;
    let store = connect().await?;

    let order = fulfillment::fulfill(&store, &notifier, OrderId::new(id), tracking_number).await?;
    tracing::info!(
        "Order {} fulfilled, tracking {}",
        order.id,
        order.tracking_number.as_deref().unwrap_or_default()
    );
    Ok(())
}

/// Cancel a pending or paid order.
///
/// # Errors
///
/// Returns an error if the order does not exist or is already settled.
pub async fn cancel(id: i32) -> Result<(), Box<dyn std::error::Error>> {
    let store = connect().await?;

    let order = fulfillment::cancel(&store, OrderId::new(id)).await?;
    tracing::info!("Order {} is now {}", order.id, order.status);
    Ok(())
}
