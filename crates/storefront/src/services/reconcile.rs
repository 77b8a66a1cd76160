//! Webhook reconciliation.
//!
//! Gateways deliver events at least once, so every transition here is a
//! conditional update in the store: a replayed `PaymentCompleted` finds the
//! order already `paid` and changes nothing.

use backline_core::{OrderId, OrderStatus, PaymentProvider};
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::notifications::Notifier;
use crate::db::{ConfirmOutcome, OrderStore, RepositoryError, TransitionOutcome};
use crate::payments::{GatewayEvent, PaymentError};

/// Errors from webhook processing.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Signature missing or wrong. Never retried.
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),

    /// Verified body that could not be decoded.
    #[error("malformed webhook payload: {0}")]
    Malformed(String),

    /// Webhook for a gateway without credentials.
    #[error("{0} webhooks are not configured")]
    NotConfigured(PaymentProvider),

    /// The gateway could not be reached to verify the event.
    #[error("gateway error: {0}")]
    Gateway(PaymentError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<PaymentError> for WebhookError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::InvalidSignature(msg) => Self::InvalidSignature(msg),
            PaymentError::Parse(msg) => Self::Malformed(msg),
            PaymentError::NotConfigured(provider) => Self::NotConfigured(provider),
            other => Self::Gateway(other),
        }
    }
}

/// What a webhook delivery did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The order moved to `paid`.
    Paid(OrderId),
    /// The order moved to `refunded`.
    Refunded(OrderId),
    /// The order was already past the transition; nothing changed.
    AlreadyProcessed(OrderId, OrderStatus),
    /// The event names an order we do not have.
    OrderNotFound(OrderId),
    /// A refund for a payment no order recorded.
    UnknownPayment(String),
    /// Event type the reconciler does not act on.
    Ignored(String),
}

impl ReconcileOutcome {
    /// Short label for logs and webhook responses.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Paid(_) => "paid",
            Self::Refunded(_) => "refunded",
            Self::AlreadyProcessed(..) => "already_processed",
            Self::OrderNotFound(_) => "order_not_found",
            Self::UnknownPayment(_) => "unknown_payment",
            Self::Ignored(_) => "ignored",
        }
    }
}

/// Applies verified gateway events to orders.
pub struct Reconciler<'a, S> {
    store: &'a S,
    notifier: &'a Notifier,
}

impl<'a, S: OrderStore + Sync> Reconciler<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S, notifier: &'a Notifier) -> Self {
        Self { store, notifier }
    }

    /// Apply one event.
    ///
    /// Missing orders and orders past the transition are successes, so the
    /// gateway stops redelivering. Only store failures are errors.
    ///
    /// # Errors
    ///
    /// Returns the store error; nothing was committed in that case.
    #[instrument(skip(self, event))]
    pub async fn apply(&self, event: GatewayEvent) -> Result<ReconcileOutcome, RepositoryError> {
        match event {
            GatewayEvent::PaymentCompleted(confirmation) => {
                let order_id = confirmation.order_id;
                match self.store.confirm_payment(&confirmation).await? {
                    ConfirmOutcome::Confirmed(order) => {
                        info!(%order_id, total = %order.total, "Order paid");
                        self.notifier.spawn_order_paid(order);
                        Ok(ReconcileOutcome::Paid(order_id))
                    }
                    ConfirmOutcome::NotPending(status) => {
                        info!(%order_id, %status, "Payment already processed");
                        Ok(ReconcileOutcome::AlreadyProcessed(order_id, status))
                    }
                    ConfirmOutcome::NotFound => {
                        warn!(%order_id, "Payment for unknown order");
                        Ok(ReconcileOutcome::OrderNotFound(order_id))
                    }
                }
            }
            GatewayEvent::PaymentRefunded {
                payment_intent_id,
                amount,
            } => {
                let Some(order) = self.store.find_by_payment_intent(&payment_intent_id).await?
                else {
                    warn!(%payment_intent_id, "Refund for unknown payment");
                    return Ok(ReconcileOutcome::UnknownPayment(payment_intent_id));
                };

                // Only full refunds move the order.
                if let Some(amount) = amount.filter(|amount| *amount < order.total) {
                    info!(
                        order_id = %order.id,
                        %amount,
                        total = %order.total,
                        "Ignoring partial refund"
                    );
                    return Ok(ReconcileOutcome::Ignored("partial_refund".to_string()));
                }

                match self.store.mark_refunded(order.id).await? {
                    TransitionOutcome::Applied(order) => {
                        info!(order_id = %order.id, "Order refunded");
                        Ok(ReconcileOutcome::Refunded(order.id))
                    }
                    TransitionOutcome::Rejected(status) => {
                        info!(order_id = %order.id, %status, "Refund not applicable");
                        Ok(ReconcileOutcome::AlreadyProcessed(order.id, status))
                    }
                    TransitionOutcome::NotFound => Ok(ReconcileOutcome::OrderNotFound(order.id)),
                }
            }
            GatewayEvent::Ignored { event_type, reason } => {
                info!(%event_type, reason, "Ignoring webhook event");
                Ok(ReconcileOutcome::Ignored(event_type))
            }
        }
    }
}
