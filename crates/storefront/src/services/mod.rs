//! Business logic services for the storefront.
//!
//! # Services
//!
//! - `checkout` - Quotes, draft orders and gateway sessions
//! - `reconcile` - Applies verified webhook events to orders
//! - `fulfillment` - Shipping and cancelling orders (operator actions)
//! - `notifications` - Order paid / shipped messages
//! - `klaviyo` - Klaviyo event API client backing the notifications

pub mod checkout;
pub mod fulfillment;
pub mod klaviyo;
pub mod notifications;
pub mod reconcile;

pub use checkout::{CheckoutError, CheckoutRequest, CheckoutService, Quote};
pub use notifications::Notifier;
pub use reconcile::{ReconcileOutcome, Reconciler, WebhookError};
