//! Application state shared across handlers.

use std::sync::Arc;

use thiserror::Error;

use crate::config::StorefrontConfig;
use crate::db::Store;
use crate::payments::{PaymentError, PaypalClient, StripeClient, http_client};
use crate::services::Notifier;
use crate::services::klaviyo::{KlaviyoClient, KlaviyoError};

/// Error building application state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("payment client: {0}")]
    Payment(#[from] PaymentError),
    #[error("klaviyo client: {0}")]
    Klaviyo(#[from] KlaviyoError),
}

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`; generic over the backing [`Store`] so the
/// same router runs on `PostgreSQL` and on the in-memory store.
pub struct AppState<S> {
    inner: Arc<AppStateInner<S>>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct AppStateInner<S> {
    config: StorefrontConfig,
    store: S,
    stripe: Option<StripeClient>,
    paypal: Option<PaypalClient>,
    notifier: Notifier,
}

impl<S: Store> AppState<S> {
    /// Create a new application state.
    ///
    /// Gateway clients are built only for gateways with credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client fails to build.
    pub fn new(config: StorefrontConfig, store: S) -> Result<Self, StateError> {
        let http = http_client(config.gateway_timeout)?;
        let stripe = config
            .stripe
            .as_ref()
            .map(|c| StripeClient::new(c, http.clone()));
        let paypal = config
            .paypal
            .as_ref()
            .map(|c| PaypalClient::new(c, http.clone()));
        let klaviyo = config
            .klaviyo
            .as_ref()
            .map(|c| KlaviyoClient::new(c, config.gateway_timeout))
            .transpose()?;

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                stripe,
                paypal,
                notifier: Notifier::new(klaviyo),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Stripe client, if configured.
    #[must_use]
    pub fn stripe(&self) -> Option<&StripeClient> {
        self.inner.stripe.as_ref()
    }

    /// PayPal client, if configured.
    #[must_use]
    pub fn paypal(&self) -> Option<&PaypalClient> {
        self.inner.paypal.as_ref()
    }

    #[must_use]
    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }
}
