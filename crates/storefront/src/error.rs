//! Unified error handling with Sentry integration.
//!
//! Handlers return `Result<T, AppError>`. Server-side failures are captured
//! to Sentry before a generic message is sent; client errors carry their own
//! message in a JSON body (`{"error": "..."}`).

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use backline_core::catalog::CatalogError;
use serde_json::json;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::services::{CheckoutError, WebhookError};

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Checkout(err) => match err {
                CheckoutError::Catalog(catalog) => match catalog {
                    CatalogError::ProductNotFound(_) | CatalogError::VariantNotFound { .. } => {
                        StatusCode::NOT_FOUND
                    }
                    CatalogError::InsufficientStock { .. } => StatusCode::CONFLICT,
                    CatalogError::EmptyCart | CatalogError::InvalidQuantity { .. } => {
                        StatusCode::BAD_REQUEST
                    }
                    CatalogError::InvalidCatalogData(..) | CatalogError::CurrencyMismatch { .. } => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                },
                CheckoutError::OrderNotFound(_) => StatusCode::NOT_FOUND,
                CheckoutError::NotPending(..) => StatusCode::CONFLICT,
                CheckoutError::ZeroTotal(_) | CheckoutError::InvalidRequest(_) => {
                    StatusCode::BAD_REQUEST
                }
                CheckoutError::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                CheckoutError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Webhook(err) => match err {
                WebhookError::InvalidSignature(_) | WebhookError::Malformed(_) => {
                    StatusCode::BAD_REQUEST
                }
                WebhookError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
                WebhookError::Gateway(_) => StatusCode::BAD_GATEWAY,
                WebhookError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Client error");
        }

        // Don't expose internal error details to clients
        let message = match status {
            StatusCode::SERVICE_UNAVAILABLE => {
                "Payment provider unavailable, please try again".to_string()
            }
            StatusCode::BAD_GATEWAY => "External service error".to_string(),
            s if s.is_server_error() => "Internal server error".to_string(),
            _ => self.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Add a breadcrumb to the current Sentry scope.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of events
/// leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
