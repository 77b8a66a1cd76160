//! Klaviyo API client for order event tracking.
//!
//! Order notifications are sent as Klaviyo events (`Placed Order`,
//! `Shipped Order`); the flows configured in Klaviyo turn them into emails.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::instrument;

use crate::config::KlaviyoConfig;

/// Klaviyo API version.
const API_REVISION: &str = "2024-10-15";

/// Klaviyo API base URL.
const BASE_URL: &str = "https://a.klaviyo.com/api";

/// Errors that can occur when interacting with Klaviyo API.
#[derive(Debug, Error)]
pub enum KlaviyoError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to build a request.
    #[error("Parse error: {0}")]
    Parse(String),
}

/// One metric event for one profile.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackEvent {
    /// Metric name, e.g. `Placed Order`.
    pub metric: String,
    /// Profile email.
    pub email: String,
    /// Monetary value in major units.
    pub value: Option<f64>,
    /// Deduplication key; Klaviyo drops repeats.
    pub unique_id: String,
    pub properties: Map<String, Value>,
}

impl TrackEvent {
    fn body(&self) -> Value {
        let mut attributes = json!({
            "properties": self.properties,
            "unique_id": self.unique_id,
            "metric": {
                "data": {
                    "type": "metric",
                    "attributes": { "name": self.metric }
                }
            },
            "profile": {
                "data": {
                    "type": "profile",
                    "attributes": { "email": self.email }
                }
            }
        });

        if let (Some(value), Some(map)) = (self.value, attributes.as_object_mut()) {
            map.insert("value".to_string(), json!(value));
        }

        json!({ "data": { "type": "event", "attributes": attributes } })
    }
}

/// Klaviyo API client.
#[derive(Clone)]
pub struct KlaviyoClient {
    client: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for KlaviyoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KlaviyoClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl KlaviyoClient {
    /// Create a new Klaviyo API client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &KlaviyoConfig, timeout: Duration) -> Result<Self, KlaviyoError> {
        let mut headers = HeaderMap::new();

        // Authorization header
        let auth_value = format!("Klaviyo-API-Key {}", config.api_key.expose_secret());
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&auth_value)
                .map_err(|e| KlaviyoError::Parse(format!("Invalid API key format: {e}")))?,
        );

        // Revision header for API versioning
        headers.insert("revision", HeaderValue::from_static(API_REVISION));

        // Content-Type for JSON:API
        headers.insert(
            "Content-Type",
            HeaderValue::from_static("application/vnd.api+json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: BASE_URL.to_string(),
        })
    }

    /// Point the client at another API host.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Record a metric event against a profile.
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails.
    #[instrument(skip(self, event), fields(metric = %event.metric))]
    pub async fn track_event(&self, event: &TrackEvent) -> Result<(), KlaviyoError> {
        let url = format!("{}/events", self.base_url);

        let response = self.client.post(&url).json(&event.body()).send().await?;
        let status = response.status();

        // 202 Accepted is the expected response for events
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(KlaviyoError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_event_body_shape() {
        let mut properties = Map::new();
        properties.insert("OrderId".to_string(), json!("42"));

        let event = TrackEvent {
            metric: "Placed Order".to_string(),
            email: "fan@example.com".to_string(),
            value: Some(40.7),
            unique_id: "order-42-placed".to_string(),
            properties,
        };

        let body = event.body();
        let attributes = &body["data"]["attributes"];
        assert_eq!(body["data"]["type"], "event");
        assert_eq!(attributes["metric"]["data"]["attributes"]["name"], "Placed Order");
        assert_eq!(attributes["profile"]["data"]["attributes"]["email"], "fan@example.com");
        assert_eq!(attributes["value"], 40.7);
        assert_eq!(attributes["unique_id"], "order-42-placed");
        assert_eq!(attributes["properties"]["OrderId"], "42");
    }

    #[test]
    fn test_event_body_without_value() {
        let event = TrackEvent {
            metric: "Shipped Order".to_string(),
            email: "fan@example.com".to_string(),
            value: None,
            unique_id: "order-42-shipped".to_string(),
            properties: Map::new(),
        };
        assert!(event.body()["data"]["attributes"].get("value").is_none());
    }
}
