//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `STOREFRONT_BASE_URL` - Public URL used for gateway callback links
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `STORE_CURRENCY` - ISO 4217 store currency (default: EUR)
//! - `SHIPPING_ZONE_FEE_CENTS` - EU/UK/NO/CH flat fee (default: 500)
//! - `SHIPPING_FREE_THRESHOLD_CENTS` - Zone free-shipping threshold (default: 5000)
//! - `SHIPPING_INTERNATIONAL_FEE_CENTS` - Fee outside the zone (default: 1500)
//! - `VAT_FALLBACK_BPS` - VAT for countries not in the table, basis points (default: 1900)
//! - `GATEWAY_TIMEOUT_SECS` - Outbound gateway request timeout (default: 10)
//! - `STRIPE_SECRET_KEY` + `STRIPE_WEBHOOK_SECRET` - Stripe (both or neither)
//! - `PAYPAL_CLIENT_ID` + `PAYPAL_CLIENT_SECRET` + `PAYPAL_WEBHOOK_ID` - PayPal (all or none)
//! - `PAYPAL_ENVIRONMENT` - `sandbox` or `live` (default: sandbox)
//! - `KLAVIYO_API_KEY` - Order notifications via Klaviyo events
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use backline_core::CurrencyCode;
use backline_core::pricing::{
    DEFAULT_FREE_SHIPPING_THRESHOLD, DEFAULT_INTERNATIONAL_FEE, DEFAULT_VAT_FALLBACK_BPS,
    DEFAULT_ZONE_FEE, PricingPolicy, ShippingPolicy, VatTable,
};
use backline_core::types::Cents;
use secrecy::SecretString;
use thiserror::Error;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;

const STRIPE_API_BASE: &str = "https://api.stripe.com";
const PAYPAL_SANDBOX_API_BASE: &str = "https://api-m.sandbox.paypal.com";
const PAYPAL_LIVE_API_BASE: &str = "https://api-m.paypal.com";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront, without trailing slash
    pub base_url: String,
    /// Currency every catalog price is quoted in
    pub currency: CurrencyCode,
    /// Shipping and VAT settings
    pub pricing: PricingConfig,
    /// Timeout for outbound payment gateway calls
    pub gateway_timeout: Duration,
    /// Stripe configuration (optional)
    pub stripe: Option<StripeConfig>,
    /// PayPal configuration (optional)
    pub paypal: Option<PaypalConfig>,
    /// Klaviyo configuration (optional - order notifications)
    pub klaviyo: Option<KlaviyoConfig>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Shipping fee schedule and VAT fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingConfig {
    pub zone_fee: Cents,
    pub free_shipping_threshold: Cents,
    pub international_fee: Cents,
    pub vat_fallback_bps: u32,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            zone_fee: DEFAULT_ZONE_FEE,
            free_shipping_threshold: DEFAULT_FREE_SHIPPING_THRESHOLD,
            international_fee: DEFAULT_INTERNATIONAL_FEE,
            vat_fallback_bps: DEFAULT_VAT_FALLBACK_BPS,
        }
    }
}

impl PricingConfig {
    /// Load the pricing settings on their own.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if a value is not a non-negative integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            zone_fee: get_cents_or_default("SHIPPING_ZONE_FEE_CENTS", defaults.zone_fee)?,
            free_shipping_threshold: get_cents_or_default(
                "SHIPPING_FREE_THRESHOLD_CENTS",
                defaults.free_shipping_threshold,
            )?,
            international_fee: get_cents_or_default(
                "SHIPPING_INTERNATIONAL_FEE_CENTS",
                defaults.international_fee,
            )?,
            vat_fallback_bps: get_parsed_or_default("VAT_FALLBACK_BPS", defaults.vat_fallback_bps)?,
        })
    }

    /// Build the pricing policy, applying per-country shipping overrides.
    #[must_use]
    pub fn policy(
        &self,
        overrides: impl IntoIterator<Item = (backline_core::CountryCode, Cents)>,
    ) -> PricingPolicy {
        let shipping = overrides.into_iter().fold(
            ShippingPolicy::new(
                self.zone_fee,
                self.free_shipping_threshold,
                self.international_fee,
            ),
            |policy, (country, fee)| policy.with_override(&country, fee),
        );
        PricingPolicy::new(VatTable::standard(self.vat_fallback_bps), shipping)
    }
}

/// Stripe API configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (`sk_live_...` / `sk_test_...`)
    pub secret_key: SecretString,
    /// Webhook endpoint signing secret (`whsec_...`)
    pub webhook_secret: SecretString,
    /// API base URL
    pub api_base: String,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl StripeConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let secret_key = get_optional_env("STRIPE_SECRET_KEY");
        let webhook_secret = get_optional_env("STRIPE_WEBHOOK_SECRET");

        match (secret_key, webhook_secret) {
            (Some(key), Some(webhook)) => {
                validate_secret_strength(&key, "STRIPE_SECRET_KEY")?;
                validate_secret_strength(&webhook, "STRIPE_WEBHOOK_SECRET")?;
                Ok(Some(Self {
                    secret_key: SecretString::from(key),
                    webhook_secret: SecretString::from(webhook),
                    api_base: STRIPE_API_BASE.to_string(),
                }))
            }
            (None, None) => Ok(None),
            _ => Err(ConfigError::InvalidEnvVar(
                "STRIPE_*".to_string(),
                "Both STRIPE_SECRET_KEY and STRIPE_WEBHOOK_SECRET must be set together"
                    .to_string(),
            )),
        }
    }
}

/// PayPal REST environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PaypalEnvironment {
    #[default]
    Sandbox,
    Live,
}

impl PaypalEnvironment {
    /// REST API base URL for this environment.
    #[must_use]
    pub const fn api_base(self) -> &'static str {
        match self {
            Self::Sandbox => PAYPAL_SANDBOX_API_BASE,
            Self::Live => PAYPAL_LIVE_API_BASE,
        }
    }
}

impl std::str::FromStr for PaypalEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Self::Sandbox),
            "live" | "production" => Ok(Self::Live),
            other => Err(format!("expected sandbox or live, got {other:?}")),
        }
    }
}

/// PayPal REST API configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct PaypalConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    /// Webhook id used by signature verification
    pub webhook_id: String,
    /// API base URL (sandbox or live)
    pub api_base: String,
}

impl std::fmt::Debug for PaypalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaypalConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("webhook_id", &self.webhook_id)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl PaypalConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let client_id = get_optional_env("PAYPAL_CLIENT_ID");
        let client_secret = get_optional_env("PAYPAL_CLIENT_SECRET");
        let webhook_id = get_optional_env("PAYPAL_WEBHOOK_ID");

        match (client_id, client_secret, webhook_id) {
            (Some(client_id), Some(secret), Some(webhook_id)) => {
                validate_secret_strength(&secret, "PAYPAL_CLIENT_SECRET")?;
                let environment = get_env_or_default("PAYPAL_ENVIRONMENT", "sandbox")
                    .parse::<PaypalEnvironment>()
                    .map_err(|e| ConfigError::InvalidEnvVar("PAYPAL_ENVIRONMENT".to_string(), e))?;
                Ok(Some(Self {
                    client_id,
                    client_secret: SecretString::from(secret),
                    webhook_id,
                    api_base: environment.api_base().to_string(),
                }))
            }
            (None, None, None) => Ok(None),
            _ => Err(ConfigError::InvalidEnvVar(
                "PAYPAL_*".to_string(),
                "PAYPAL_CLIENT_ID, PAYPAL_CLIENT_SECRET and PAYPAL_WEBHOOK_ID must be set together"
                    .to_string(),
            )),
        }
    }
}

/// Klaviyo API configuration for order notifications.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct KlaviyoConfig {
    /// Klaviyo private API key
    pub api_key: SecretString,
}

impl std::fmt::Debug for KlaviyoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KlaviyoConfig")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl KlaviyoConfig {
    /// Load the Klaviyo key if `KLAVIYO_API_KEY` is set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InsecureSecret` if the key looks like a placeholder.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        get_optional_env("KLAVIYO_API_KEY")
            .map(|key| {
                validate_secret_strength(&key, "KLAVIYO_API_KEY")?;
                Ok(Self {
                    api_key: SecretString::from(key),
                })
            })
            .transpose()
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("STOREFRONT_DATABASE_URL")?;
        let host = get_env_or_default("STOREFRONT_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("STOREFRONT_HOST".to_string(), e.to_string())
            })?;
        let port = get_env_or_default("STOREFRONT_PORT", "3000")
            .parse::<u16>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("STOREFRONT_PORT".to_string(), e.to_string())
            })?;
        let base_url = normalize_base_url(&get_required_env("STOREFRONT_BASE_URL")?)?;
        let currency = get_env_or_default("STORE_CURRENCY", "EUR")
            .parse::<CurrencyCode>()
            .map_err(|e| ConfigError::InvalidEnvVar("STORE_CURRENCY".to_string(), e.to_string()))?;
        let pricing = PricingConfig::from_env()?;
        let gateway_timeout = Duration::from_secs(get_parsed_or_default(
            "GATEWAY_TIMEOUT_SECS",
            DEFAULT_GATEWAY_TIMEOUT_SECS,
        )?);

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            currency,
            pricing,
            gateway_timeout,
            stripe: StripeConfig::from_env()?,
            paypal: PaypalConfig::from_env()?,
            klaviyo: KlaviyoConfig::from_env()?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Configuration with defaults for everything but the database and base URL.
    ///
    /// No gateways or notifiers are configured.
    #[must_use]
    pub fn new(database_url: SecretString, base_url: &str) -> Self {
        Self {
            database_url,
            host: IpAddr::from([127, 0, 0, 1]),
            port: 3000,
            base_url: base_url.trim_end_matches('/').to_string(),
            currency: CurrencyCode::default(),
            pricing: PricingConfig::default(),
            gateway_timeout: Duration::from_secs(DEFAULT_GATEWAY_TIMEOUT_SECS),
            stripe: None,
            paypal: None,
            klaviyo: None,
            sentry_dsn: None,
            sentry_environment: None,
        }
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL` (used by Fly.io postgres attach).
///
/// # Errors
///
/// Returns `ConfigError::MissingEnvVar` if neither variable is set.
pub fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable, treating empty values as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an optional environment variable, falling back to `default`.
fn get_parsed_or_default<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_optional_env(key).map_or(Ok(default), |raw| {
        raw.trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

/// Parse a non-negative cent amount.
fn get_cents_or_default(key: &str, default: Cents) -> Result<Cents, ConfigError> {
    let cents: u32 = get_parsed_or_default(key, u32::try_from(default.as_i64()).unwrap_or(0))?;
    Ok(Cents::new(i64::from(cents)))
}

/// Validate the base URL and strip the trailing slash.
fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| ConfigError::InvalidEnvVar("STOREFRONT_BASE_URL".to_string(), e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            "STOREFRONT_BASE_URL".to_string(),
            format!("unsupported scheme {}", parsed.scheme()),
        ));
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use the key issued by the provider."
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use backline_core::CountryCode;
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("your-stripe-key-here", "STRIPE_SECRET_KEY");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("sk_test_aaaaaaaaaaaaaaaaaaaa", "STRIPE_SECRET_KEY");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_stripe_shaped_key() {
        let result = validate_secret_strength(
            "sk_test_51Hb3Kq2eZvKYlo2C8xY9mK2nL5pQ7rT0uW4zC6",
            "STRIPE_SECRET_KEY",
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://shop.example.org/").unwrap(),
            "https://shop.example.org"
        );
        assert!(normalize_base_url("ftp://shop").is_err());
        assert!(normalize_base_url("not a url").is_err());
    }

    #[test]
    fn test_paypal_environment_parse() {
        assert_eq!(
            "LIVE".parse::<PaypalEnvironment>().unwrap().api_base(),
            PAYPAL_LIVE_API_BASE
        );
        assert_eq!(
            "sandbox".parse::<PaypalEnvironment>().unwrap(),
            PaypalEnvironment::Sandbox
        );
        assert!("staging".parse::<PaypalEnvironment>().is_err());
    }

    #[test]
    fn test_pricing_policy_applies_overrides() {
        let policy = PricingConfig::default().policy([(
            CountryCode::parse("NO").unwrap(),
            Cents::new(1200),
        )]);
        assert_eq!(
            policy
                .shipping
                .fee(&CountryCode::parse("NO").unwrap(), Cents::new(100)),
            Cents::new(1200)
        );
        assert_eq!(
            policy
                .shipping
                .fee(&CountryCode::parse("DE").unwrap(), Cents::new(100)),
            Cents::new(500)
        );
    }

    #[test]
    fn test_new_uses_defaults() {
        let config = StorefrontConfig::new(
            SecretString::from("postgres://localhost/test"),
            "http://localhost:3000/",
        );
        assert_eq!(config.base_url, "http://localhost:3000");
        assert_eq!(config.socket_addr().port(), 3000);
        assert_eq!(config.gateway_timeout, Duration::from_secs(10));
        assert_eq!(config.database_url.expose_secret(), "postgres://localhost/test");
        assert!(config.stripe.is_none());
    }

    #[test]
    fn test_gateway_config_debug_redacts_secrets() {
        let stripe = StripeConfig {
            secret_key: SecretString::from("sk_test_super_secret_value"),
            webhook_secret: SecretString::from("whsec_super_secret_value"),
            api_base: STRIPE_API_BASE.to_string(),
        };
        let paypal = PaypalConfig {
            client_id: "client_id_value".to_string(),
            client_secret: SecretString::from("paypal_super_secret_value"),
            webhook_id: "WH-123".to_string(),
            api_base: PAYPAL_SANDBOX_API_BASE.to_string(),
        };

        let debug_output = format!("{stripe:?} {paypal:?}");

        assert!(debug_output.contains("client_id_value"));
        assert!(debug_output.contains("WH-123"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret"));
    }
}
