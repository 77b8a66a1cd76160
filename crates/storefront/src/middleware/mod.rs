//! HTTP middleware stack for storefront.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, HTTP transaction)
//! 2. `TraceLayer` (request span)
//! 3. Request ID (recorded on the span, Sentry scope and response)
//! 4. Rate limiting on checkout routes only (governor)

pub mod rate_limit;
pub mod request_id;

pub use rate_limit::checkout_rate_limiter;
pub use request_id::request_id_middleware;
