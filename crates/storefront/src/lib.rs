//! Backline storefront library.
//!
//! Order pricing and payment settlement for the band's merch store: cart
//! quotes, draft orders, Stripe and PayPal checkout, and the webhook
//! reconciler that settles paid orders. Built as a library so the router
//! can be driven in tests against the in-memory store.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod payments;
pub mod routes;
pub mod services;
pub mod state;

pub use routes::app;
pub use state::AppState;
