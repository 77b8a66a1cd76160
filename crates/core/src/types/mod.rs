//! Core types for Backline.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod country;
pub mod id;
pub mod money;
pub mod status;

pub use country::{CountryCode, CountryCodeError};
pub use id::*;
pub use money::{Cents, CurrencyCode, CurrencyCodeError};
pub use status::*;
