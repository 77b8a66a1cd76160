//! Backline Core - Shared domain library.
//!
//! This crate provides the domain model used across all Backline components:
//! - `storefront` - Public checkout API, payment gateways and webhook reconciliation
//! - `cli` - Command-line tools for migrations, seeding and order operations
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. Everything that touches money lives here so it can be
//! tested without infrastructure.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for ids, money, country codes and statuses
//! - [`catalog`] - Products, variants and cart line resolution
//! - [`pricing`] - The pricing engine (VAT, shipping, totals)
//! - [`discount`] - Promotion and gift card rules
//! - [`order`] - The order aggregate and its line-item snapshots

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod catalog;
pub mod discount;
pub mod order;
pub mod pricing;
pub mod types;

pub use types::*;
