//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (value objects, IDs, errors)
//! - `marketplace` - Plans, subscriptions, credits, payments and entitlements

pub mod foundation;
pub mod marketplace;
