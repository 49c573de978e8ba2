//! Marketplace Billing - Subscriptions and post credits for a promotion marketplace
//!
//! This crate manages the plan catalog, the subscription lifecycle, one-time
//! post credits and payment records, reconciling each purchase with Stripe
//! and answering how many promotion posts a user may still publish.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
