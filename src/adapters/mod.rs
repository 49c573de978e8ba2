//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the domain to external systems:
//! - `http` - Axum REST endpoints and the Stripe webhook receiver
//! - `memory` - In-memory storage for tests and local runs
//! - `postgres` - PostgreSQL storage
//! - `stripe` - Stripe payment gateway

pub mod http;
pub mod memory;
pub mod postgres;
pub mod stripe;

pub use memory::InMemoryBillingStore;
pub use stripe::{MockPaymentGateway, StripeConfig, StripeGateway};
