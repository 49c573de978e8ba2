//! HTTP adapter for marketplace billing endpoints.
//!
//! Exposes the billing core via REST API under `/api/marketplace`, plus the
//! Stripe webhook receiver at `/api/webhooks/stripe`. See [`routes`] for the
//! full route table.

pub mod dto;
pub mod handlers;
pub mod routes;

pub use dto::*;
pub use handlers::{CurrentUser, MarketplaceApiError, MarketplaceAppState};
pub use routes::{marketplace_router, marketplace_routes, webhook_routes};
