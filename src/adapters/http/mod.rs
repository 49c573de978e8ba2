//! HTTP adapters - REST API implementations.

pub mod marketplace;

pub use marketplace::marketplace_router;
pub use marketplace::MarketplaceAppState;
