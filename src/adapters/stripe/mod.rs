//! Stripe payment gateway adapter.
//!
//! Implements the `PaymentGateway` port for Stripe, including:
//! - Customers and catalog products/prices
//! - Checkout sessions and direct subscription creation
//! - Payment intents and invoice retrieval
//! - Webhook signature verification
//!
//! # Security
//!
//! - Webhook signatures use HMAC-SHA256 with constant-time comparison
//! - Timestamps are validated to prevent replay attacks (5-minute window)
//! - All secrets are handled via `secrecy::SecretString`
//!
//! # Configuration
//!
//! Built from the `payment` config section:
//! - `MARKETPLACE_BILLING__PAYMENT__STRIPE_API_KEY`
//! - `MARKETPLACE_BILLING__PAYMENT__STRIPE_WEBHOOK_SECRET`

mod api_types;
mod mock_payment_gateway;
mod stripe_gateway;

pub use api_types::{hex_encode, SignatureHeader, SignatureParseError};
pub use mock_payment_gateway::MockPaymentGateway;
pub use stripe_gateway::{StripeConfig, StripeGateway};
