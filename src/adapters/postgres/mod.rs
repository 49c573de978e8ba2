//! PostgreSQL adapters - Database implementations for the billing storage ports.
//!
//! - `PostgresPlanRepository` - Plan catalog with single-recommendation and guarded delete
//! - `PostgresSubscriptionRepository` - Subscription history, superseded in one transaction
//! - `PostgresPaymentRepository` - Append-only payments, idempotent on payment intent id
//! - `PostgresCreditRepository` - Post credits with row-locked consumption
//!
//! Schema lives in `migrations/`.

mod convert;
mod credit_repository;
mod payment_repository;
mod plan_repository;
mod subscription_repository;

pub use credit_repository::PostgresCreditRepository;
pub use payment_repository::PostgresPaymentRepository;
pub use plan_repository::PostgresPlanRepository;
pub use subscription_repository::PostgresSubscriptionRepository;
