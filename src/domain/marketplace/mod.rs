//! Marketplace billing domain.
//!
//! Plans, subscriptions, credits and payments of the promotion-post
//! marketplace, plus the pure rules that combine them.
//!
//! # Module Structure
//!
//! - `plan` - Catalog entries and their validation
//! - `status` - SubscriptionStatus state machine
//! - `subscription` - Subscription record, quota and usage reset
//! - `history` - Current-subscription resolution
//! - `credit` - Prepaid post credits
//! - `payment` - Immutable payment records
//! - `entitlement` - Quota and credit composition
//! - `usage` - Usage summary read model
//! - `errors` - BillingError taxonomy

pub mod credit;
pub mod entitlement;
mod errors;
pub mod history;
pub mod payment;
mod plan;
mod status;
mod subscription;
mod usage;

pub use credit::Credit;
pub use entitlement::{Entitlement, EntitlementSource};
pub use errors::BillingError;
pub use payment::{Payment, PaymentKind, PaymentStatus};
pub use plan::{
    NewPlan, Plan, PlanSpec, PlanTerms, PlanVisibility, FREE_PLAN_DISPLAY_NAME, FREE_PLAN_NAME,
    FREE_TIER_POSTS,
};
pub use status::SubscriptionStatus;
pub use subscription::{BillingPeriod, Quota, RemainingPosts, Subscription};
pub use usage::UsageSummary;

#[cfg(test)]
pub(crate) use plan::test_support;
