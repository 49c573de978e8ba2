//! Marketplace billing handlers.
//!
//! ## Commands
//! - Plan catalog administration (create, update, toggle, delete)
//! - Hosted checkout for plans and single posts
//! - Embedded confirmation with a payment method token
//! - Cancellation at period end
//! - Consuming one post of entitlement
//! - Processing gateway webhooks
//!
//! ## Queries
//! - Plan listing
//! - Usage and entitlement checks
//! - Payment, credit and subscription history

mod cancel_subscription;
mod check_entitlement;
mod confirm_post_payment;
mod confirm_subscription;
mod consume_entitlement;
mod create_plan;
mod customer;
mod delete_plan;
mod get_usage;
mod handle_gateway_webhook;
mod list_history;
mod list_plans;
mod reconcile;
mod shared;
mod start_post_checkout;
mod start_subscription_checkout;
mod toggle_plan;
mod update_plan;

#[cfg(test)]
mod test_fixtures;

pub use shared::BillingSettings;

// Catalog
pub use create_plan::{CreatePlanCommand, CreatePlanHandler, CreatePlanResult};
pub use delete_plan::{DeletePlanCommand, DeletePlanHandler, DeletePlanResult};
pub use list_plans::{ListPlansHandler, ListPlansQuery, ListPlansResult};
pub use toggle_plan::{TogglePlanCommand, TogglePlanHandler, TogglePlanResult};
pub use update_plan::{UpdatePlanCommand, UpdatePlanHandler, UpdatePlanResult};

// Purchases
pub use cancel_subscription::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, CancelSubscriptionResult,
};
pub use confirm_post_payment::{
    ConfirmPostPaymentCommand, ConfirmPostPaymentHandler, ConfirmPostPaymentResult,
};
pub use confirm_subscription::{
    ConfirmSubscriptionCommand, ConfirmSubscriptionHandler, ConfirmSubscriptionResult,
};
pub use handle_gateway_webhook::{
    HandleGatewayWebhookCommand, HandleGatewayWebhookHandler, HandleGatewayWebhookResult,
    WebhookOutcome,
};
pub use start_post_checkout::{
    StartPostCheckoutCommand, StartPostCheckoutHandler, StartPostCheckoutResult,
};
pub use start_subscription_checkout::{
    StartSubscriptionCheckoutCommand, StartSubscriptionCheckoutHandler,
    StartSubscriptionCheckoutResult,
};

// Entitlement and usage
pub use check_entitlement::{
    CheckEntitlementHandler, CheckEntitlementQuery, CheckEntitlementResult,
};
pub use consume_entitlement::{
    ConsumeEntitlementCommand, ConsumeEntitlementHandler, ConsumeEntitlementResult,
};
pub use get_usage::{GetUsageHandler, GetUsageQuery, GetUsageResult};

// History
pub use list_history::{
    ListCreditsHandler, ListHistoryQuery, ListPaymentsHandler, ListSubscriptionsHandler,
};
