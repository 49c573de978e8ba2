//! HTTP DTOs (Data Transfer Objects) for marketplace billing endpoints.
//!
//! These types define the JSON request/response structure for the billing API.
//! They serve as the boundary between HTTP and the application layer.

use serde::{Deserialize, Serialize};

use crate::application::handlers::marketplace::{
    CheckEntitlementResult, ConfirmPostPaymentResult, ConfirmSubscriptionResult,
    ConsumeEntitlementResult,
};
use crate::domain::foundation::{Money, Timestamp, ValidationError};
use crate::domain::marketplace::{
    Credit, EntitlementSource, Payment, Plan, PlanSpec, Subscription, UsageSummary,
};

fn iso(ts: &Timestamp) -> String {
    ts.as_datetime().to_rfc3339()
}

// ════════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════════

fn default_true() -> bool {
    true
}

/// Plan create/update body. Prices are in cents.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanRequest {
    pub name: String,
    pub display_name: String,
    pub price_cents: i64,
    /// Zero means unlimited.
    pub posts_per_month: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_recommended: bool,
}

impl PlanRequest {
    pub fn into_spec(self) -> Result<PlanSpec, ValidationError> {
        Ok(PlanSpec {
            name: self.name,
            display_name: self.display_name,
            price: Money::from_cents(self.price_cents)?,
            posts_per_month: self.posts_per_month,
            is_active: self.is_active,
            is_recommended: self.is_recommended,
        })
    }
}

/// Hosted checkout for a plan. Missing URLs fall back to configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionCheckoutRequest {
    pub plan_id: i64,
    #[serde(default)]
    pub success_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
}

/// Hosted checkout for one post.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostCheckoutRequest {
    #[serde(default)]
    pub success_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmSubscriptionRequest {
    pub plan_id: i64,
    pub payment_method_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmPostPaymentRequest {
    pub payment_method_id: String,
    #[serde(default)]
    pub return_url: Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Standard error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResponse {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub price_cents: i64,
    /// Decimal rendering, e.g. `"19.99"`.
    pub price: String,
    pub posts_per_month: u32,
    pub is_unlimited: bool,
    pub is_active: bool,
    pub is_recommended: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Plan> for PlanResponse {
    fn from(plan: Plan) -> Self {
        Self {
            id: plan.id.value(),
            price_cents: plan.price.cents(),
            price: plan.price.to_string(),
            is_unlimited: plan.posts_per_month == 0,
            posts_per_month: plan.posts_per_month,
            is_active: plan.is_active,
            is_recommended: plan.is_recommended,
            created_at: iso(&plan.created_at),
            updated_at: iso(&plan.updated_at),
            name: plan.name,
            display_name: plan.display_name,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanListResponse {
    pub plans: Vec<PlanResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageResponse {
    pub has_subscription: bool,
    pub plan_name: String,
    pub plan_display_name: String,
    pub posts_used: u32,
    pub posts_limit: u32,
    /// Null means unlimited.
    pub remaining_posts: Option<u32>,
    pub can_post: bool,
    pub has_credits: bool,
    pub credit_count: u32,
    pub cancel_at_period_end: bool,
}

impl From<UsageSummary> for UsageResponse {
    fn from(usage: UsageSummary) -> Self {
        Self {
            has_subscription: usage.has_subscription,
            plan_name: usage.plan_name,
            plan_display_name: usage.plan_display_name,
            posts_used: usage.posts_used,
            posts_limit: usage.posts_limit,
            remaining_posts: usage.remaining_posts,
            can_post: usage.can_post,
            has_credits: usage.has_credits,
            credit_count: usage.credit_count,
            cancel_at_period_end: usage.cancel_at_period_end,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub checkout_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmSubscriptionResponse {
    pub subscription_id: String,
    pub gateway_subscription_id: String,
    pub status: String,
    pub requires_action: bool,
    pub client_secret: Option<String>,
}

impl From<ConfirmSubscriptionResult> for ConfirmSubscriptionResponse {
    fn from(result: ConfirmSubscriptionResult) -> Self {
        Self {
            subscription_id: result.subscription_id.to_string(),
            gateway_subscription_id: result.gateway_subscription_id,
            status: result.payment_status.as_str().to_string(),
            requires_action: result.requires_action,
            client_secret: result.client_secret,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmPostPaymentResponse {
    pub payment_intent_id: String,
    pub status: String,
    pub requires_action: bool,
    pub client_secret: Option<String>,
    pub credit_issued: bool,
}

impl From<ConfirmPostPaymentResult> for ConfirmPostPaymentResponse {
    fn from(result: ConfirmPostPaymentResult) -> Self {
        Self {
            status: result.status.as_str().to_string(),
            payment_intent_id: result.payment_intent_id,
            requires_action: result.requires_action,
            client_secret: result.client_secret,
            credit_issued: result.credit_issued,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelSubscriptionResponse {
    pub subscription_id: String,
    pub cancel_at_period_end: bool,
    pub period_end: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntitlementResponse {
    pub allowed: bool,
    pub source: Option<EntitlementSource>,
    /// Null means unlimited.
    pub remaining_posts: Option<u32>,
    pub credit_units: u32,
}

impl From<CheckEntitlementResult> for EntitlementResponse {
    fn from(result: CheckEntitlementResult) -> Self {
        Self {
            allowed: result.entitlement.allowed,
            source: result.entitlement.source,
            remaining_posts: result.remaining_posts.count(),
            credit_units: result.credit_units,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumeResponse {
    pub source: EntitlementSource,
    pub remaining_posts: Option<u32>,
}

impl From<ConsumeEntitlementResult> for ConsumeResponse {
    fn from(result: ConsumeEntitlementResult) -> Self {
        Self {
            source: result.source,
            remaining_posts: result.remaining_posts.count(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentResponse {
    pub id: String,
    pub kind: String,
    pub status: String,
    pub amount_cents: i64,
    pub amount: String,
    pub currency: String,
    pub description: String,
    pub subscription_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub invoice_id: Option<String>,
    pub created_at: String,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id.to_string(),
            kind: payment.kind.as_str().to_string(),
            status: payment.status.as_str().to_string(),
            amount_cents: payment.amount.cents(),
            amount: payment.amount.to_string(),
            invoice_id: payment.invoice_id().map(str::to_string),
            subscription_id: payment.subscription_id.map(|id| id.to_string()),
            created_at: iso(&payment.created_at),
            currency: payment.currency,
            description: payment.description,
            payment_intent_id: payment.gateway_payment_intent_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreditResponse {
    pub id: String,
    pub amount: u32,
    pub used: u32,
    pub remaining: u32,
    pub expires_at: Option<String>,
    pub payment_id: Option<String>,
    pub created_at: String,
}

impl From<Credit> for CreditResponse {
    fn from(credit: Credit) -> Self {
        Self {
            id: credit.id.to_string(),
            remaining: credit.remaining(),
            amount: credit.amount,
            used: credit.used,
            expires_at: credit.expires_at.as_ref().map(iso),
            payment_id: credit.payment_id.map(|id| id.to_string()),
            created_at: iso(&credit.created_at),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionResponse {
    pub id: String,
    pub plan_name: String,
    pub plan_display_name: String,
    pub status: String,
    pub posts_used_this_month: u32,
    pub cancel_at_period_end: bool,
    pub current_period_start: Option<String>,
    pub current_period_end: Option<String>,
    pub created_at: String,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(sub: Subscription) -> Self {
        Self {
            id: sub.id.to_string(),
            plan_name: sub.plan_name().to_string(),
            plan_display_name: sub.plan_display_name().to_string(),
            status: sub.status.as_str().to_string(),
            posts_used_this_month: sub.posts_used_this_month,
            cancel_at_period_end: sub.cancel_at_period_end,
            current_period_start: sub.period.start.as_ref().map(iso),
            current_period_end: sub.period.end.as_ref().map(iso),
            created_at: iso(&sub.created_at),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub event_id: String,
}
