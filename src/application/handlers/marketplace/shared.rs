//! Helpers shared by the marketplace handlers.

use crate::domain::foundation::{BillingUser, DomainError, Money, Timestamp, UserId};
use crate::domain::marketplace::payment::META_CREATED_FROM;
use crate::domain::marketplace::{history, BillingError, Credit, Payment, Subscription};
use crate::ports::{GatewayError, PaymentRepository, SaveResult, SubscriptionRepository};

/// Name of the ad-hoc checkout line item for a single post.
pub const PROMOTION_POST_ITEM: &str = "Promotion Post";

/// Checkout metadata keys.
pub const META_USER_ID: &str = "user_id";
pub const META_PLAN_ID: &str = "plan_id";
pub const META_TYPE: &str = "type";
pub const META_POST_COUNT: &str = "post_count";

/// `type` metadata values.
pub const TYPE_SUBSCRIPTION: &str = "subscription";
pub const TYPE_ONE_TIME_POST: &str = "one_time_post";

/// Pricing the handlers need that does not live in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingSettings {
    /// Lowercase ISO code used for every charge.
    pub currency: String,
    pub post_price: Money,
}

impl BillingSettings {
    pub fn new(currency: impl Into<String>, post_price: Money) -> Self {
        Self {
            currency: currency.into(),
            post_price,
        }
    }
}

/// Catalog mutations are reserved for administrators.
pub fn require_admin(actor: &BillingUser) -> Result<(), BillingError> {
    if actor.is_admin() {
        Ok(())
    } else {
        tracing::warn!(user_id = %actor.id, "Non-admin attempted a catalog change");
        Err(BillingError::Forbidden)
    }
}

/// Logs a gateway failure with full detail and converts it for the caller.
pub fn gateway_failure(operation: &'static str, err: GatewayError) -> BillingError {
    tracing::error!(
        operation,
        kind = %err.kind,
        provider_code = ?err.provider_code,
        error = %err.message,
        "Payment gateway call failed"
    );
    BillingError::from(err)
}

/// The user's governing subscription. A due monthly usage reset is persisted.
///
/// A user with no history, or whose latest record has ended or been
/// superseded without a successor, gets a new free-tier record. It keeps the
/// gateway customer id of the record it follows.
pub async fn load_current(
    subscriptions: &dyn SubscriptionRepository,
    user_id: &UserId,
    now: Timestamp,
) -> Result<Subscription, BillingError> {
    let history = subscriptions.history_for_user(user_id).await?;
    let resolved = history::resolve_current(&history);
    let mut current = match resolved {
        Some(sub) if sub.status.is_active() => sub.clone(),
        _ => {
            let fresh = free_tier_after(user_id, resolved, now);
            subscriptions.insert(&fresh).await?;
            tracing::info!(
                user_id = %user_id,
                subscription_id = %fresh.id,
                previous = ?resolved.map(|s| s.id),
                "Created free tier subscription"
            );
            return Ok(fresh);
        }
    };

    if current.reset_usage_if_due(now) {
        subscriptions.update(&current).await?;
        tracing::debug!(user_id = %user_id, subscription_id = %current.id, "Monthly usage reset");
    }
    Ok(current)
}

/// Like [`load_current`] without writing anything: the free tier that would
/// be created is transient and a due reset is applied to the copy only.
pub async fn peek_current(
    subscriptions: &dyn SubscriptionRepository,
    user_id: &UserId,
    now: Timestamp,
) -> Result<Subscription, BillingError> {
    let history = subscriptions.history_for_user(user_id).await?;
    let resolved = history::resolve_current(&history);
    let mut current = match resolved {
        Some(sub) if sub.status.is_active() => sub.clone(),
        _ => free_tier_after(user_id, resolved, now),
    };
    current.reset_usage_if_due(now);
    Ok(current)
}

fn free_tier_after(
    user_id: &UserId,
    previous: Option<&Subscription>,
    now: Timestamp,
) -> Subscription {
    let mut fresh = Subscription::free_tier(user_id.clone(), now);
    fresh.gateway_customer_id = previous.and_then(|s| s.gateway_customer_id.clone());
    fresh
}

/// Records a settled one-post purchase and the credit it buys, atomically.
///
/// Keyed by the payment intent id, so replays write nothing.
pub async fn issue_post_credit(
    payments: &dyn PaymentRepository,
    user_id: &UserId,
    amount: Money,
    currency: &str,
    payment_intent_id: &str,
    source: &str,
    now: Timestamp,
) -> Result<SaveResult, DomainError> {
    let mut payment =
        Payment::one_time_post(user_id.clone(), amount, currency, payment_intent_id, now);
    payment
        .metadata
        .insert("payment_intent_id".to_string(), payment_intent_id.to_string());
    payment
        .metadata
        .insert(META_POST_COUNT.to_string(), "1".to_string());
    payment
        .metadata
        .insert(META_CREATED_FROM.to_string(), source.to_string());
    let credit = Credit::issue(user_id.clone(), 1, Some(payment.id), now);

    let saved = payments.record_with_credit(&payment, &credit).await?;
    match saved {
        SaveResult::Inserted => tracing::info!(
            user_id = %user_id,
            payment_id = %payment.id,
            credit_id = %credit.id,
            "Issued post credit"
        ),
        SaveResult::AlreadyExists => {
            tracing::debug!(payment_intent_id, "Post payment already recorded")
        }
    }
    Ok(saved)
}

/// Rejects blank required inputs before any side effect.
pub fn require_present(field: &'static str, value: &str) -> Result<(), BillingError> {
    if value.trim().is_empty() {
        return Err(crate::domain::foundation::ValidationError::empty_field(field).into());
    }
    Ok(())
}
