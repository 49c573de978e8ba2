//! Subscription record.
//!
//! One row per purchase. Upgrading never rewrites an existing row's plan:
//! the old record is completed and a new one is inserted, so the user's
//! history is preserved.
//!
//! # Invariants
//!
//! - `posts_used_this_month` only grows through [`Subscription::record_post`],
//!   which is reachable from the entitlement consume operation alone
//! - usage is reset lazily once the calendar month of `last_reset_date` is over
//! - status transitions follow [`SubscriptionStatus`]

use crate::domain::foundation::{
    DomainError, ErrorCode, StateMachine, SubscriptionId, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};

use super::plan::{PlanTerms, FREE_PLAN_DISPLAY_NAME, FREE_PLAN_NAME, FREE_TIER_POSTS};
use super::SubscriptionStatus;

/// Posting allowance of a subscription for one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quota {
    Limited(u32),
    Unlimited,
}

/// Posts left in the current period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "count", rename_all = "snake_case")]
pub enum RemainingPosts {
    Limited(u32),
    Unlimited,
}

impl RemainingPosts {
    /// `None` when unlimited.
    pub fn count(&self) -> Option<u32> {
        match self {
            RemainingPosts::Limited(n) => Some(*n),
            RemainingPosts::Unlimited => None,
        }
    }
}

/// Gateway billing period boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
}

/// A user's subscription record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,

    /// `None` is the free tier.
    pub plan: Option<PlanTerms>,

    pub status: SubscriptionStatus,
    pub period: BillingPeriod,
    pub posts_used_this_month: u32,
    pub last_reset_date: Timestamp,

    /// Canceled at the gateway, effective at period end. Status stays active.
    pub cancel_at_period_end: bool,

    pub gateway_customer_id: Option<String>,
    pub gateway_subscription_id: Option<String>,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Subscription {
    /// Creates an active free-tier record.
    pub fn free_tier(user_id: UserId, now: Timestamp) -> Self {
        Self {
            id: SubscriptionId::new(),
            user_id,
            plan: None,
            status: SubscriptionStatus::Active,
            period: BillingPeriod::default(),
            posts_used_this_month: 0,
            last_reset_date: now,
            cancel_at_period_end: false,
            gateway_customer_id: None,
            gateway_subscription_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates an active record for a paid gateway subscription.
    pub fn paid(
        user_id: UserId,
        plan: PlanTerms,
        gateway_customer_id: Option<String>,
        gateway_subscription_id: impl Into<String>,
        period: BillingPeriod,
        now: Timestamp,
    ) -> Self {
        Self {
            plan: Some(plan),
            period,
            gateway_customer_id,
            gateway_subscription_id: Some(gateway_subscription_id.into()),
            ..Self::free_tier(user_id, now)
        }
    }

    pub fn is_free_tier(&self) -> bool {
        self.plan.is_none()
    }

    pub fn plan_name(&self) -> &str {
        self.plan
            .as_ref()
            .map(|p| p.name.as_str())
            .unwrap_or(FREE_PLAN_NAME)
    }

    pub fn plan_display_name(&self) -> &str {
        self.plan
            .as_ref()
            .map(|p| p.display_name.as_str())
            .unwrap_or(FREE_PLAN_DISPLAY_NAME)
    }

    pub fn quota(&self) -> Quota {
        match &self.plan {
            None => Quota::Limited(FREE_TIER_POSTS),
            Some(terms) if terms.posts_per_month == 0 => Quota::Unlimited,
            Some(terms) => Quota::Limited(terms.posts_per_month),
        }
    }

    /// Whether the subscription quota alone permits one more post.
    ///
    /// Does not consider status; callers evaluate the resolved current record.
    pub fn can_post(&self) -> bool {
        match self.quota() {
            Quota::Unlimited => true,
            Quota::Limited(limit) => self.posts_used_this_month < limit,
        }
    }

    pub fn remaining_posts(&self) -> RemainingPosts {
        match self.quota() {
            Quota::Unlimited => RemainingPosts::Unlimited,
            Quota::Limited(limit) => {
                RemainingPosts::Limited(limit.saturating_sub(self.posts_used_this_month))
            }
        }
    }

    pub fn usage_reset_due(&self, now: Timestamp) -> bool {
        self.last_reset_date.month_rolled_over_by(&now)
    }

    /// Zeroes the usage counter when a new month has begun.
    ///
    /// Returns true when a reset happened and the record needs saving.
    pub fn reset_usage_if_due(&mut self, now: Timestamp) -> bool {
        if !self.usage_reset_due(now) {
            return false;
        }
        self.posts_used_this_month = 0;
        self.last_reset_date = now;
        self.updated_at = now;
        true
    }

    /// Counts one gated action against the quota.
    pub(crate) fn record_post(&mut self, now: Timestamp) -> Result<(), DomainError> {
        if !self.can_post() {
            return Err(DomainError::new(
                ErrorCode::EntitlementExhausted,
                "Subscription quota exhausted for this period",
            ));
        }
        self.posts_used_this_month = self.posts_used_this_month.saturating_add(1);
        self.updated_at = now;
        Ok(())
    }

    /// Marks this record superseded by a newer purchase.
    pub fn complete(&mut self, now: Timestamp) -> Result<(), DomainError> {
        self.transition_to(SubscriptionStatus::Completed)?;
        self.updated_at = now;
        Ok(())
    }

    /// Ends the record after the gateway deleted the subscription.
    pub fn end(&mut self, now: Timestamp) -> Result<(), DomainError> {
        self.transition_to(SubscriptionStatus::Canceled)?;
        self.cancel_at_period_end = false;
        self.updated_at = now;
        Ok(())
    }

    /// Flags the record as canceling at period end.
    pub fn request_cancellation(&mut self, now: Timestamp) -> Result<(), DomainError> {
        if !self.status.is_active() {
            return Err(DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!("Cannot cancel a {} subscription", self.status),
            ));
        }
        self.cancel_at_period_end = true;
        self.updated_at = now;
        Ok(())
    }

    /// Applies gateway-reported period and cancellation flag.
    pub fn sync_with_gateway(
        &mut self,
        period: BillingPeriod,
        cancel_at_period_end: bool,
        now: Timestamp,
    ) {
        if period.start.is_some() {
            self.period.start = period.start;
        }
        if period.end.is_some() {
            self.period.end = period.end;
        }
        self.cancel_at_period_end = cancel_at_period_end;
        self.updated_at = now;
    }

    fn transition_to(&mut self, target: SubscriptionStatus) -> Result<(), DomainError> {
        self.status = self.status.transition_to(target).map_err(|_| {
            DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!(
                    "Cannot transition subscription from {} to {}",
                    self.status, target
                ),
            )
        })?;
        Ok(())
    }
}
