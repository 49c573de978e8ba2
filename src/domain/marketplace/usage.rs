//! Usage summary read model.

use serde::{Deserialize, Serialize};

use super::{entitlement, Quota, Subscription};

/// Snapshot of a user's posting allowance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// True when the current record is a paid plan.
    pub has_subscription: bool,
    pub plan_name: String,
    pub plan_display_name: String,
    pub posts_used: u32,
    /// Zero means unlimited.
    pub posts_limit: u32,
    /// `None` means unlimited.
    pub remaining_posts: Option<u32>,
    pub can_post: bool,
    pub has_credits: bool,
    pub credit_count: u32,
    pub cancel_at_period_end: bool,
}

impl UsageSummary {
    pub fn from_parts(subscription: &Subscription, credit_units: u32) -> Self {
        let posts_limit = match subscription.quota() {
            Quota::Limited(n) => n,
            Quota::Unlimited => 0,
        };
        Self {
            has_subscription: !subscription.is_free_tier(),
            plan_name: subscription.plan_name().to_string(),
            plan_display_name: subscription.plan_display_name().to_string(),
            posts_used: subscription.posts_used_this_month,
            posts_limit,
            remaining_posts: subscription.remaining_posts().count(),
            can_post: entitlement::evaluate(subscription, credit_units).allowed,
            has_credits: credit_units > 0,
            credit_count: credit_units,
            cancel_at_period_end: subscription.cancel_at_period_end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{PlanId, Timestamp, UserId};
    use crate::domain::marketplace::{BillingPeriod, PlanTerms};

    #[test]
    fn free_tier_summary() {
        let sub = Subscription::free_tier(UserId::new("u").unwrap(), Timestamp::now());
        let summary = UsageSummary::from_parts(&sub, 0);
        assert!(!summary.has_subscription);
        assert_eq!(summary.plan_name, "free");
        assert_eq!(summary.posts_limit, 1);
        assert_eq!(summary.remaining_posts, Some(1));
        assert!(summary.can_post);
        assert!(!summary.has_credits);
    }

    #[test]
    fn unlimited_plan_summary() {
        let sub = Subscription::paid(
            UserId::new("u").unwrap(),
            PlanTerms {
                plan_id: PlanId::new(3),
                name: "pro".to_string(),
                display_name: "Pro".to_string(),
                posts_per_month: 0,
            },
            None,
            "sub_1",
            BillingPeriod::default(),
            Timestamp::now(),
        );
        let summary = UsageSummary::from_parts(&sub, 2);
        assert!(summary.has_subscription);
        assert_eq!(summary.posts_limit, 0);
        assert_eq!(summary.remaining_posts, None);
        assert_eq!(summary.credit_count, 2);
    }

    #[test]
    fn credits_keep_exhausted_user_posting() {
        let mut sub = Subscription::free_tier(UserId::new("u").unwrap(), Timestamp::now());
        sub.posts_used_this_month = 1;
        assert!(!UsageSummary::from_parts(&sub, 0).can_post);
        assert!(UsageSummary::from_parts(&sub, 1).can_post);
    }
}
