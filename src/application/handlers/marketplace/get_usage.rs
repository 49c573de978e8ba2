//! GetUsageHandler - Query handler for a user's posting allowance.

use std::sync::Arc;

use crate::domain::foundation::{Timestamp, UserId};
use crate::domain::marketplace::{credit, BillingError, UsageSummary};
use crate::ports::{CreditRepository, SubscriptionRepository};

use super::shared::load_current;

#[derive(Debug, Clone)]
pub struct GetUsageQuery {
    pub user_id: UserId,
}

#[derive(Debug, Clone)]
pub struct GetUsageResult {
    pub usage: UsageSummary,
}

/// Creates the free-tier record on first use and persists a due monthly
/// reset, like the other entry points that resolve the current subscription.
pub struct GetUsageHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    credits: Arc<dyn CreditRepository>,
}

impl GetUsageHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        credits: Arc<dyn CreditRepository>,
    ) -> Self {
        Self {
            subscriptions,
            credits,
        }
    }

    pub async fn handle(&self, query: GetUsageQuery) -> Result<GetUsageResult, BillingError> {
        let now = Timestamp::now();
        let subscription = load_current(self.subscriptions.as_ref(), &query.user_id, now).await?;
        let credits = self.credits.list_for_user(&query.user_id).await?;
        let units = credit::available_units(&credits, now);

        Ok(GetUsageResult {
            usage: UsageSummary::from_parts(&subscription, units),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_fixtures::*;
    use super::*;
    use crate::domain::foundation::Money;
    use crate::domain::marketplace::{Credit, Payment, Subscription};
    use crate::ports::PaymentRepository;

    fn handler(fx: &Fixture) -> GetUsageHandler {
        GetUsageHandler::new(fx.subscriptions(), fx.credits())
    }

    #[tokio::test]
    async fn new_user_gets_free_tier_summary() {
        let fx = Fixture::new();
        let user = user_id("alice");

        let usage = handler(&fx)
            .handle(GetUsageQuery { user_id: user.clone() })
            .await
            .unwrap()
            .usage;

        assert!(!usage.has_subscription);
        assert_eq!(usage.plan_name, "free");
        assert_eq!(usage.plan_display_name, "Free");
        assert_eq!(usage.posts_limit, 1);
        assert_eq!(usage.remaining_posts, Some(1));
        assert!(usage.can_post);
        assert!(!usage.has_credits);
        assert_eq!(fx.store.history_for_user(&user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_free_tier_with_credit_can_post() {
        let fx = Fixture::new();
        let user = user_id("alice");
        let now = Timestamp::now();
        let mut sub = Subscription::free_tier(user.clone(), now);
        sub.posts_used_this_month = 1;
        SubscriptionRepository::insert(fx.store.as_ref(), &sub)
            .await
            .unwrap();
        let payment = Payment::one_time_post(
            user.clone(),
            Money::from_cents(500).unwrap(),
            "usd",
            "pi_1",
            now,
        );
        let credit = Credit::issue(user.clone(), 1, Some(payment.id), now);
        fx.store.record_with_credit(&payment, &credit).await.unwrap();

        let usage = handler(&fx)
            .handle(GetUsageQuery { user_id: user })
            .await
            .unwrap()
            .usage;

        assert_eq!(usage.remaining_posts, Some(0));
        assert!(usage.can_post);
        assert!(usage.has_credits);
        assert_eq!(usage.credit_count, 1);
    }
}
