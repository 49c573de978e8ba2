//! ConsumeEntitlementHandler - Command handler that spends one post.
//!
//! The only path that grows the usage counter. Subscription quota is spent
//! first; once it is exhausted the soonest-expiring usable credit is drawn.

use std::sync::Arc;

use crate::domain::foundation::{Timestamp, UserId};
use crate::domain::marketplace::{BillingError, EntitlementSource, RemainingPosts};
use crate::ports::{CreditRepository, SubscriptionRepository};

use super::shared::load_current;

#[derive(Debug, Clone)]
pub struct ConsumeEntitlementCommand {
    pub user_id: UserId,
}

#[derive(Debug, Clone)]
pub struct ConsumeEntitlementResult {
    pub source: EntitlementSource,
    pub remaining_posts: RemainingPosts,
}

pub struct ConsumeEntitlementHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    credits: Arc<dyn CreditRepository>,
}

impl ConsumeEntitlementHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        credits: Arc<dyn CreditRepository>,
    ) -> Self {
        Self {
            subscriptions,
            credits,
        }
    }

    pub async fn handle(
        &self,
        cmd: ConsumeEntitlementCommand,
    ) -> Result<ConsumeEntitlementResult, BillingError> {
        let now = Timestamp::now();
        let mut subscription = load_current(self.subscriptions.as_ref(), &cmd.user_id, now).await?;

        if subscription.can_post() {
            subscription.record_post(now)?;
            self.subscriptions.update(&subscription).await?;
            tracing::debug!(
                user_id = %cmd.user_id,
                subscription_id = %subscription.id,
                posts_used = subscription.posts_used_this_month,
                "Post counted against subscription"
            );
            return Ok(ConsumeEntitlementResult {
                source: EntitlementSource::Subscription,
                remaining_posts: subscription.remaining_posts(),
            });
        }

        match self.credits.consume_one(&cmd.user_id, now).await? {
            Some(credit) => {
                tracing::debug!(user_id = %cmd.user_id, credit_id = %credit.id, "Post paid with credit");
                Ok(ConsumeEntitlementResult {
                    source: EntitlementSource::Credit,
                    remaining_posts: subscription.remaining_posts(),
                })
            }
            None => {
                tracing::info!(user_id = %cmd.user_id, "No posts remaining");
                Err(BillingError::EntitlementExhausted(cmd.user_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_fixtures::*;
    use super::*;
    use crate::domain::foundation::{ErrorCode, Money};
    use crate::domain::marketplace::{BillingPeriod, Credit, Payment, Subscription};
    use crate::ports::PaymentRepository;

    fn handler(fx: &Fixture) -> ConsumeEntitlementHandler {
        ConsumeEntitlementHandler::new(fx.subscriptions(), fx.credits())
    }

    async fn grant_credit(fx: &Fixture, user: &UserId, intent: &str) {
        let now = Timestamp::now();
        let payment = Payment::one_time_post(
            user.clone(),
            Money::from_cents(500).unwrap(),
            "usd",
            intent,
            now,
        );
        let credit = Credit::issue(user.clone(), 1, Some(payment.id), now);
        fx.store.record_with_credit(&payment, &credit).await.unwrap();
    }

    fn consume(user: &UserId) -> ConsumeEntitlementCommand {
        ConsumeEntitlementCommand {
            user_id: user.clone(),
        }
    }

    #[tokio::test]
    async fn free_tier_then_credit_then_exhausted() {
        let fx = Fixture::new();
        let user = user_id("alice");
        grant_credit(&fx, &user, "pi_1").await;
        let handler = handler(&fx);

        let first = handler.handle(consume(&user)).await.unwrap();
        assert_eq!(first.source, EntitlementSource::Subscription);

        let second = handler.handle(consume(&user)).await.unwrap();
        assert_eq!(second.source, EntitlementSource::Credit);
        assert_eq!(fx.store.all_credits()[0].used, 1);

        let err = handler.handle(consume(&user)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::EntitlementExhausted);

        let history = fx.store.history_for_user(&user).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].posts_used_this_month, 1);
    }

    #[tokio::test]
    async fn unlimited_plan_never_touches_credits() {
        let fx = Fixture::new();
        let user = user_id("alice");
        let plan = fx.seed_plan("unlimited", 4999, 0).await;
        let sub = Subscription::paid(
            user.clone(),
            plan.terms(),
            None,
            "sub_1",
            BillingPeriod::default(),
            Timestamp::now(),
        );
        SubscriptionRepository::insert(fx.store.as_ref(), &sub)
            .await
            .unwrap();
        grant_credit(&fx, &user, "pi_1").await;
        let handler = handler(&fx);

        for _ in 0..5 {
            let result = handler.handle(consume(&user)).await.unwrap();
            assert_eq!(result.source, EntitlementSource::Subscription);
            assert_eq!(result.remaining_posts, RemainingPosts::Unlimited);
        }
        assert_eq!(fx.store.all_credits()[0].used, 0);
    }

    #[tokio::test]
    async fn credits_drain_one_at_a_time() {
        let fx = Fixture::new();
        let user = user_id("alice");
        grant_credit(&fx, &user, "pi_1").await;
        grant_credit(&fx, &user, "pi_2").await;
        let handler = handler(&fx);

        handler.handle(consume(&user)).await.unwrap();
        handler.handle(consume(&user)).await.unwrap();
        handler.handle(consume(&user)).await.unwrap();

        let used: u32 = fx.store.all_credits().iter().map(|c| c.used).sum();
        assert_eq!(used, 2);
        assert!(handler.handle(consume(&user)).await.is_err());
    }
}
