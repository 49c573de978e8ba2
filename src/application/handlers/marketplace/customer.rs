//! Gateway customer resolution.
//!
//! The customer id lives on the user's most recent subscription record. A
//! user with no history gets a placeholder free-tier record to carry it.

use std::sync::Arc;

use crate::domain::foundation::{BillingUser, Timestamp};
use crate::domain::marketplace::{history, BillingError, Subscription};
use crate::ports::{CreateCustomerRequest, PaymentGateway, SubscriptionRepository};

use super::shared::gateway_failure;

pub struct CustomerResolver {
    subscriptions: Arc<dyn SubscriptionRepository>,
    gateway: Arc<dyn PaymentGateway>,
}

impl CustomerResolver {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            subscriptions,
            gateway,
        }
    }

    /// Returns the user's gateway customer id, registering one if needed.
    pub async fn resolve(&self, user: &BillingUser, now: Timestamp) -> Result<String, BillingError> {
        let history = self.subscriptions.history_for_user(&user.id).await?;
        let latest = history::latest(&history);

        if let Some(id) = latest.and_then(|s| s.gateway_customer_id.clone()) {
            return Ok(id);
        }

        let name = (!user.username.trim().is_empty()).then(|| user.username.clone());
        let customer = self
            .gateway
            .create_customer(CreateCustomerRequest {
                user_id: user.id.clone(),
                email: user.email.clone(),
                name,
            })
            .await
            .map_err(|e| gateway_failure("create_customer", e))?;

        match latest {
            Some(record) => {
                self.subscriptions
                    .set_customer_id(record.id, &customer.id, now)
                    .await?;
            }
            None => {
                let mut placeholder = Subscription::free_tier(user.id.clone(), now);
                placeholder.gateway_customer_id = Some(customer.id.clone());
                self.subscriptions.insert(&placeholder).await?;
            }
        }

        tracing::info!(user_id = %user.id, customer_id = %customer.id, "Registered gateway customer");
        Ok(customer.id)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_fixtures::*;
    use super::*;
    use crate::adapters::memory::{FailurePoint, InMemoryBillingStore};
    use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, UserId};
    use crate::ports::GatewayError;
    use async_trait::async_trait;

    fn resolver(fx: &Fixture) -> CustomerResolver {
        CustomerResolver::new(fx.subscriptions(), fx.payment_gateway())
    }

    #[tokio::test]
    async fn creates_customer_and_placeholder_for_new_user() {
        let fx = Fixture::new();
        let user = member("alice");

        let id = resolver(&fx).resolve(&user, Timestamp::now()).await.unwrap();

        let history = fx.store.history_for_user(&user.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_free_tier());
        assert_eq!(history[0].gateway_customer_id.as_deref(), Some(id.as_str()));
        assert_eq!(
            fx.gateway.args_of("create_customer"),
            vec![vec!["alice".to_string(), "alice@example.com".to_string()]]
        );
    }

    #[tokio::test]
    async fn reuses_customer_on_latest_record() {
        let fx = Fixture::new();
        let user = member("alice");
        let resolver = resolver(&fx);

        let first = resolver.resolve(&user, Timestamp::now()).await.unwrap();
        let second = resolver.resolve(&user, Timestamp::now()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.gateway.call_count("create_customer"), 1);
    }

    #[tokio::test]
    async fn stores_customer_on_existing_record() {
        let fx = Fixture::new();
        let user = member("alice");
        let existing = Subscription::free_tier(user.id.clone(), Timestamp::now());
        SubscriptionRepository::insert(fx.store.as_ref(), &existing)
            .await
            .unwrap();

        let id = resolver(&fx).resolve(&user, Timestamp::now()).await.unwrap();

        let stored = SubscriptionRepository::find_by_id(fx.store.as_ref(), existing.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.gateway_customer_id, Some(id));
        assert_eq!(fx.store.history_for_user(&user.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn gateway_failure_writes_nothing() {
        let fx = Fixture::new();
        fx.gateway
            .set_method_error("create_customer", GatewayError::network("timeout"));
        let user = member("alice");

        let err = resolver(&fx).resolve(&user, Timestamp::now()).await.unwrap_err();

        assert!(matches!(err, BillingError::GatewayUnavailable(_)));
        assert!(fx.store.history_for_user(&user.id).await.unwrap().is_empty());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Concurrent usage
    // ════════════════════════════════════════════════════════════════════════════

    /// Records a post on the user's latest record right after every history
    /// read, the way a concurrent consume would land between read and write.
    struct PostAfterRead {
        store: Arc<InMemoryBillingStore>,
    }

    #[async_trait]
    impl SubscriptionRepository for PostAfterRead {
        async fn history_for_user(&self, user_id: &UserId) -> Result<Vec<Subscription>, DomainError> {
            let history = self.store.history_for_user(user_id).await?;
            if let Some(latest) = history::latest(&history) {
                let mut bumped = latest.clone();
                bumped.record_post(Timestamp::now())?;
                SubscriptionRepository::update(self.store.as_ref(), &bumped).await?;
            }
            Ok(history)
        }

        async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError> {
            SubscriptionRepository::find_by_id(self.store.as_ref(), id).await
        }

        async fn find_by_gateway_subscription(
            &self,
            gateway_subscription_id: &str,
        ) -> Result<Option<Subscription>, DomainError> {
            self.store
                .find_by_gateway_subscription(gateway_subscription_id)
                .await
        }

        async fn insert(&self, subscription: &Subscription) -> Result<(), DomainError> {
            SubscriptionRepository::insert(self.store.as_ref(), subscription).await
        }

        async fn update(&self, subscription: &Subscription) -> Result<(), DomainError> {
            SubscriptionRepository::update(self.store.as_ref(), subscription).await
        }

        async fn set_customer_id(
            &self,
            id: SubscriptionId,
            customer_id: &str,
            now: Timestamp,
        ) -> Result<(), DomainError> {
            self.store.set_customer_id(id, customer_id, now).await
        }

        async fn supersede_active(
            &self,
            subscription: &Subscription,
        ) -> Result<Vec<SubscriptionId>, DomainError> {
            self.store.supersede_active(subscription).await
        }
    }

    #[tokio::test]
    async fn linking_customer_keeps_concurrent_usage() {
        let fx = Fixture::new();
        let user = member("alice");
        let existing = Subscription::free_tier(user.id.clone(), Timestamp::now());
        SubscriptionRepository::insert(fx.store.as_ref(), &existing)
            .await
            .unwrap();
        let resolver = CustomerResolver::new(
            Arc::new(PostAfterRead {
                store: fx.store.clone(),
            }),
            fx.payment_gateway(),
        );

        let id = resolver.resolve(&user, Timestamp::now()).await.unwrap();

        let stored = SubscriptionRepository::find_by_id(fx.store.as_ref(), existing.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.gateway_customer_id, Some(id));
        assert_eq!(stored.posts_used_this_month, 1);
    }

    #[tokio::test]
    async fn linking_customer_does_not_rewrite_the_record() {
        let fx = Fixture::new();
        let user = member("alice");
        let existing = Subscription::free_tier(user.id.clone(), Timestamp::now());
        SubscriptionRepository::insert(fx.store.as_ref(), &existing)
            .await
            .unwrap();
        fx.store.fail_on(FailurePoint::UpdateSubscription);

        let id = resolver(&fx).resolve(&user, Timestamp::now()).await.unwrap();

        let stored = SubscriptionRepository::find_by_id(fx.store.as_ref(), existing.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.gateway_customer_id, Some(id));
    }

    #[tokio::test]
    async fn linking_customer_to_unknown_record_fails() {
        let fx = Fixture::new();

        let err = fx
            .store
            .set_customer_id(SubscriptionId::new(), "cus_1", Timestamp::now())
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::SubscriptionNotFound);
    }
}
