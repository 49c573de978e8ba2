//! CancelSubscriptionHandler - Cancels a paid subscription at period end.
//!
//! The record stays active, and its quota keeps applying, until the gateway
//! deletes the subscription and the `customer.subscription.deleted` webhook
//! ends it. From then on the user is governed by a new free-tier record.

use std::sync::Arc;

use crate::domain::foundation::{SubscriptionId, Timestamp, UserId};
use crate::domain::marketplace::{history, BillingError, BillingPeriod};
use crate::ports::{PaymentGateway, SubscriptionRepository};

use super::reconcile::tolerant_period;
use super::shared::gateway_failure;

#[derive(Debug, Clone)]
pub struct CancelSubscriptionCommand {
    pub user_id: UserId,
}

#[derive(Debug, Clone)]
pub struct CancelSubscriptionResult {
    pub subscription_id: SubscriptionId,
    /// When the quota stops applying, if the gateway reported it.
    pub period: BillingPeriod,
}

pub struct CancelSubscriptionHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    gateway: Arc<dyn PaymentGateway>,
}

impl CancelSubscriptionHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            subscriptions,
            gateway,
        }
    }

    pub async fn handle(
        &self,
        cmd: CancelSubscriptionCommand,
    ) -> Result<CancelSubscriptionResult, BillingError> {
        let history = self.subscriptions.history_for_user(&cmd.user_id).await?;
        let mut subscription = history::cancellable(&history)
            .cloned()
            .ok_or_else(|| BillingError::not_found("active subscription", ""))?;
        let gateway_subscription_id = subscription
            .gateway_subscription_id
            .clone()
            .ok_or_else(|| BillingError::not_found("active subscription", ""))?;

        let gateway_subscription = self
            .gateway
            .cancel_at_period_end(&gateway_subscription_id)
            .await
            .map_err(|e| gateway_failure("cancel_at_period_end", e))?;

        let now = Timestamp::now();
        subscription.sync_with_gateway(tolerant_period(&gateway_subscription), true, now);
        subscription.request_cancellation(now)?;
        self.subscriptions.update(&subscription).await.map_err(|err| {
            tracing::error!(
                user_id = %cmd.user_id,
                gateway_subscription_id = %gateway_subscription_id,
                error = %err,
                "Gateway cancellation succeeded but local record was not updated"
            );
            BillingError::reconciliation_failed(
                cmd.user_id.clone(),
                gateway_subscription_id.clone(),
                err.to_string(),
            )
        })?;

        tracing::info!(
            user_id = %cmd.user_id,
            subscription_id = %subscription.id,
            "Subscription set to cancel at period end"
        );
        Ok(CancelSubscriptionResult {
            subscription_id: subscription.id,
            period: subscription.period,
        })
    }
}
