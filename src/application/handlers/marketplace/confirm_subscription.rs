//! ConfirmSubscriptionHandler - Subscribes a user with an embedded payment method.
//!
//! Everything that can be checked locally is checked before the first
//! gateway call. Once the gateway subscription exists, local state is brought
//! in line by the [`SubscriptionReconciler`].

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::foundation::{BillingUser, PlanId, SubscriptionId, Timestamp};
use crate::domain::marketplace::BillingError;
use crate::ports::{
    CreateSubscriptionRequest, PaymentGateway, PaymentIntentStatus, PaymentRepository,
    PlanRepository, SubscriptionRepository,
};

use super::customer::CustomerResolver;
use super::reconcile::{ReconcileInput, SubscriptionReconciler};
use super::shared::{gateway_failure, require_present, META_PLAN_ID, META_USER_ID};

/// Payment `created_from` value for this flow.
const SOURCE: &str = "confirmation";

#[derive(Debug, Clone)]
pub struct ConfirmSubscriptionCommand {
    pub user: BillingUser,
    pub plan_id: PlanId,
    /// Payment method token collected by the client.
    pub payment_method_id: String,
}

#[derive(Debug, Clone)]
pub struct ConfirmSubscriptionResult {
    pub subscription_id: SubscriptionId,
    pub gateway_subscription_id: String,
    pub payment_status: PaymentIntentStatus,
    pub requires_action: bool,
    /// Lets the client finish an authentication challenge.
    pub client_secret: Option<String>,
}

pub struct ConfirmSubscriptionHandler {
    plans: Arc<dyn PlanRepository>,
    gateway: Arc<dyn PaymentGateway>,
    customers: CustomerResolver,
    reconciler: SubscriptionReconciler,
}

impl ConfirmSubscriptionHandler {
    pub fn new(
        plans: Arc<dyn PlanRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        payments: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            plans,
            customers: CustomerResolver::new(subscriptions.clone(), gateway.clone()),
            reconciler: SubscriptionReconciler::new(
                subscriptions,
                payments,
                gateway.clone(),
                currency,
            ),
            gateway,
        }
    }

    pub async fn handle(
        &self,
        cmd: ConfirmSubscriptionCommand,
    ) -> Result<ConfirmSubscriptionResult, BillingError> {
        // 1. Local validation
        require_present("payment_method_id", &cmd.payment_method_id)?;
        let plan = self
            .plans
            .find_by_id(cmd.plan_id)
            .await?
            .ok_or_else(|| BillingError::invalid_plan(Some(cmd.plan_id), "plan does not exist"))?;
        let price_id = match (&plan.gateway_price_id, plan.is_purchasable()) {
            (Some(price_id), true) => price_id.clone(),
            _ => {
                return Err(BillingError::invalid_plan(
                    Some(plan.id),
                    "plan is not available for purchase",
                ))
            }
        };
        let now = Timestamp::now();

        // 2. Gateway: customer, payment method, subscription
        let customer_id = self.customers.resolve(&cmd.user, now).await?;
        self.gateway
            .attach_payment_method(&customer_id, &cmd.payment_method_id)
            .await
            .map_err(|e| gateway_failure("attach_payment_method", e))?;

        let mut metadata = BTreeMap::new();
        metadata.insert(META_USER_ID.to_string(), cmd.user.id.to_string());
        metadata.insert(META_PLAN_ID.to_string(), plan.id.to_string());
        let gateway_subscription = self
            .gateway
            .create_subscription(CreateSubscriptionRequest {
                customer_id: customer_id.clone(),
                price_id,
                metadata,
            })
            .await
            .map_err(|e| gateway_failure("create_subscription", e))?;

        // 3. Local state
        let reconciled = self
            .reconciler
            .reconcile(
                ReconcileInput {
                    user_id: &cmd.user.id,
                    plan: &plan,
                    customer_id: Some(customer_id),
                    gateway_subscription: &gateway_subscription,
                    source: SOURCE,
                },
                now,
            )
            .await?;

        Ok(ConfirmSubscriptionResult {
            subscription_id: reconciled.subscription.id,
            gateway_subscription_id: gateway_subscription.id,
            requires_action: reconciled.payment_status.requires_action(),
            payment_status: reconciled.payment_status,
            client_secret: reconciled.client_secret,
        })
    }
}
