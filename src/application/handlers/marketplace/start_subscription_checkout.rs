//! StartSubscriptionCheckoutHandler - Opens a hosted checkout for a plan.
//!
//! Nothing is written locally except, on first purchase, the gateway
//! customer id. The subscription itself arrives later through the
//! `checkout.session.completed` webhook.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::foundation::{BillingUser, PlanId, Timestamp};
use crate::domain::marketplace::BillingError;
use crate::ports::{
    CheckoutLineItem, CheckoutMode, CreateCheckoutRequest, PaymentGateway, PlanRepository,
    SubscriptionRepository,
};

use super::customer::CustomerResolver;
use super::shared::{
    gateway_failure, require_present, META_PLAN_ID, META_TYPE, META_USER_ID, TYPE_SUBSCRIPTION,
};

#[derive(Debug, Clone)]
pub struct StartSubscriptionCheckoutCommand {
    pub user: BillingUser,
    pub plan_id: PlanId,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone)]
pub struct StartSubscriptionCheckoutResult {
    pub session_id: String,
    pub checkout_url: Option<String>,
}

pub struct StartSubscriptionCheckoutHandler {
    plans: Arc<dyn PlanRepository>,
    gateway: Arc<dyn PaymentGateway>,
    customers: CustomerResolver,
}

impl StartSubscriptionCheckoutHandler {
    pub fn new(
        plans: Arc<dyn PlanRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            plans,
            customers: CustomerResolver::new(subscriptions, gateway.clone()),
            gateway,
        }
    }

    pub async fn handle(
        &self,
        cmd: StartSubscriptionCheckoutCommand,
    ) -> Result<StartSubscriptionCheckoutResult, BillingError> {
        require_present("success_url", &cmd.success_url)?;
        require_present("cancel_url", &cmd.cancel_url)?;

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

        let customer_id = self.customers.resolve(&cmd.user, Timestamp::now()).await?;

        let mut metadata = BTreeMap::new();
        metadata.insert(META_USER_ID.to_string(), cmd.user.id.to_string());
        metadata.insert(META_PLAN_ID.to_string(), plan.id.to_string());
        metadata.insert(META_TYPE.to_string(), TYPE_SUBSCRIPTION.to_string());

        let session = self
            .gateway
            .create_checkout_session(CreateCheckoutRequest {
                customer_id,
                mode: CheckoutMode::Subscription,
                line_item: CheckoutLineItem::Price {
                    price_id,
                    quantity: 1,
                },
                success_url: cmd.success_url,
                cancel_url: cmd.cancel_url,
                metadata,
            })
            .await
            .map_err(|e| gateway_failure("create_checkout_session", e))?;

        tracing::info!(
            user_id = %cmd.user.id,
            plan_id = %plan.id,
            session_id = %session.id,
            "Subscription checkout started"
        );
        Ok(StartSubscriptionCheckoutResult {
            session_id: session.id,
            checkout_url: session.url,
        })
    }
}
