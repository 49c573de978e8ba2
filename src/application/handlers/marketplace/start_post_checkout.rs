//! StartPostCheckoutHandler - Opens a hosted checkout for one promotion post.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::foundation::{BillingUser, Timestamp};
use crate::domain::marketplace::BillingError;
use crate::ports::{
    CheckoutLineItem, CheckoutMode, CreateCheckoutRequest, PaymentGateway, SubscriptionRepository,
};

use super::customer::CustomerResolver;
use super::shared::{
    gateway_failure, require_present, BillingSettings, META_POST_COUNT, META_TYPE, META_USER_ID,
    PROMOTION_POST_ITEM, TYPE_ONE_TIME_POST,
};

#[derive(Debug, Clone)]
pub struct StartPostCheckoutCommand {
    pub user: BillingUser,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone)]
pub struct StartPostCheckoutResult {
    pub session_id: String,
    pub checkout_url: Option<String>,
}

pub struct StartPostCheckoutHandler {
    gateway: Arc<dyn PaymentGateway>,
    customers: CustomerResolver,
    settings: BillingSettings,
}

impl StartPostCheckoutHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        gateway: Arc<dyn PaymentGateway>,
        settings: BillingSettings,
    ) -> Self {
        Self {
            customers: CustomerResolver::new(subscriptions, gateway.clone()),
            gateway,
            settings,
        }
    }

    pub async fn handle(
        &self,
        cmd: StartPostCheckoutCommand,
    ) -> Result<StartPostCheckoutResult, BillingError> {
        require_present("success_url", &cmd.success_url)?;
        require_present("cancel_url", &cmd.cancel_url)?;

        let customer_id = self.customers.resolve(&cmd.user, Timestamp::now()).await?;

        let mut metadata = BTreeMap::new();
        metadata.insert(META_USER_ID.to_string(), cmd.user.id.to_string());
        metadata.insert(META_TYPE.to_string(), TYPE_ONE_TIME_POST.to_string());
        metadata.insert(META_POST_COUNT.to_string(), "1".to_string());

        let session = self
            .gateway
            .create_checkout_session(CreateCheckoutRequest {
                customer_id,
                mode: CheckoutMode::Payment,
                line_item: CheckoutLineItem::Adhoc {
                    name: PROMOTION_POST_ITEM.to_string(),
                    unit_amount: self.settings.post_price,
                    currency: self.settings.currency.clone(),
                    quantity: 1,
                },
                success_url: cmd.success_url,
                cancel_url: cmd.cancel_url,
                metadata,
            })
            .await
            .map_err(|e| gateway_failure("create_checkout_session", e))?;

        tracing::info!(user_id = %cmd.user.id, session_id = %session.id, "Post checkout started");
        Ok(StartPostCheckoutResult {
            session_id: session.id,
            checkout_url: session.url,
        })
    }
}
