//! ConfirmPostPaymentHandler - Pays for one post with an embedded payment method.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::foundation::{BillingUser, Timestamp};
use crate::domain::marketplace::BillingError;
use crate::ports::{
    CreatePaymentIntentRequest, PaymentGateway, PaymentIntentStatus, PaymentRepository, SaveResult,
    SubscriptionRepository,
};

use super::customer::CustomerResolver;
use super::shared::{
    gateway_failure, issue_post_credit, require_present, BillingSettings, META_POST_COUNT,
    META_TYPE, META_USER_ID, TYPE_ONE_TIME_POST,
};

const SOURCE: &str = "confirmation";

#[derive(Debug, Clone)]
pub struct ConfirmPostPaymentCommand {
    pub user: BillingUser,
    pub payment_method_id: String,
    /// Where the gateway returns the user after an authentication challenge.
    pub return_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConfirmPostPaymentResult {
    pub payment_intent_id: String,
    pub status: PaymentIntentStatus,
    pub requires_action: bool,
    pub client_secret: Option<String>,
    /// False for unsettled payments and for replays of a recorded one.
    pub credit_issued: bool,
}

pub struct ConfirmPostPaymentHandler {
    payments: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    customers: CustomerResolver,
    settings: BillingSettings,
}

impl ConfirmPostPaymentHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        payments: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        settings: BillingSettings,
    ) -> Self {
        Self {
            payments,
            customers: CustomerResolver::new(subscriptions, gateway.clone()),
            gateway,
            settings,
        }
    }

    pub async fn handle(
        &self,
        cmd: ConfirmPostPaymentCommand,
    ) -> Result<ConfirmPostPaymentResult, BillingError> {
        require_present("payment_method_id", &cmd.payment_method_id)?;
        let now = Timestamp::now();

        let customer_id = self.customers.resolve(&cmd.user, now).await?;

        let mut metadata = BTreeMap::new();
        metadata.insert(META_USER_ID.to_string(), cmd.user.id.to_string());
        metadata.insert(META_TYPE.to_string(), TYPE_ONE_TIME_POST.to_string());
        metadata.insert(META_POST_COUNT.to_string(), "1".to_string());

        let intent = self
            .gateway
            .create_payment_intent(CreatePaymentIntentRequest {
                customer_id,
                amount: self.settings.post_price,
                currency: self.settings.currency.clone(),
                payment_method_id: cmd.payment_method_id,
                return_url: cmd.return_url,
                metadata,
            })
            .await
            .map_err(|e| gateway_failure("create_payment_intent", e))?;

        let mut credit_issued = false;
        if intent.status.is_succeeded() {
            let saved = issue_post_credit(
                self.payments.as_ref(),
                &cmd.user.id,
                self.settings.post_price,
                &self.settings.currency,
                &intent.id,
                SOURCE,
                now,
            )
            .await
            .map_err(|err| {
                tracing::error!(
                    user_id = %cmd.user.id,
                    payment_intent_id = %intent.id,
                    error = %err,
                    "Post payment succeeded but could not be recorded"
                );
                BillingError::reconciliation_failed(
                    cmd.user.id.clone(),
                    intent.id.clone(),
                    err.to_string(),
                )
            })?;
            credit_issued = saved == SaveResult::Inserted;
        } else {
            tracing::info!(
                user_id = %cmd.user.id,
                payment_intent_id = %intent.id,
                status = intent.status.as_str(),
                "Post payment not settled yet"
            );
        }

        Ok(ConfirmPostPaymentResult {
            requires_action: intent.status.requires_action(),
            payment_intent_id: intent.id,
            status: intent.status,
            client_secret: intent.client_secret,
            credit_issued,
        })
    }
}
