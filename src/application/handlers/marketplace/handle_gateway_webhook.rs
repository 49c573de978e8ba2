//! HandleGatewayWebhookHandler - Applies verified gateway events to local state.
//!
//! Every branch is safe to replay: the gateway redelivers until it sees a
//! success response, and the same event may also race the synchronous
//! confirmation flow.
//!
//! Events that cannot be tied to local state are acknowledged and ignored.
//! Failures that a retry could fix are returned as errors so the gateway
//! delivers the event again.

use std::sync::Arc;

use crate::domain::foundation::{Money, PlanId, SubscriptionId, Timestamp, UserId};
use crate::domain::marketplace::{BillingError, SubscriptionStatus};
use crate::ports::{
    CompletedCheckout, GatewayInvoice, GatewaySubscription, PaymentGateway, PaymentRepository,
    PlanRepository, SaveResult, SubscriptionRepository, WebhookEventKind,
};

use super::reconcile::{tolerant_period, Charge, ReconcileInput, SubscriptionReconciler};
use super::shared::{
    gateway_failure, issue_post_credit, BillingSettings, META_PLAN_ID, META_TYPE, META_USER_ID,
    TYPE_ONE_TIME_POST, TYPE_SUBSCRIPTION,
};

const SOURCE: &str = "webhook";

#[derive(Debug, Clone)]
pub struct HandleGatewayWebhookCommand {
    pub payload: Vec<u8>,
    /// Raw `Stripe-Signature` header.
    pub signature: String,
}

/// What a delivered event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    SubscriptionReconciled(SubscriptionId),
    CreditIssued,
    PaymentRecorded,
    /// Already applied by an earlier delivery or by the confirmation flow.
    Duplicate,
    SubscriptionSynced(SubscriptionId),
    SubscriptionEnded(SubscriptionId),
    Ignored,
}

#[derive(Debug, Clone)]
pub struct HandleGatewayWebhookResult {
    pub event_id: String,
    pub outcome: WebhookOutcome,
}

pub struct HandleGatewayWebhookHandler {
    plans: Arc<dyn PlanRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    payments: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    reconciler: SubscriptionReconciler,
    settings: BillingSettings,
}

impl HandleGatewayWebhookHandler {
    pub fn new(
        plans: Arc<dyn PlanRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        payments: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        settings: BillingSettings,
    ) -> Self {
        Self {
            reconciler: SubscriptionReconciler::new(
                subscriptions.clone(),
                payments.clone(),
                gateway.clone(),
                settings.currency.clone(),
            ),
            plans,
            subscriptions,
            payments,
            gateway,
            settings,
        }
    }

    pub async fn handle(
        &self,
        cmd: HandleGatewayWebhookCommand,
    ) -> Result<HandleGatewayWebhookResult, BillingError> {
        let event = self
            .gateway
            .verify_webhook(&cmd.payload, &cmd.signature)
            .await
            .map_err(|err| {
                tracing::warn!(error = %err, "Rejected webhook delivery");
                BillingError::from(err)
            })?;

        let now = Timestamp::now();
        let outcome = match &event.kind {
            WebhookEventKind::CheckoutCompleted(session) => {
                self.checkout_completed(session, now).await?
            }
            WebhookEventKind::InvoicePaid(invoice) => self.invoice_paid(invoice, now).await?,
            WebhookEventKind::SubscriptionUpdated(sub) => {
                self.subscription_updated(sub, now).await?
            }
            WebhookEventKind::SubscriptionDeleted(sub) => {
                self.subscription_deleted(sub, now).await?
            }
            WebhookEventKind::Other { event_type } => {
                tracing::debug!(event_id = %event.id, event_type, "Ignoring webhook event");
                WebhookOutcome::Ignored
            }
        };

        tracing::info!(event_id = %event.id, outcome = ?outcome, "Webhook processed");
        Ok(HandleGatewayWebhookResult {
            event_id: event.id,
            outcome,
        })
    }

    // ════════════════════════════════════════════════════════════════════════════
    // checkout.session.completed
    // ════════════════════════════════════════════════════════════════════════════

    async fn checkout_completed(
        &self,
        session: &CompletedCheckout,
        now: Timestamp,
    ) -> Result<WebhookOutcome, BillingError> {
        let Some(user_id) = metadata_user(session) else {
            tracing::warn!(session_id = %session.session_id, "Checkout without a valid user_id");
            return Ok(WebhookOutcome::Ignored);
        };

        match session.metadata.get(META_TYPE).map(String::as_str) {
            Some(TYPE_SUBSCRIPTION) => self.checkout_subscription(session, &user_id, now).await,
            Some(TYPE_ONE_TIME_POST) => self.checkout_post(session, &user_id, now).await,
            other => {
                tracing::warn!(
                    session_id = %session.session_id,
                    checkout_type = ?other,
                    "Checkout of unknown type"
                );
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    async fn checkout_subscription(
        &self,
        session: &CompletedCheckout,
        user_id: &UserId,
        now: Timestamp,
    ) -> Result<WebhookOutcome, BillingError> {
        let (Some(gateway_subscription_id), Some(plan_id)) =
            (session.subscription_id.as_deref(), metadata_plan(session))
        else {
            tracing::warn!(
                session_id = %session.session_id,
                "Subscription checkout without subscription or plan reference"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        let Some(plan) = self.plans.find_by_id(plan_id).await? else {
            tracing::error!(
                user_id = %user_id,
                plan_id = %plan_id,
                gateway_subscription_id,
                "Paid checkout references a plan that no longer exists"
            );
            return Err(BillingError::reconciliation_failed(
                user_id.clone(),
                gateway_subscription_id,
                format!("plan {} not found", plan_id),
            ));
        };

        let gateway_subscription = self
            .gateway
            .retrieve_subscription(gateway_subscription_id)
            .await
            .map_err(|e| gateway_failure("retrieve_subscription", e))?;

        let reconciled = self
            .reconciler
            .reconcile(
                ReconcileInput {
                    user_id,
                    plan: &plan,
                    customer_id: session
                        .customer_id
                        .clone()
                        .or_else(|| gateway_subscription.customer_id.clone()),
                    gateway_subscription: &gateway_subscription,
                    source: SOURCE,
                },
                now,
            )
            .await?;
        Ok(WebhookOutcome::SubscriptionReconciled(
            reconciled.subscription.id,
        ))
    }

    async fn checkout_post(
        &self,
        session: &CompletedCheckout,
        user_id: &UserId,
        now: Timestamp,
    ) -> Result<WebhookOutcome, BillingError> {
        let Some(payment_intent_id) = session.payment_intent_id.as_deref() else {
            tracing::warn!(session_id = %session.session_id, "Post checkout without payment intent");
            return Ok(WebhookOutcome::Ignored);
        };
        let amount = session
            .amount_total
            .and_then(|cents| Money::from_cents(cents).ok())
            .unwrap_or(self.settings.post_price);
        let currency = session
            .currency
            .clone()
            .unwrap_or_else(|| self.settings.currency.clone());

        let saved = issue_post_credit(
            self.payments.as_ref(),
            user_id,
            amount,
            &currency,
            payment_intent_id,
            SOURCE,
            now,
        )
        .await?;
        Ok(match saved {
            SaveResult::Inserted => WebhookOutcome::CreditIssued,
            SaveResult::AlreadyExists => WebhookOutcome::Duplicate,
        })
    }

    // ════════════════════════════════════════════════════════════════════════════
    // invoice.paid
    // ════════════════════════════════════════════════════════════════════════════

    async fn invoice_paid(
        &self,
        invoice: &GatewayInvoice,
        now: Timestamp,
    ) -> Result<WebhookOutcome, BillingError> {
        let Some(gateway_subscription_id) = invoice.subscription_id.as_deref() else {
            return Ok(WebhookOutcome::Ignored);
        };
        let Some(subscription) = self
            .subscriptions
            .find_by_gateway_subscription(gateway_subscription_id)
            .await?
        else {
            // Checkout reconciliation records this invoice when it arrives.
            tracing::info!(
                invoice_id = %invoice.id,
                gateway_subscription_id,
                "Invoice for an unknown subscription"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        let saved = self
            .reconciler
            .record_charge(
                &subscription,
                gateway_subscription_id,
                Charge::Invoice(invoice),
                SOURCE,
                now,
            )
            .await?;
        Ok(match saved {
            SaveResult::Inserted => WebhookOutcome::PaymentRecorded,
            SaveResult::AlreadyExists => WebhookOutcome::Duplicate,
        })
    }

    // ════════════════════════════════════════════════════════════════════════════
    // customer.subscription.*
    // ════════════════════════════════════════════════════════════════════════════

    async fn subscription_updated(
        &self,
        gateway_sub: &GatewaySubscription,
        now: Timestamp,
    ) -> Result<WebhookOutcome, BillingError> {
        let Some(mut subscription) = self
            .subscriptions
            .find_by_gateway_subscription(&gateway_sub.id)
            .await?
        else {
            return Ok(WebhookOutcome::Ignored);
        };

        subscription.sync_with_gateway(
            tolerant_period(gateway_sub),
            gateway_sub.cancel_at_period_end,
            now,
        );
        self.subscriptions.update(&subscription).await?;
        Ok(WebhookOutcome::SubscriptionSynced(subscription.id))
    }

    async fn subscription_deleted(
        &self,
        gateway_sub: &GatewaySubscription,
        now: Timestamp,
    ) -> Result<WebhookOutcome, BillingError> {
        let Some(mut subscription) = self
            .subscriptions
            .find_by_gateway_subscription(&gateway_sub.id)
            .await?
        else {
            return Ok(WebhookOutcome::Ignored);
        };

        match subscription.status {
            SubscriptionStatus::Canceled => Ok(WebhookOutcome::Duplicate),
            // Superseded records already stopped governing the user.
            SubscriptionStatus::Completed => Ok(WebhookOutcome::Ignored),
            SubscriptionStatus::Active => {
                subscription.end(now)?;
                self.subscriptions.update(&subscription).await?;
                tracing::info!(
                    user_id = %subscription.user_id,
                    subscription_id = %subscription.id,
                    "Subscription ended by gateway"
                );
                Ok(WebhookOutcome::SubscriptionEnded(subscription.id))
            }
        }
    }
}

fn metadata_user(session: &CompletedCheckout) -> Option<UserId> {
    session
        .metadata
        .get(META_USER_ID)
        .and_then(|raw| UserId::new(raw).ok())
}

fn metadata_plan(session: &CompletedCheckout) -> Option<PlanId> {
    session
        .metadata
        .get(META_PLAN_ID)
        .and_then(|raw| raw.parse::<i64>().ok())
        .map(PlanId::new)
}

#[cfg(test)]
mod tests {
    use super::super::test_fixtures::*;
    use super::*;
    use crate::domain::foundation::ErrorCode;
    use super::super::check_entitlement::{CheckEntitlementHandler, CheckEntitlementQuery};
    use super::super::get_usage::{GetUsageHandler, GetUsageQuery};
    use crate::domain::marketplace::{
        history, BillingPeriod, PaymentKind, Plan, RemainingPosts, Subscription,
    };
    use crate::ports::{CreateSubscriptionRequest, InvoiceStatus, WebhookEvent};
    use std::collections::BTreeMap;

    fn handler(fx: &Fixture) -> HandleGatewayWebhookHandler {
        HandleGatewayWebhookHandler::new(
            fx.plans(),
            fx.subscriptions(),
            fx.payments(),
            fx.payment_gateway(),
            fx.settings(),
        )
    }

    fn command() -> HandleGatewayWebhookCommand {
        HandleGatewayWebhookCommand {
            payload: b"{}".to_vec(),
            signature: "t=1,v1=abc".to_string(),
        }
    }

    fn event(kind: WebhookEventKind) -> WebhookEvent {
        WebhookEvent {
            id: "evt_1".to_string(),
            created: 1_700_000_000,
            kind,
        }
    }

    async fn deliver(fx: &Fixture, kind: WebhookEventKind) -> WebhookOutcome {
        fx.gateway.set_webhook_event(event(kind));
        handler(fx).handle(command()).await.unwrap().outcome
    }

    fn metadata(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn gateway_subscription(fx: &Fixture, plan: &Plan) -> GatewaySubscription {
        fx.gateway
            .create_subscription(CreateSubscriptionRequest {
                customer_id: "cus_1".to_string(),
                price_id: plan.gateway_price_id.clone().unwrap(),
                metadata: BTreeMap::new(),
            })
            .await
            .unwrap()
    }

    fn subscription_checkout(plan: &Plan, gateway_sub: &GatewaySubscription) -> WebhookEventKind {
        WebhookEventKind::CheckoutCompleted(CompletedCheckout {
            session_id: "cs_1".to_string(),
            customer_id: Some("cus_1".to_string()),
            subscription_id: Some(gateway_sub.id.clone()),
            payment_intent_id: None,
            amount_total: Some(plan.price.cents()),
            currency: Some("usd".to_string()),
            metadata: metadata(&[
                ("user_id", "alice"),
                ("plan_id", &plan.id.to_string()),
                ("type", "subscription"),
            ]),
        })
    }

    fn post_checkout(intent: &str) -> WebhookEventKind {
        WebhookEventKind::CheckoutCompleted(CompletedCheckout {
            session_id: "cs_2".to_string(),
            customer_id: Some("cus_1".to_string()),
            subscription_id: None,
            payment_intent_id: Some(intent.to_string()),
            amount_total: Some(POST_PRICE_CENTS),
            currency: Some("usd".to_string()),
            metadata: metadata(&[
                ("user_id", "alice"),
                ("type", "one_time_post"),
                ("post_count", "1"),
            ]),
        })
    }

    async fn seed_linked(
        fx: &Fixture,
        plan: &Plan,
        gateway_sub: &GatewaySubscription,
    ) -> Subscription {
        let sub = Subscription::paid(
            user_id("alice"),
            plan.terms(),
            Some("cus_1".to_string()),
            gateway_sub.id.clone(),
            BillingPeriod::default(),
            Timestamp::now(),
        );
        SubscriptionRepository::insert(fx.store.as_ref(), &sub)
            .await
            .unwrap();
        sub
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Verification
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn bad_signature_is_rejected() {
        let fx = Fixture {
            gateway: Arc::new(crate::adapters::stripe::MockPaymentGateway::rejecting_webhooks()),
            ..Fixture::new()
        };

        let err = handler(&fx).handle(command()).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::InvalidWebhook);
    }

    #[tokio::test]
    async fn unrelated_events_are_ignored() {
        let fx = Fixture::new();

        let outcome = deliver(
            &fx,
            WebhookEventKind::Other {
                event_type: "customer.created".to_string(),
            },
        )
        .await;

        assert_eq!(outcome, WebhookOutcome::Ignored);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Checkout
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn subscription_checkout_is_reconciled_once() {
        let fx = Fixture::new();
        let plan = fx.seed_plan("premium", 1999, 20).await;
        let gateway_sub = gateway_subscription(&fx, &plan).await;

        let first = deliver(&fx, subscription_checkout(&plan, &gateway_sub)).await;
        let second = deliver(&fx, subscription_checkout(&plan, &gateway_sub)).await;

        assert!(matches!(first, WebhookOutcome::SubscriptionReconciled(_)));
        assert_eq!(first, second);
        let history = fx.store.history_for_user(&user_id("alice")).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history::resolve_current(&history).unwrap().plan_name(), "premium");
        assert_eq!(fx.store.all_payments().len(), 1);
    }

    #[tokio::test]
    async fn checkout_for_deleted_plan_fails_for_retry() {
        let fx = Fixture::new();
        let plan = fx.seed_plan("premium", 1999, 20).await;
        let gateway_sub = gateway_subscription(&fx, &plan).await;
        let mut kind = subscription_checkout(&plan, &gateway_sub);
        if let WebhookEventKind::CheckoutCompleted(session) = &mut kind {
            session.metadata.insert("plan_id".to_string(), "999".to_string());
        }
        fx.gateway.set_webhook_event(event(kind));

        let err = handler(&fx).handle(command()).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::ReconciliationFailed);
        assert!(!fx.gateway.was_called("delete_subscription"));
    }

    #[tokio::test]
    async fn post_checkout_issues_credit_once() {
        let fx = Fixture::new();

        let first = deliver(&fx, post_checkout("pi_42")).await;
        let second = deliver(&fx, post_checkout("pi_42")).await;

        assert_eq!(first, WebhookOutcome::CreditIssued);
        assert_eq!(second, WebhookOutcome::Duplicate);
        let payments = fx.store.all_payments();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].kind, PaymentKind::OneTime);
        assert_eq!(fx.store.all_credits().len(), 1);
    }

    #[tokio::test]
    async fn checkout_without_user_is_ignored() {
        let fx = Fixture::new();
        let mut kind = post_checkout("pi_1");
        if let WebhookEventKind::CheckoutCompleted(session) = &mut kind {
            session.metadata.remove("user_id");
        }

        assert_eq!(deliver(&fx, kind).await, WebhookOutcome::Ignored);
        assert!(fx.store.all_payments().is_empty());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Invoices and subscription lifecycle
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn renewal_invoice_is_recorded_once() {
        let fx = Fixture::new();
        let plan = fx.seed_plan("premium", 1999, 20).await;
        let gateway_sub = gateway_subscription(&fx, &plan).await;
        let sub = seed_linked(&fx, &plan, &gateway_sub).await;
        let invoice = GatewayInvoice {
            id: "in_renewal".to_string(),
            status: InvoiceStatus::Paid,
            amount_paid: 1999,
            currency: "usd".to_string(),
            subscription_id: Some(gateway_sub.id.clone()),
            payment_intent: None,
        };

        let first = deliver(&fx, WebhookEventKind::InvoicePaid(invoice.clone())).await;
        let second = deliver(&fx, WebhookEventKind::InvoicePaid(invoice)).await;

        assert_eq!(first, WebhookOutcome::PaymentRecorded);
        assert_eq!(second, WebhookOutcome::Duplicate);
        let payments = fx.store.all_payments();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].subscription_id, Some(sub.id));
        assert_eq!(payments[0].invoice_id(), Some("in_renewal"));
    }

    #[tokio::test]
    async fn update_syncs_cancellation_flag() {
        let fx = Fixture::new();
        let plan = fx.seed_plan("premium", 1999, 20).await;
        let mut gateway_sub = gateway_subscription(&fx, &plan).await;
        let sub = seed_linked(&fx, &plan, &gateway_sub).await;
        gateway_sub.cancel_at_period_end = true;

        let outcome = deliver(&fx, WebhookEventKind::SubscriptionUpdated(gateway_sub)).await;

        assert_eq!(outcome, WebhookOutcome::SubscriptionSynced(sub.id));
        let stored = SubscriptionRepository::find_by_id(fx.store.as_ref(), sub.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.cancel_at_period_end);
        assert!(stored.period.end.is_some());
    }

    #[tokio::test]
    async fn deletion_ends_subscription_once() {
        let fx = Fixture::new();
        let plan = fx.seed_plan("premium", 1999, 20).await;
        let gateway_sub = gateway_subscription(&fx, &plan).await;
        let sub = seed_linked(&fx, &plan, &gateway_sub).await;

        let first = deliver(&fx, WebhookEventKind::SubscriptionDeleted(gateway_sub.clone())).await;
        let second = deliver(&fx, WebhookEventKind::SubscriptionDeleted(gateway_sub)).await;

        assert_eq!(first, WebhookOutcome::SubscriptionEnded(sub.id));
        assert_eq!(second, WebhookOutcome::Duplicate);
        let stored = SubscriptionRepository::find_by_id(fx.store.as_ref(), sub.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn ended_subscription_falls_back_to_free_tier_terms() {
        let fx = Fixture::new();
        let alice = user_id("alice");
        let plan = fx.seed_plan("premium", 1999, 20).await;
        let gateway_sub = gateway_subscription(&fx, &plan).await;
        let mut sub = seed_linked(&fx, &plan, &gateway_sub).await;
        sub.posts_used_this_month = 3;
        SubscriptionRepository::update(fx.store.as_ref(), &sub)
            .await
            .unwrap();

        let outcome = deliver(&fx, WebhookEventKind::SubscriptionDeleted(gateway_sub)).await;
        assert_eq!(outcome, WebhookOutcome::SubscriptionEnded(sub.id));

        let check = CheckEntitlementHandler::new(fx.subscriptions(), fx.credits())
            .handle(CheckEntitlementQuery {
                user_id: alice.clone(),
            })
            .await
            .unwrap();
        assert_eq!(check.remaining_posts, RemainingPosts::Limited(1));

        let usage = GetUsageHandler::new(fx.subscriptions(), fx.credits())
            .handle(GetUsageQuery {
                user_id: alice.clone(),
            })
            .await
            .unwrap()
            .usage;
        assert!(!usage.has_subscription);
        assert_eq!(usage.posts_limit, 1);
        assert_eq!(usage.posts_used, 0);

        let history = fx.store.history_for_user(&alice).await.unwrap();
        assert_eq!(history.len(), 2);
        let current = history::resolve_current(&history).unwrap();
        assert!(current.is_free_tier());
        assert_ne!(current.id, sub.id);
        assert_eq!(current.gateway_customer_id.as_deref(), Some("cus_1"));
    }
}
