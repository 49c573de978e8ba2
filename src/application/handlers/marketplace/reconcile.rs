//! Subscription reconciliation.
//!
//! Brings local state in line with a subscription the gateway has already
//! created, from either the embedded confirmation flow or a checkout webhook.
//!
//! # Failure handling
//!
//! The gateway side effect has already happened when reconciliation starts.
//! If the local subscription row cannot be written and no local record links
//! the gateway subscription, it is deleted again so the user is never billed
//! for something the marketplace does not know about. A gateway subscription
//! that some record already links is never deleted: the write is reported as
//! failed and a redelivery retries it. If only the payment row fails, the
//! subscription stays in place and a later `invoice.paid` delivery records
//! the charge.
//!
//! Charges are deduplicated by the payment store's unique keys: the invoice
//! id, or for a list-price charge the gateway subscription and period start.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::foundation::{DomainError, ErrorCode, Money, Timestamp, UserId};
use crate::domain::marketplace::payment::{
    AMOUNT_SOURCE_PLAN_PRICE, META_AMOUNT_SOURCE, META_CREATED_FROM, META_INVOICE_ID,
    META_PERIOD_KEY, META_SUBSCRIPTION_ID,
};
use crate::domain::marketplace::{BillingError, BillingPeriod, Payment, Plan, Subscription};
use crate::ports::{
    GatewayInvoice, GatewaySubscription, InvoiceRef, PaymentGateway, PaymentIntentStatus,
    PaymentRepository, SaveResult, SubscriptionRepository,
};

/// What a subscription charge is priced from.
#[derive(Debug, Clone, Copy)]
pub enum Charge<'a> {
    Invoice(&'a GatewayInvoice),
    /// The invoice was unavailable; the plan's list price stands in.
    ListPrice(Money),
}

/// A gateway subscription to bring into local state.
pub struct ReconcileInput<'a> {
    pub user_id: &'a UserId,
    pub plan: &'a Plan,
    pub customer_id: Option<String>,
    pub gateway_subscription: &'a GatewaySubscription,
    /// Recorded as the payment's `created_from`.
    pub source: &'static str,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub subscription: Subscription,
    pub payment_status: PaymentIntentStatus,
    pub client_secret: Option<String>,
    /// `None` when the charge has not settled and nothing was recorded.
    pub payment: Option<SaveResult>,
}

/// A failed subscription write.
struct PersistFailure {
    error: DomainError,
    /// True only when a lookup confirmed no local record links the gateway
    /// subscription, which is when deleting it is safe.
    unlinked: bool,
}

impl PersistFailure {
    fn keep_gateway(error: DomainError) -> Self {
        Self {
            error,
            unlinked: false,
        }
    }
}

pub struct SubscriptionReconciler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    payments: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
}

impl SubscriptionReconciler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        payments: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            subscriptions,
            payments,
            gateway,
            currency: currency.into(),
        }
    }

    pub async fn reconcile(
        &self,
        input: ReconcileInput<'_>,
        now: Timestamp,
    ) -> Result<Reconciliation, BillingError> {
        let gateway_sub = input.gateway_subscription;

        let subscription = match self.persist_subscription(&input, now).await {
            Ok(subscription) => subscription,
            Err(PersistFailure { error, unlinked }) => {
                if unlinked {
                    tracing::error!(
                        user_id = %input.user_id,
                        gateway_subscription_id = %gateway_sub.id,
                        error = %error,
                        "Failed to persist subscription, cancelling gateway subscription"
                    );
                    self.compensate(&gateway_sub.id).await;
                } else {
                    tracing::error!(
                        user_id = %input.user_id,
                        gateway_subscription_id = %gateway_sub.id,
                        error = %error,
                        "Failed to persist subscription, gateway subscription left in place"
                    );
                }
                return Err(BillingError::reconciliation_failed(
                    input.user_id.clone(),
                    gateway_sub.id.clone(),
                    error.to_string(),
                ));
            }
        };

        let invoice = self.obtain_invoice(gateway_sub).await;
        let payment_status = invoice
            .as_ref()
            .map(GatewayInvoice::settlement_status)
            .unwrap_or(PaymentIntentStatus::Succeeded);
        let client_secret = invoice
            .as_ref()
            .and_then(|i| i.client_secret().map(str::to_string));

        let payment = if payment_status.is_succeeded() {
            let charge = match &invoice {
                Some(invoice) => Charge::Invoice(invoice),
                None => Charge::ListPrice(input.plan.price),
            };
            let saved = self
                .record_charge(&subscription, &gateway_sub.id, charge, input.source, now)
                .await
                .map_err(|err| {
                    tracing::error!(
                        user_id = %input.user_id,
                        subscription_id = %subscription.id,
                        gateway_subscription_id = %gateway_sub.id,
                        error = %err,
                        "Subscription saved but payment could not be recorded"
                    );
                    BillingError::reconciliation_failed(
                        input.user_id.clone(),
                        gateway_sub.id.clone(),
                        err.to_string(),
                    )
                })?;
            Some(saved)
        } else {
            tracing::info!(
                subscription_id = %subscription.id,
                payment_status = payment_status.as_str(),
                "Subscription payment not settled yet"
            );
            None
        };

        Ok(Reconciliation {
            subscription,
            payment_status,
            client_secret,
            payment,
        })
    }

    /// Records a succeeded subscription charge unless it is already known by
    /// intent id, invoice id or period key.
    pub async fn record_charge(
        &self,
        subscription: &Subscription,
        gateway_subscription_id: &str,
        charge: Charge<'_>,
        source: &str,
        now: Timestamp,
    ) -> Result<SaveResult, DomainError> {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            META_SUBSCRIPTION_ID.to_string(),
            gateway_subscription_id.to_string(),
        );
        metadata.insert(META_CREATED_FROM.to_string(), source.to_string());

        let (amount, currency, intent_id) = match charge {
            Charge::Invoice(invoice) => {
                metadata.insert(META_INVOICE_ID.to_string(), invoice.id.clone());
                (
                    Money::from_cents(invoice.amount_paid)?,
                    invoice.currency.clone(),
                    invoice.payment_intent_id().map(str::to_string),
                )
            }
            Charge::ListPrice(price) => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    gateway_subscription_id,
                    "Invoice unavailable, recording plan list price"
                );
                metadata.insert(
                    META_AMOUNT_SOURCE.to_string(),
                    AMOUNT_SOURCE_PLAN_PRICE.to_string(),
                );
                metadata.insert(
                    META_PERIOD_KEY.to_string(),
                    period_key(gateway_subscription_id, subscription.period.start),
                );
                (price, self.currency.clone(), None)
            }
        };

        let payment = Payment::subscription_charge(
            subscription.user_id.clone(),
            subscription.id,
            subscription.plan_display_name(),
            amount,
            currency,
            intent_id,
            metadata,
            now,
        );
        let saved = self.payments.record(&payment).await?;
        if saved == SaveResult::Inserted {
            tracing::info!(
                payment_id = %payment.id,
                subscription_id = %subscription.id,
                amount_cents = payment.amount.cents(),
                "Recorded subscription payment"
            );
        }
        Ok(saved)
    }

    async fn persist_subscription(
        &self,
        input: &ReconcileInput<'_>,
        now: Timestamp,
    ) -> Result<Subscription, PersistFailure> {
        let gateway_sub = input.gateway_subscription;
        let period = tolerant_period(gateway_sub);

        let linked = self
            .subscriptions
            .find_by_gateway_subscription(&gateway_sub.id)
            .await
            .map_err(PersistFailure::keep_gateway)?;

        match linked {
            Some(mut existing) => {
                if &existing.user_id != input.user_id {
                    return Err(PersistFailure::keep_gateway(owner_mismatch(&existing, input)));
                }
                existing.plan = Some(input.plan.terms());
                existing.sync_with_gateway(period, gateway_sub.cancel_at_period_end, now);
                if existing.gateway_customer_id.is_none() {
                    existing.gateway_customer_id = input.customer_id.clone();
                }
                self.subscriptions
                    .update(&existing)
                    .await
                    .map_err(PersistFailure::keep_gateway)?;
                Ok(existing)
            }
            None => self.activate(input, period, now).await,
        }
    }

    async fn activate(
        &self,
        input: &ReconcileInput<'_>,
        period: BillingPeriod,
        now: Timestamp,
    ) -> Result<Subscription, PersistFailure> {
        let gateway_sub = input.gateway_subscription;
        let subscription = Subscription::paid(
            input.user_id.clone(),
            input.plan.terms(),
            input.customer_id.clone(),
            gateway_sub.id.clone(),
            period,
            now,
        );

        let error = match self.subscriptions.supersede_active(&subscription).await {
            Ok(completed) => {
                tracing::info!(
                    user_id = %input.user_id,
                    subscription_id = %subscription.id,
                    plan = %input.plan.name,
                    superseded = completed.len(),
                    "Subscription activated"
                );
                return Ok(subscription);
            }
            Err(error) => error,
        };

        // A concurrent delivery may have recorded the same gateway subscription.
        match self
            .subscriptions
            .find_by_gateway_subscription(&gateway_sub.id)
            .await
        {
            Ok(Some(recorded)) if &recorded.user_id == input.user_id => {
                tracing::info!(
                    user_id = %input.user_id,
                    subscription_id = %recorded.id,
                    gateway_subscription_id = %gateway_sub.id,
                    "Subscription already recorded by a concurrent delivery"
                );
                Ok(recorded)
            }
            Ok(Some(recorded)) => Err(PersistFailure::keep_gateway(owner_mismatch(&recorded, input))),
            Ok(None) => Err(PersistFailure {
                error,
                unlinked: true,
            }),
            Err(_) => Err(PersistFailure::keep_gateway(error)),
        }
    }

    async fn obtain_invoice(&self, gateway_sub: &GatewaySubscription) -> Option<GatewayInvoice> {
        match gateway_sub.latest_invoice.as_ref()? {
            InvoiceRef::Expanded(invoice) => Some(invoice.as_ref().clone()),
            InvoiceRef::Id(id) => match self.gateway.retrieve_invoice(id).await {
                Ok(invoice) => Some(invoice),
                Err(err) => {
                    tracing::warn!(
                        invoice_id = %id,
                        error = %err,
                        "Could not retrieve subscription invoice"
                    );
                    None
                }
            },
        }
    }

    async fn compensate(&self, gateway_subscription_id: &str) {
        if let Err(err) = self.gateway.delete_subscription(gateway_subscription_id).await {
            tracing::error!(
                gateway_subscription_id,
                error = %err,
                "Compensating subscription cancellation failed"
            );
        }
    }
}

fn owner_mismatch(recorded: &Subscription, input: &ReconcileInput<'_>) -> DomainError {
    DomainError::new(
        ErrorCode::Conflict,
        format!(
            "Gateway subscription {} belongs to another user",
            input.gateway_subscription.id
        ),
    )
    .with_detail("subscription_id", recorded.id.to_string())
}

/// Identifies the billing period of a charge recorded without an invoice.
fn period_key(gateway_subscription_id: &str, period_start: Option<Timestamp>) -> String {
    format!(
        "{}:{}",
        gateway_subscription_id,
        period_start.map_or(0, |start| start.as_unix_secs())
    )
}

/// Converts gateway period bounds, leaving unrepresentable values unset.
pub fn tolerant_period(gateway_sub: &GatewaySubscription) -> BillingPeriod {
    let id = gateway_sub.id.as_str();
    BillingPeriod {
        start: convert_bound(id, "current_period_start", gateway_sub.current_period_start),
        end: convert_bound(id, "current_period_end", gateway_sub.current_period_end),
    }
}

fn convert_bound(
    gateway_subscription_id: &str,
    field: &'static str,
    raw: Option<i64>,
) -> Option<Timestamp> {
    let secs = raw?;
    let converted = Timestamp::from_unix_secs(secs);
    if converted.is_none() {
        tracing::warn!(
            gateway_subscription_id,
            field,
            value = secs,
            "Ignoring out-of-range period bound"
        );
    }
    converted
}

#[cfg(test)]
mod tests {
    use super::super::test_fixtures::*;
    use super::*;
    use crate::adapters::memory::{FailurePoint, InMemoryBillingStore};
    use crate::domain::foundation::SubscriptionId;
    use crate::domain::marketplace::SubscriptionStatus;
    use crate::ports::{CreateSubscriptionRequest, GatewaySubscriptionStatus};
    use async_trait::async_trait;

    fn reconciler(fx: &Fixture) -> SubscriptionReconciler {
        SubscriptionReconciler::new(fx.subscriptions(), fx.payments(), fx.payment_gateway(), "usd")
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

    fn input<'a>(
        user: &'a UserId,
        plan: &'a Plan,
        sub: &'a GatewaySubscription,
    ) -> ReconcileInput<'a> {
        ReconcileInput {
            user_id: user,
            plan,
            customer_id: Some("cus_1".to_string()),
            gateway_subscription: sub,
            source: "test",
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Happy path
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn new_subscription_supersedes_and_records_invoice_amount() {
        let fx = Fixture::new();
        let user = user_id("alice");
        let plan = fx.seed_plan("premium", 1999, 10).await;
        let free = Subscription::free_tier(user.clone(), Timestamp::now());
        SubscriptionRepository::insert(fx.store.as_ref(), &free).await.unwrap();
        let gateway_sub = gateway_subscription(&fx, &plan).await;

        let result = reconciler(&fx)
            .reconcile(input(&user, &plan, &gateway_sub), Timestamp::now())
            .await
            .unwrap();

        assert_eq!(result.payment_status, PaymentIntentStatus::Succeeded);
        assert_eq!(result.payment, Some(SaveResult::Inserted));
        assert!(result.subscription.period.start.is_some());

        let history = fx.store.history_for_user(&user).await.unwrap();
        assert_eq!(history.len(), 2);
        let old = history.iter().find(|s| s.id == free.id).unwrap();
        assert_eq!(old.status, SubscriptionStatus::Completed);

        let payments = fx.store.all_payments();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].amount.cents(), 1999);
        assert_eq!(payments[0].subscription_id, Some(result.subscription.id));
        assert!(!payments[0].amount_is_estimated());
        assert!(payments[0].invoice_id().is_some());
    }

    #[tokio::test]
    async fn known_gateway_subscription_is_updated_in_place() {
        let fx = Fixture::new();
        let user = user_id("alice");
        let plan = fx.seed_plan("premium", 1999, 10).await;
        let gateway_sub = gateway_subscription(&fx, &plan).await;
        let reconciler = reconciler(&fx);

        let first = reconciler
            .reconcile(input(&user, &plan, &gateway_sub), Timestamp::now())
            .await
            .unwrap();
        let second = reconciler
            .reconcile(input(&user, &plan, &gateway_sub), Timestamp::now())
            .await
            .unwrap();

        assert_eq!(first.subscription.id, second.subscription.id);
        assert_eq!(second.payment, Some(SaveResult::AlreadyExists));
        assert_eq!(fx.store.history_for_user(&user).await.unwrap().len(), 1);
        assert_eq!(fx.store.all_payments().len(), 1);
    }

    #[tokio::test]
    async fn pending_invoice_records_no_payment() {
        let fx = Fixture::new();
        fx.gateway.set_payment_status(PaymentIntentStatus::RequiresAction);
        let user = user_id("alice");
        let plan = fx.seed_plan("premium", 1999, 10).await;
        let gateway_sub = gateway_subscription(&fx, &plan).await;

        let result = reconciler(&fx)
            .reconcile(input(&user, &plan, &gateway_sub), Timestamp::now())
            .await
            .unwrap();

        assert!(result.payment_status.requires_action());
        assert!(result.client_secret.is_some());
        assert_eq!(result.payment, None);
        assert!(fx.store.all_payments().is_empty());
    }

    #[tokio::test]
    async fn unexpanded_invoice_is_retrieved() {
        let fx = Fixture::new();
        fx.gateway.return_unexpanded_invoices();
        let user = user_id("alice");
        let plan = fx.seed_plan("premium", 1999, 10).await;
        let gateway_sub = gateway_subscription(&fx, &plan).await;

        reconciler(&fx)
            .reconcile(input(&user, &plan, &gateway_sub), Timestamp::now())
            .await
            .unwrap();

        assert!(fx.gateway.was_called("retrieve_invoice"));
        assert_eq!(fx.store.all_payments()[0].amount.cents(), 1999);
    }

    #[tokio::test]
    async fn missing_invoice_falls_back_to_flagged_list_price() {
        let fx = Fixture::new();
        let user = user_id("alice");
        let plan = fx.seed_plan("premium", 1999, 10).await;
        let mut gateway_sub = gateway_subscription(&fx, &plan).await;
        gateway_sub.latest_invoice = None;

        let result = reconciler(&fx)
            .reconcile(input(&user, &plan, &gateway_sub), Timestamp::now())
            .await
            .unwrap();

        assert_eq!(result.payment_status, PaymentIntentStatus::Succeeded);
        let payment = &fx.store.all_payments()[0];
        assert_eq!(payment.amount.cents(), 1999);
        assert!(payment.amount_is_estimated());
        assert_eq!(payment.gateway_payment_intent_id, None);
    }

    #[tokio::test]
    async fn out_of_range_period_is_left_unset() {
        let fx = Fixture::new();
        let user = user_id("alice");
        let plan = fx.seed_plan("premium", 1999, 10).await;
        let mut gateway_sub = gateway_subscription(&fx, &plan).await;
        gateway_sub.current_period_end = Some(i64::MAX);

        let result = reconciler(&fx)
            .reconcile(input(&user, &plan, &gateway_sub), Timestamp::now())
            .await
            .unwrap();

        assert!(result.subscription.period.start.is_some());
        assert_eq!(result.subscription.period.end, None);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Partial failures
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn failed_subscription_write_cancels_gateway_subscription() {
        let fx = Fixture::new();
        let user = user_id("alice");
        let plan = fx.seed_plan("premium", 1999, 10).await;
        let gateway_sub = gateway_subscription(&fx, &plan).await;
        fx.store.fail_on(FailurePoint::SupersedeActive);

        let err = reconciler(&fx)
            .reconcile(input(&user, &plan, &gateway_sub), Timestamp::now())
            .await
            .unwrap_err();

        match err {
            BillingError::ReconciliationFailed {
                gateway_reference, ..
            } => assert_eq!(gateway_reference, gateway_sub.id),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(
            fx.gateway.args_of("delete_subscription"),
            vec![vec![gateway_sub.id.clone()]]
        );
        assert_eq!(
            fx.gateway.subscription(&gateway_sub.id).unwrap().status,
            GatewaySubscriptionStatus::Canceled
        );
        assert!(fx.store.history_for_user(&user).await.unwrap().is_empty());
        assert!(fx.store.all_payments().is_empty());
    }

    #[tokio::test]
    async fn failed_payment_write_keeps_subscription() {
        let fx = Fixture::new();
        let user = user_id("alice");
        let plan = fx.seed_plan("premium", 1999, 10).await;
        let gateway_sub = gateway_subscription(&fx, &plan).await;
        fx.store.fail_on(FailurePoint::RecordPayment);

        let err = reconciler(&fx)
            .reconcile(input(&user, &plan, &gateway_sub), Timestamp::now())
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::ReconciliationFailed { .. }));
        assert!(!fx.gateway.was_called("delete_subscription"));
        let history = fx.store.history_for_user(&user).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].status.is_active());
    }

    #[tokio::test]
    async fn missing_invoice_charge_is_recorded_once() {
        let fx = Fixture::new();
        let user = user_id("alice");
        let plan = fx.seed_plan("premium", 1999, 10).await;
        let mut gateway_sub = gateway_subscription(&fx, &plan).await;
        gateway_sub.latest_invoice = None;
        let reconciler = reconciler(&fx);

        let first = reconciler
            .reconcile(input(&user, &plan, &gateway_sub), Timestamp::now())
            .await
            .unwrap();
        let second = reconciler
            .reconcile(input(&user, &plan, &gateway_sub), Timestamp::now())
            .await
            .unwrap();

        assert_eq!(first.payment, Some(SaveResult::Inserted));
        assert_eq!(second.payment, Some(SaveResult::AlreadyExists));
        let payments = fx.store.all_payments();
        assert_eq!(payments.len(), 1);
        let start = gateway_sub.current_period_start.unwrap();
        assert_eq!(
            payments[0].period_key(),
            Some(format!("{}:{}", gateway_sub.id, start).as_str())
        );
    }

    #[tokio::test]
    async fn failed_update_of_known_subscription_keeps_gateway_subscription() {
        let fx = Fixture::new();
        let user = user_id("alice");
        let plan = fx.seed_plan("premium", 1999, 10).await;
        let gateway_sub = gateway_subscription(&fx, &plan).await;
        let reconciler = reconciler(&fx);
        let first = reconciler
            .reconcile(input(&user, &plan, &gateway_sub), Timestamp::now())
            .await
            .unwrap();
        fx.store.fail_on(FailurePoint::UpdateSubscription);

        let err = reconciler
            .reconcile(input(&user, &plan, &gateway_sub), Timestamp::now())
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::ReconciliationFailed { .. }));
        assert!(!fx.gateway.was_called("delete_subscription"));
        assert_eq!(
            fx.gateway.subscription(&gateway_sub.id).unwrap().status,
            GatewaySubscriptionStatus::Active
        );
        let stored = SubscriptionRepository::find_by_id(fx.store.as_ref(), first.subscription.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.status.is_active());
    }

    #[tokio::test]
    async fn gateway_subscription_of_another_user_is_refused() {
        let fx = Fixture::new();
        let alice = user_id("alice");
        let bob = user_id("bob");
        let plan = fx.seed_plan("premium", 1999, 10).await;
        let gateway_sub = gateway_subscription(&fx, &plan).await;
        let reconciler = reconciler(&fx);
        let owned = reconciler
            .reconcile(input(&alice, &plan, &gateway_sub), Timestamp::now())
            .await
            .unwrap();

        let err = reconciler
            .reconcile(input(&bob, &plan, &gateway_sub), Timestamp::now())
            .await
            .unwrap_err();

        match err {
            BillingError::ReconciliationFailed { user_id, .. } => assert_eq!(user_id, bob),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!fx.gateway.was_called("delete_subscription"));
        assert!(fx.store.history_for_user(&bob).await.unwrap().is_empty());
        let history = fx.store.history_for_user(&alice).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, owned.subscription.id);
        assert!(history[0].status.is_active());
        assert_eq!(fx.store.all_payments().len(), 1);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Concurrent deliveries
    // ════════════════════════════════════════════════════════════════════════════

    /// Lets a rival delivery record the same gateway subscription first, then
    /// fails the way the one-active-per-user constraint would.
    struct RivalRecordsFirst {
        store: Arc<InMemoryBillingStore>,
    }

    #[async_trait]
    impl SubscriptionRepository for RivalRecordsFirst {
        async fn history_for_user(&self, user_id: &UserId) -> Result<Vec<Subscription>, DomainError> {
            self.store.history_for_user(user_id).await
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
            let mut rival = subscription.clone();
            rival.id = SubscriptionId::new();
            self.store.supersede_active(&rival).await?;
            Err(DomainError::new(
                ErrorCode::Conflict,
                format!("User {} already has an active subscription", subscription.user_id),
            ))
        }
    }

    #[tokio::test]
    async fn subscription_recorded_concurrently_is_kept() {
        let fx = Fixture::new();
        let user = user_id("alice");
        let plan = fx.seed_plan("premium", 1999, 10).await;
        let gateway_sub = gateway_subscription(&fx, &plan).await;
        let reconciler = SubscriptionReconciler::new(
            Arc::new(RivalRecordsFirst {
                store: fx.store.clone(),
            }),
            fx.payments(),
            fx.payment_gateway(),
            "usd",
        );

        let result = reconciler
            .reconcile(input(&user, &plan, &gateway_sub), Timestamp::now())
            .await
            .unwrap();

        assert!(!fx.gateway.was_called("delete_subscription"));
        assert_eq!(
            fx.gateway.subscription(&gateway_sub.id).unwrap().status,
            GatewaySubscriptionStatus::Active
        );
        let history = fx.store.history_for_user(&user).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, result.subscription.id);
        assert!(history[0].status.is_active());
        assert_eq!(result.payment, Some(SaveResult::Inserted));
    }

    #[test]
    fn tolerant_period_keeps_valid_bounds() {
        let sub = GatewaySubscription {
            id: "sub_1".to_string(),
            customer_id: None,
            status: GatewaySubscriptionStatus::Active,
            current_period_start: Some(1_700_000_000),
            current_period_end: None,
            cancel_at_period_end: false,
            metadata: BTreeMap::new(),
            latest_invoice: None,
        };
        let period = tolerant_period(&sub);
        assert_eq!(period.start.map(|t| t.as_unix_secs()), Some(1_700_000_000));
        assert_eq!(period.end, None);
    }
}
