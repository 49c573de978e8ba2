//! Mock payment gateway for testing.
//!
//! Provides a configurable in-process implementation of `PaymentGateway` for
//! unit and integration tests. Supports:
//! - Deterministic ids (`cus_mock_1`, `sub_mock_2`, ...)
//! - Configurable payment outcomes
//! - Error injection per method
//! - Call tracking

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::domain::foundation::Timestamp;
use crate::ports::{
    CheckoutLineItem, CheckoutSession, CreateCheckoutRequest, CreateCustomerRequest,
    CreatePaymentIntentRequest, CreatePriceRequest, CreateSubscriptionRequest, GatewayCustomer,
    GatewayError, GatewayInvoice, GatewayPaymentIntent, GatewaySubscription,
    GatewaySubscriptionStatus, InvoiceRef, InvoiceStatus, PaymentGateway, PaymentIntentRef,
    PaymentIntentStatus, ProductRequest, WebhookEvent,
};

/// Mock payment gateway for testing.
///
/// # Example
///
/// ```ignore
/// let gateway = MockPaymentGateway::new();
/// gateway.set_payment_status(PaymentIntentStatus::RequiresAction);
/// gateway.set_method_error("create_subscription", GatewayError::network("down"));
///
/// // ... run a handler ...
///
/// assert!(gateway.was_called("delete_subscription"));
/// ```
#[derive(Default)]
pub struct MockPaymentGateway {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    next_id: u64,

    /// price id -> (amount cents, currency)
    prices: HashMap<String, (i64, String)>,
    archived: Vec<String>,
    subscriptions: HashMap<String, GatewaySubscription>,
    invoices: HashMap<String, GatewayInvoice>,

    /// Status given to new payment intents and subscription invoices.
    payment_status: Option<PaymentIntentStatus>,

    /// Return subscription invoices as bare ids instead of expanded objects.
    unexpanded_invoices: bool,

    next_webhook_event: Option<WebhookEvent>,
    reject_webhooks: bool,

    method_errors: HashMap<String, GatewayError>,
    call_log: Vec<MethodCall>,
}

/// Recorded method call for assertions.
#[derive(Debug, Clone)]
pub struct MethodCall {
    pub method: String,
    pub args: Vec<String>,
}

impl MockState {
    fn mint(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_mock_{}", prefix, self.next_id)
    }

    fn status(&self) -> PaymentIntentStatus {
        self.payment_status
            .clone()
            .unwrap_or(PaymentIntentStatus::Succeeded)
    }
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock that fails every webhook verification.
    pub fn rejecting_webhooks() -> Self {
        let mock = Self::new();
        mock.inner.lock().unwrap().reject_webhooks = true;
        mock
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Methods
    // ════════════════════════════════════════════════════════════════════════════

    /// Status of subsequently created payment intents and subscription invoices.
    pub fn set_payment_status(&self, status: PaymentIntentStatus) {
        self.inner.lock().unwrap().payment_status = Some(status);
    }

    /// Subsequent subscriptions carry only the invoice id.
    pub fn return_unexpanded_invoices(&self) {
        self.inner.lock().unwrap().unexpanded_invoices = true;
    }

    /// Registers a subscription the gateway already knows about.
    pub fn add_subscription(&self, subscription: GatewaySubscription) {
        let id = subscription.id.clone();
        self.inner
            .lock()
            .unwrap()
            .subscriptions
            .insert(id, subscription);
    }

    pub fn add_invoice(&self, invoice: GatewayInvoice) {
        let id = invoice.id.clone();
        self.inner.lock().unwrap().invoices.insert(id, invoice);
    }

    /// Event returned by the next successful `verify_webhook`.
    pub fn set_webhook_event(&self, event: WebhookEvent) {
        self.inner.lock().unwrap().next_webhook_event = Some(event);
    }

    /// Fail every call to `method` with `error`.
    pub fn set_method_error(&self, method: &str, error: GatewayError) {
        self.inner
            .lock()
            .unwrap()
            .method_errors
            .insert(method.to_string(), error);
    }

    pub fn clear_errors(&self) {
        self.inner.lock().unwrap().method_errors.clear();
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Inspection
    // ════════════════════════════════════════════════════════════════════════════

    pub fn calls(&self) -> Vec<MethodCall> {
        self.inner.lock().unwrap().call_log.clone()
    }

    pub fn was_called(&self, method: &str) -> bool {
        self.call_count(method) > 0
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .call_log
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// Arguments of every call to `method`, in order.
    pub fn args_of(&self, method: &str) -> Vec<Vec<String>> {
        self.inner
            .lock()
            .unwrap()
            .call_log
            .iter()
            .filter(|c| c.method == method)
            .map(|c| c.args.clone())
            .collect()
    }

    /// Ids passed to `archive_price` and `archive_product`.
    pub fn archived(&self) -> Vec<String> {
        self.inner.lock().unwrap().archived.clone()
    }

    pub fn subscription(&self, id: &str) -> Option<GatewaySubscription> {
        self.inner.lock().unwrap().subscriptions.get(id).cloned()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Internal Helpers
    // ════════════════════════════════════════════════════════════════════════════

    fn record_call(&self, method: &str, args: Vec<String>) -> Result<(), GatewayError> {
        let mut state = self.inner.lock().unwrap();
        state.call_log.push(MethodCall {
            method: method.to_string(),
            args,
        });
        match state.method_errors.get(method) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl Clone for MockPaymentGateway {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<GatewayCustomer, GatewayError> {
        self.record_call(
            "create_customer",
            vec![request.user_id.to_string(), request.email.clone()],
        )?;
        let mut state = self.inner.lock().unwrap();
        Ok(GatewayCustomer {
            id: state.mint("cus"),
            email: Some(request.email),
        })
    }

    async fn create_product(&self, request: ProductRequest) -> Result<String, GatewayError> {
        self.record_call("create_product", vec![request.name, request.description])?;
        Ok(self.inner.lock().unwrap().mint("prod"))
    }

    async fn update_product(
        &self,
        product_id: &str,
        request: ProductRequest,
    ) -> Result<(), GatewayError> {
        self.record_call("update_product", vec![product_id.to_string(), request.name])
    }

    async fn archive_product(&self, product_id: &str) -> Result<(), GatewayError> {
        self.record_call("archive_product", vec![product_id.to_string()])?;
        self.inner
            .lock()
            .unwrap()
            .archived
            .push(product_id.to_string());
        Ok(())
    }

    async fn create_price(&self, request: CreatePriceRequest) -> Result<String, GatewayError> {
        self.record_call(
            "create_price",
            vec![
                request.product_id.clone(),
                request.unit_amount.cents().to_string(),
                request.currency.clone(),
            ],
        )?;
        let mut state = self.inner.lock().unwrap();
        let id = state.mint("price");
        state
            .prices
            .insert(id.clone(), (request.unit_amount.cents(), request.currency));
        Ok(id)
    }

    async fn archive_price(&self, price_id: &str) -> Result<(), GatewayError> {
        self.record_call("archive_price", vec![price_id.to_string()])?;
        self.inner.lock().unwrap().archived.push(price_id.to_string());
        Ok(())
    }

    async fn create_checkout_session(
        &self,
        request: CreateCheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let item = match &request.line_item {
            CheckoutLineItem::Price { price_id, .. } => price_id.clone(),
            CheckoutLineItem::Adhoc {
                name, unit_amount, ..
            } => format!("{}:{}", name, unit_amount.cents()),
        };
        let mut args = vec![
            request.customer_id.clone(),
            format!("{:?}", request.mode),
            item,
        ];
        args.extend(request.metadata.iter().map(|(k, v)| format!("{}={}", k, v)));
        self.record_call("create_checkout_session", args)?;

        let id = self.inner.lock().unwrap().mint("cs");
        Ok(CheckoutSession {
            url: Some(format!("https://checkout.stripe.com/c/pay/{}", id)),
            id,
        })
    }

    async fn attach_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> Result<(), GatewayError> {
        self.record_call(
            "attach_payment_method",
            vec![customer_id.to_string(), payment_method_id.to_string()],
        )
    }

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<GatewaySubscription, GatewayError> {
        self.record_call(
            "create_subscription",
            vec![request.customer_id.clone(), request.price_id.clone()],
        )?;
        let mut state = self.inner.lock().unwrap();

        let (amount, currency) = state
            .prices
            .get(&request.price_id)
            .cloned()
            .unwrap_or((0, "usd".to_string()));
        let status = state.status();
        let intent_id = state.mint("pi");
        let invoice_id = state.mint("in");
        let subscription_id = state.mint("sub");

        let invoice = GatewayInvoice {
            id: invoice_id.clone(),
            status: if status.is_succeeded() {
                InvoiceStatus::Paid
            } else {
                InvoiceStatus::Open
            },
            amount_paid: if status.is_succeeded() { amount } else { 0 },
            currency: currency.clone(),
            subscription_id: Some(subscription_id.clone()),
            payment_intent: Some(PaymentIntentRef::Expanded(Box::new(GatewayPaymentIntent {
                client_secret: Some(format!("{}_secret", intent_id)),
                id: intent_id,
                status,
                amount,
                currency,
                metadata: BTreeMap::new(),
            }))),
        };
        state.invoices.insert(invoice_id.clone(), invoice.clone());

        let now = Timestamp::now();
        let subscription = GatewaySubscription {
            id: subscription_id.clone(),
            customer_id: Some(request.customer_id),
            status: GatewaySubscriptionStatus::Active,
            current_period_start: Some(now.as_unix_secs()),
            current_period_end: Some(now.add_days(30).as_unix_secs()),
            cancel_at_period_end: false,
            metadata: request.metadata,
            latest_invoice: Some(if state.unexpanded_invoices {
                InvoiceRef::Id(invoice_id)
            } else {
                InvoiceRef::Expanded(Box::new(invoice))
            }),
        };
        state
            .subscriptions
            .insert(subscription_id, subscription.clone());
        Ok(subscription)
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, GatewayError> {
        self.record_call("retrieve_subscription", vec![subscription_id.to_string()])?;
        self.inner
            .lock()
            .unwrap()
            .subscriptions
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("Subscription"))
    }

    async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, GatewayError> {
        self.record_call("cancel_at_period_end", vec![subscription_id.to_string()])?;
        let mut state = self.inner.lock().unwrap();
        let subscription = state
            .subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| GatewayError::not_found("Subscription"))?;
        subscription.cancel_at_period_end = true;
        Ok(subscription.clone())
    }

    async fn delete_subscription(&self, subscription_id: &str) -> Result<(), GatewayError> {
        self.record_call("delete_subscription", vec![subscription_id.to_string()])?;
        let mut state = self.inner.lock().unwrap();
        if let Some(subscription) = state.subscriptions.get_mut(subscription_id) {
            subscription.status = GatewaySubscriptionStatus::Canceled;
        }
        Ok(())
    }

    async fn create_payment_intent(
        &self,
        request: CreatePaymentIntentRequest,
    ) -> Result<GatewayPaymentIntent, GatewayError> {
        self.record_call(
            "create_payment_intent",
            vec![
                request.customer_id.clone(),
                request.amount.cents().to_string(),
                request.payment_method_id.clone(),
            ],
        )?;
        let mut state = self.inner.lock().unwrap();
        let id = state.mint("pi");
        Ok(GatewayPaymentIntent {
            client_secret: Some(format!("{}_secret", id)),
            id,
            status: state.status(),
            amount: request.amount.cents(),
            currency: request.currency,
            metadata: request.metadata,
        })
    }

    async fn retrieve_invoice(&self, invoice_id: &str) -> Result<GatewayInvoice, GatewayError> {
        self.record_call("retrieve_invoice", vec![invoice_id.to_string()])?;
        self.inner
            .lock()
            .unwrap()
            .invoices
            .get(invoice_id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("Invoice"))
    }

    async fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookEvent, GatewayError> {
        self.record_call(
            "verify_webhook",
            vec![payload.len().to_string(), signature.to_string()],
        )?;
        let mut state = self.inner.lock().unwrap();
        if state.reject_webhooks {
            return Err(GatewayError::invalid_webhook("Signature mismatch"));
        }
        state
            .next_webhook_event
            .take()
            .ok_or_else(|| GatewayError::invalid_webhook("No webhook event configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{Money, UserId};
    use crate::ports::{CheckoutMode, GatewayErrorKind, RecurringInterval};

    fn customer_request() -> CreateCustomerRequest {
        CreateCustomerRequest {
            user_id: UserId::new("user-1").unwrap(),
            email: "a@example.com".to_string(),
            name: Some("alice".to_string()),
        }
    }

    #[tokio::test]
    async fn ids_are_deterministic() {
        let gateway = MockPaymentGateway::new();
        let first = gateway.create_customer(customer_request()).await.unwrap();
        let second = gateway.create_customer(customer_request()).await.unwrap();
        assert_eq!(first.id, "cus_mock_1");
        assert_eq!(second.id, "cus_mock_2");
    }

    #[tokio::test]
    async fn method_error_is_returned_and_call_recorded() {
        let gateway = MockPaymentGateway::new();
        gateway.set_method_error("create_customer", GatewayError::network("down"));

        let err = gateway.create_customer(customer_request()).await.unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::Network);
        assert!(gateway.was_called("create_customer"));
    }

    #[tokio::test]
    async fn subscription_invoice_uses_price_amount() {
        let gateway = MockPaymentGateway::new();
        let price = gateway
            .create_price(CreatePriceRequest {
                product_id: "prod_1".to_string(),
                unit_amount: Money::from_cents(1299).unwrap(),
                currency: "usd".to_string(),
                recurring: Some(RecurringInterval::Month),
            })
            .await
            .unwrap();

        let sub = gateway
            .create_subscription(CreateSubscriptionRequest {
                customer_id: "cus_1".to_string(),
                price_id: price,
                metadata: BTreeMap::new(),
            })
            .await
            .unwrap();

        match sub.latest_invoice {
            Some(InvoiceRef::Expanded(invoice)) => {
                assert_eq!(invoice.amount_paid, 1299);
                assert!(invoice.settlement_status().is_succeeded());
            }
            other => panic!("expected expanded invoice, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn pending_payment_leaves_invoice_open() {
        let gateway = MockPaymentGateway::new();
        gateway.set_payment_status(PaymentIntentStatus::RequiresAction);
        let sub = gateway
            .create_subscription(CreateSubscriptionRequest {
                customer_id: "cus_1".to_string(),
                price_id: "price_x".to_string(),
                metadata: BTreeMap::new(),
            })
            .await
            .unwrap();
        let invoice_id = sub.latest_invoice.unwrap().id().to_string();
        let invoice = gateway.retrieve_invoice(&invoice_id).await.unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Open);
        assert!(invoice.settlement_status().requires_action());
    }

    #[tokio::test]
    async fn checkout_records_metadata() {
        let gateway = MockPaymentGateway::new();
        let mut metadata = BTreeMap::new();
        metadata.insert("type".to_string(), "subscription".to_string());
        gateway
            .create_checkout_session(CreateCheckoutRequest {
                customer_id: "cus_1".to_string(),
                mode: CheckoutMode::Subscription,
                line_item: CheckoutLineItem::Price {
                    price_id: "price_1".to_string(),
                    quantity: 1,
                },
                success_url: "https://app/ok".to_string(),
                cancel_url: "https://app/cancel".to_string(),
                metadata,
            })
            .await
            .unwrap();
        let args = &gateway.args_of("create_checkout_session")[0];
        assert!(args.contains(&"type=subscription".to_string()));
    }

    #[tokio::test]
    async fn rejecting_webhooks_fails_verification() {
        let gateway = MockPaymentGateway::rejecting_webhooks();
        let err = gateway.verify_webhook(b"{}", "t=1,v1=ab").await.unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::InvalidWebhook);
    }
}
