//! Stripe payment gateway adapter.
//!
//! Implements the `PaymentGateway` port against the Stripe REST API using
//! form-encoded requests. Covers customers, catalog products and prices,
//! checkout sessions, subscriptions, payment intents, invoices and webhook
//! verification.
//!
//! # Security
//!
//! - HMAC-SHA256 signature verification with constant-time comparison
//! - Timestamp validation (5-minute window) for replay attack prevention
//! - Secrets handled via `secrecy::SecretString`
//!
//! # Configuration
//!
//! ```ignore
//! let config = StripeConfig::new(api_key, webhook_secret);
//! let gateway = StripeGateway::new(config);
//! ```

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;

use crate::config::PaymentConfig;
use crate::ports::{
    CheckoutLineItem, CheckoutMode, CheckoutSession, CreateCheckoutRequest, CreateCustomerRequest,
    CreatePaymentIntentRequest, CreatePriceRequest, CreateSubscriptionRequest, GatewayCustomer,
    GatewayError, GatewayInvoice, GatewayPaymentIntent, GatewaySubscription, PaymentGateway,
    ProductRequest, RecurringInterval, WebhookEvent, WebhookEventKind,
};

use super::api_types::{
    api_error, SignatureHeader, StripeCheckoutSession, StripeCustomer, StripeInvoice,
    StripeObjectId, StripePaymentIntent, StripeSubscription, StripeWebhookEvent,
};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age for webhook events (5 minutes).
const MAX_TIMESTAMP_AGE_SECS: i64 = 300;

/// Clock skew tolerance for future timestamps (60 seconds).
const MAX_FUTURE_TOLERANCE_SECS: i64 = 60;

const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";

type FormParams = Vec<(String, String)>;

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Stripe secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Webhook signing secret (whsec_...).
    webhook_secret: SecretString,

    /// Base URL for Stripe API (default: https://api.stripe.com).
    api_base_url: String,

    /// Reject test-mode webhook events.
    require_livemode: bool,
}

impl StripeConfig {
    pub fn new(api_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
            webhook_secret: SecretString::new(webhook_secret.into()),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            require_livemode: false,
        }
    }

    /// Builds the adapter configuration from the application's payment section.
    pub fn from_payment_config(config: &PaymentConfig) -> Self {
        Self::new(
            config.stripe_api_key.clone(),
            config.stripe_webhook_secret.clone(),
        )
        .with_require_livemode(config.require_livemode)
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_require_livemode(mut self, require: bool) -> Self {
        self.require_livemode = require;
        self
    }
}

/// Stripe implementation of [`PaymentGateway`].
pub struct StripeGateway {
    config: StripeConfig,
    http_client: reqwest::Client,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.api_base_url, path)
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
        params: &FormParams,
    ) -> Result<T, GatewayError> {
        let response = self
            .http_client
            .post(self.url(path))
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .form(params)
            .send()
            .await
            .map_err(|e| GatewayError::network(e.to_string()))?;
        Self::read_response(operation, response).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, GatewayError> {
        let response = self
            .http_client
            .get(self.url(path))
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .query(query)
            .send()
            .await
            .map_err(|e| GatewayError::network(e.to_string()))?;
        Self::read_response(operation, response).await
    }

    async fn read_response<T: DeserializeOwned>(
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let error = api_error(status.as_u16(), &error_text);
            tracing::error!(
                operation,
                status = status.as_u16(),
                kind = %error.kind,
                provider_code = ?error.provider_code,
                "Stripe request failed"
            );
            return Err(error);
        }

        response.json().await.map_err(|e| {
            GatewayError::provider(format!("Failed to parse Stripe {} response: {}", operation, e))
        })
    }

    /// Verify webhook signature using HMAC-SHA256.
    ///
    /// Any `v1` signature in the header may match.
    fn verify_signature(&self, payload: &[u8], header: &SignatureHeader) -> Result<(), GatewayError> {
        let now = chrono::Utc::now().timestamp();
        let age = now - header.timestamp;

        if age > MAX_TIMESTAMP_AGE_SECS {
            tracing::warn!(
                event_timestamp = header.timestamp,
                current_time = now,
                age_secs = age,
                "Webhook event too old - possible replay attack"
            );
            return Err(GatewayError::invalid_webhook(format!(
                "Event too old ({} seconds)",
                age
            )));
        }

        if age < -MAX_FUTURE_TOLERANCE_SECS {
            tracing::warn!(
                event_timestamp = header.timestamp,
                current_time = now,
                "Webhook event from future - clock skew or manipulation"
            );
            return Err(GatewayError::invalid_webhook("Event timestamp in future"));
        }

        let mut mac =
            HmacSha256::new_from_slice(self.config.webhook_secret.expose_secret().as_bytes())
                .map_err(|e| GatewayError::invalid_webhook(format!("Unusable signing secret: {}", e)))?;
        mac.update(header.timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = mac.finalize().into_bytes();
        let expected_bytes: &[u8] = expected.as_slice();

        let matched = header
            .v1_signatures
            .iter()
            .any(|provided| expected_bytes.ct_eq(provided.as_slice()).unwrap_u8() == 1);

        if !matched {
            tracing::warn!(
                candidates = header.v1_signatures.len(),
                "Invalid webhook signature"
            );
            return Err(GatewayError::invalid_webhook("Invalid signature"));
        }

        Ok(())
    }

    /// Parse a verified payload into a gateway event.
    fn parse_event(&self, payload: &[u8]) -> Result<WebhookEvent, GatewayError> {
        let stripe_event: StripeWebhookEvent = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse webhook payload");
            GatewayError::invalid_webhook(format!("Invalid JSON: {}", e))
        })?;

        if self.config.require_livemode && !stripe_event.livemode {
            tracing::warn!(
                event_id = %stripe_event.id,
                "Rejected test mode event in production"
            );
            return Err(GatewayError::invalid_webhook(
                "Test mode events not allowed in production",
            ));
        }

        let object = stripe_event.data.object;
        let kind = match stripe_event.event_type.as_str() {
            "checkout.session.completed" => WebhookEventKind::CheckoutCompleted(
                decode_object::<StripeCheckoutSession>("checkout session", object)?.into(),
            ),
            "invoice.paid" => WebhookEventKind::InvoicePaid(
                decode_object::<StripeInvoice>("invoice", object)?.into(),
            ),
            "customer.subscription.updated" => WebhookEventKind::SubscriptionUpdated(
                decode_object::<StripeSubscription>("subscription", object)?.into(),
            ),
            "customer.subscription.deleted" => WebhookEventKind::SubscriptionDeleted(
                decode_object::<StripeSubscription>("subscription", object)?.into(),
            ),
            other => WebhookEventKind::Other {
                event_type: other.to_string(),
            },
        };

        Ok(WebhookEvent {
            id: stripe_event.id,
            created: stripe_event.created,
            kind,
        })
    }
}

fn decode_object<T: DeserializeOwned>(
    what: &str,
    object: serde_json::Value,
) -> Result<T, GatewayError> {
    serde_json::from_value(object)
        .map_err(|e| GatewayError::invalid_webhook(format!("Invalid {}: {}", what, e)))
}

fn push_metadata(params: &mut FormParams, prefix: &str, metadata: &BTreeMap<String, String>) {
    for (key, value) in metadata {
        params.push((format!("{}[{}]", prefix, key), value.clone()));
    }
}

fn product_params(request: &ProductRequest) -> FormParams {
    let mut params = vec![
        ("name".to_string(), request.name.clone()),
        ("description".to_string(), request.description.clone()),
    ];
    push_metadata(&mut params, "metadata", &request.metadata);
    params
}

fn checkout_params(request: &CreateCheckoutRequest) -> FormParams {
    let mode = match request.mode {
        CheckoutMode::Subscription => "subscription",
        CheckoutMode::Payment => "payment",
    };
    let mut params = vec![
        ("mode".to_string(), mode.to_string()),
        ("customer".to_string(), request.customer_id.clone()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
    ];

    match &request.line_item {
        CheckoutLineItem::Price { price_id, quantity } => {
            params.push(("line_items[0][price]".to_string(), price_id.clone()));
            params.push(("line_items[0][quantity]".to_string(), quantity.to_string()));
        }
        CheckoutLineItem::Adhoc {
            name,
            unit_amount,
            currency,
            quantity,
        } => {
            params.push((
                "line_items[0][price_data][currency]".to_string(),
                currency.clone(),
            ));
            params.push((
                "line_items[0][price_data][unit_amount]".to_string(),
                unit_amount.cents().to_string(),
            ));
            params.push((
                "line_items[0][price_data][product_data][name]".to_string(),
                name.clone(),
            ));
            params.push(("line_items[0][quantity]".to_string(), quantity.to_string()));
        }
    }

    push_metadata(&mut params, "metadata", &request.metadata);
    if request.mode == CheckoutMode::Subscription {
        // Copied onto the subscription so later webhooks can be attributed.
        push_metadata(&mut params, "subscription_data[metadata]", &request.metadata);
    } else {
        push_metadata(&mut params, "payment_intent_data[metadata]", &request.metadata);
    }
    params
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<GatewayCustomer, GatewayError> {
        let mut params = vec![
            ("email".to_string(), request.email.clone()),
            ("metadata[user_id]".to_string(), request.user_id.to_string()),
        ];
        if let Some(name) = &request.name {
            params.push(("name".to_string(), name.clone()));
        }

        let customer: StripeCustomer = self
            .post_form("create_customer", "customers", &params)
            .await?;
        Ok(GatewayCustomer {
            id: customer.id,
            email: customer.email.or(Some(request.email)),
        })
    }

    async fn create_product(&self, request: ProductRequest) -> Result<String, GatewayError> {
        let product: StripeObjectId = self
            .post_form("create_product", "products", &product_params(&request))
            .await?;
        Ok(product.id)
    }

    async fn update_product(
        &self,
        product_id: &str,
        request: ProductRequest,
    ) -> Result<(), GatewayError> {
        let _: StripeObjectId = self
            .post_form(
                "update_product",
                &format!("products/{}", product_id),
                &product_params(&request),
            )
            .await?;
        Ok(())
    }

    async fn archive_product(&self, product_id: &str) -> Result<(), GatewayError> {
        let params = vec![("active".to_string(), "false".to_string())];
        let _: StripeObjectId = self
            .post_form("archive_product", &format!("products/{}", product_id), &params)
            .await?;
        Ok(())
    }

    async fn create_price(&self, request: CreatePriceRequest) -> Result<String, GatewayError> {
        let mut params = vec![
            ("product".to_string(), request.product_id.clone()),
            ("unit_amount".to_string(), request.unit_amount.cents().to_string()),
            ("currency".to_string(), request.currency.clone()),
        ];
        if let Some(RecurringInterval::Month) = request.recurring {
            params.push(("recurring[interval]".to_string(), "month".to_string()));
        }

        let price: StripeObjectId = self.post_form("create_price", "prices", &params).await?;
        Ok(price.id)
    }

    async fn archive_price(&self, price_id: &str) -> Result<(), GatewayError> {
        let params = vec![("active".to_string(), "false".to_string())];
        let _: StripeObjectId = self
            .post_form("archive_price", &format!("prices/{}", price_id), &params)
            .await?;
        Ok(())
    }

    async fn create_checkout_session(
        &self,
        request: CreateCheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let session: StripeCheckoutSession = self
            .post_form(
                "create_checkout_session",
                "checkout/sessions",
                &checkout_params(&request),
            )
            .await?;
        Ok(CheckoutSession {
            id: session.id,
            url: session.url,
        })
    }

    async fn attach_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> Result<(), GatewayError> {
        let attach = vec![("customer".to_string(), customer_id.to_string())];
        let _: StripeObjectId = self
            .post_form(
                "attach_payment_method",
                &format!("payment_methods/{}/attach", payment_method_id),
                &attach,
            )
            .await?;

        let default_method = vec![(
            "invoice_settings[default_payment_method]".to_string(),
            payment_method_id.to_string(),
        )];
        let _: StripeObjectId = self
            .post_form(
                "set_default_payment_method",
                &format!("customers/{}", customer_id),
                &default_method,
            )
            .await?;
        Ok(())
    }

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<GatewaySubscription, GatewayError> {
        let mut params = vec![
            ("customer".to_string(), request.customer_id.clone()),
            ("items[0][price]".to_string(), request.price_id.clone()),
            (
                "payment_behavior".to_string(),
                "default_incomplete".to_string(),
            ),
            (
                "payment_settings[save_default_payment_method]".to_string(),
                "on_subscription".to_string(),
            ),
            (
                "expand[]".to_string(),
                "latest_invoice.payment_intent".to_string(),
            ),
        ];
        push_metadata(&mut params, "metadata", &request.metadata);

        let sub: StripeSubscription = self
            .post_form("create_subscription", "subscriptions", &params)
            .await?;
        Ok(sub.into())
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, GatewayError> {
        let sub: StripeSubscription = self
            .get_json(
                "retrieve_subscription",
                &format!("subscriptions/{}", subscription_id),
                &[("expand[]", "latest_invoice.payment_intent")],
            )
            .await?;
        Ok(sub.into())
    }

    async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, GatewayError> {
        let params = vec![("cancel_at_period_end".to_string(), "true".to_string())];
        let sub: StripeSubscription = self
            .post_form(
                "cancel_at_period_end",
                &format!("subscriptions/{}", subscription_id),
                &params,
            )
            .await?;
        Ok(sub.into())
    }

    async fn delete_subscription(&self, subscription_id: &str) -> Result<(), GatewayError> {
        let response = self
            .http_client
            .delete(self.url(&format!("subscriptions/{}", subscription_id)))
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .send()
            .await
            .map_err(|e| GatewayError::network(e.to_string()))?;
        let _: StripeObjectId = Self::read_response("delete_subscription", response).await?;
        Ok(())
    }

    async fn create_payment_intent(
        &self,
        request: CreatePaymentIntentRequest,
    ) -> Result<GatewayPaymentIntent, GatewayError> {
        let mut params = vec![
            ("amount".to_string(), request.amount.cents().to_string()),
            ("currency".to_string(), request.currency.clone()),
            ("customer".to_string(), request.customer_id.clone()),
            ("payment_method".to_string(), request.payment_method_id.clone()),
            ("confirm".to_string(), "true".to_string()),
        ];
        match &request.return_url {
            Some(url) => params.push(("return_url".to_string(), url.clone())),
            None => {
                params.push((
                    "automatic_payment_methods[enabled]".to_string(),
                    "true".to_string(),
                ));
                params.push((
                    "automatic_payment_methods[allow_redirects]".to_string(),
                    "never".to_string(),
                ));
            }
        }
        push_metadata(&mut params, "metadata", &request.metadata);

        let intent: StripePaymentIntent = self
            .post_form("create_payment_intent", "payment_intents", &params)
            .await?;
        Ok(intent.into())
    }

    async fn retrieve_invoice(&self, invoice_id: &str) -> Result<GatewayInvoice, GatewayError> {
        let invoice: StripeInvoice = self
            .get_json(
                "retrieve_invoice",
                &format!("invoices/{}", invoice_id),
                &[("expand[]", "payment_intent")],
            )
            .await?;
        Ok(invoice.into())
    }

    async fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookEvent, GatewayError> {
        let header = SignatureHeader::parse(signature).map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse Stripe-Signature header");
            GatewayError::invalid_webhook(e.to_string())
        })?;

        self.verify_signature(payload, &header)?;
        let event = self.parse_event(payload)?;

        tracing::info!(event_id = %event.id, "Webhook signature verified");

        Ok(event)
    }
}
