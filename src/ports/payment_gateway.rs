//! Payment gateway port for external payment processing.
//!
//! Defines the contract for the payment provider integration (Stripe).
//! Provider payloads are converted into the strongly typed records below at
//! the adapter boundary. Loosely shaped provider fields (an invoice that may
//! be an id or an expanded object, optional periods) are modeled explicitly
//! so nothing provider-specific leaks into the application layer.

use crate::domain::foundation::{Money, UserId};
use crate::domain::marketplace::BillingError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Port for the external payment provider.
///
/// Calls are not retried by the core; each error is reported to the caller.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Registers a customer and returns the provider's customer id.
    async fn create_customer(&self, request: CreateCustomerRequest)
        -> Result<GatewayCustomer, GatewayError>;

    /// Creates a product and returns its id.
    async fn create_product(&self, request: ProductRequest) -> Result<String, GatewayError>;

    /// Updates a product's display metadata.
    async fn update_product(&self, product_id: &str, request: ProductRequest)
        -> Result<(), GatewayError>;

    /// Deactivates a product.
    async fn archive_product(&self, product_id: &str) -> Result<(), GatewayError>;

    /// Creates an immutable price object and returns its id.
    async fn create_price(&self, request: CreatePriceRequest) -> Result<String, GatewayError>;

    /// Deactivates a price.
    async fn archive_price(&self, price_id: &str) -> Result<(), GatewayError>;

    /// Creates a hosted checkout session.
    async fn create_checkout_session(
        &self,
        request: CreateCheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError>;

    /// Attaches a payment method to a customer and makes it the invoice default.
    async fn attach_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> Result<(), GatewayError>;

    /// Creates a subscription with the latest invoice expanded.
    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<GatewaySubscription, GatewayError>;

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, GatewayError>;

    /// Flags a subscription to end when the current period ends.
    async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, GatewayError>;

    /// Cancels a subscription immediately.
    async fn delete_subscription(&self, subscription_id: &str) -> Result<(), GatewayError>;

    async fn create_payment_intent(
        &self,
        request: CreatePaymentIntentRequest,
    ) -> Result<GatewayPaymentIntent, GatewayError>;

    async fn retrieve_invoice(&self, invoice_id: &str) -> Result<GatewayInvoice, GatewayError>;

    /// Verifies a webhook signature and parses the event.
    async fn verify_webhook(&self, payload: &[u8], signature: &str)
        -> Result<WebhookEvent, GatewayError>;
}

// ════════════════════════════════════════════════════════════════════════════
// Requests
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCustomerRequest {
    /// Stored as customer metadata.
    pub user_id: UserId,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRequest {
    pub name: String,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
}

impl ProductRequest {
    /// Product payload for a catalog plan.
    pub fn for_plan(plan_name: &str, display_name: &str) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("plan_name".to_string(), plan_name.to_string());
        Self {
            name: display_name.to_string(),
            description: format!("{} subscription plan", display_name),
            metadata,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurringInterval {
    Month,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePriceRequest {
    pub product_id: String,
    pub unit_amount: Money,
    pub currency: String,
    /// `None` for one-off prices.
    pub recurring: Option<RecurringInterval>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    Subscription,
    Payment,
}

/// What a checkout session sells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckoutLineItem {
    /// A catalog price registered with the provider.
    Price { price_id: String, quantity: u32 },

    /// An inline price created for this session only.
    Adhoc {
        name: String,
        unit_amount: Money,
        currency: String,
        quantity: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCheckoutRequest {
    pub customer_id: String,
    pub mode: CheckoutMode,
    pub line_item: CheckoutLineItem,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub customer_id: String,
    pub price_id: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePaymentIntentRequest {
    pub customer_id: String,
    pub amount: Money,
    pub currency: String,
    pub payment_method_id: String,
    /// Where the provider sends the user after an authentication challenge.
    pub return_url: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

// ════════════════════════════════════════════════════════════════════════════
// Responses
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCustomer {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// Hosted page; absent once the session is complete.
    pub url: Option<String>,
}

/// Subscription status as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewaySubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Unpaid,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Paused,
    Other(String),
}

impl GatewaySubscriptionStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            "unpaid" => Self::Unpaid,
            "canceled" => Self::Canceled,
            "incomplete" => Self::Incomplete,
            "incomplete_expired" => Self::IncompleteExpired,
            "paused" => Self::Paused,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySubscription {
    pub id: String,
    pub customer_id: Option<String>,
    pub status: GatewaySubscriptionStatus,
    /// Unix seconds; either may be missing on incomplete subscriptions.
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub cancel_at_period_end: bool,
    pub metadata: BTreeMap<String, String>,
    pub latest_invoice: Option<InvoiceRef>,
}

/// An invoice reference that may or may not have been expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InvoiceRef {
    Id(String),
    Expanded(Box<GatewayInvoice>),
}

impl InvoiceRef {
    pub fn id(&self) -> &str {
        match self {
            InvoiceRef::Id(id) => id,
            InvoiceRef::Expanded(invoice) => &invoice.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    Paid,
    Uncollectible,
    Void,
    Other(String),
}

impl InvoiceStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "draft" => Self::Draft,
            "open" => Self::Open,
            "paid" => Self::Paid,
            "uncollectible" => Self::Uncollectible,
            "void" => Self::Void,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayInvoice {
    pub id: String,
    pub status: InvoiceStatus,
    /// Minor units.
    pub amount_paid: i64,
    pub currency: String,
    pub subscription_id: Option<String>,
    pub payment_intent: Option<PaymentIntentRef>,
}

impl GatewayInvoice {
    /// Settlement state of the invoice's charge.
    ///
    /// The payment intent's own status when it is known; otherwise draft and
    /// open invoices are still processing and anything else counts as settled.
    pub fn settlement_status(&self) -> PaymentIntentStatus {
        if let Some(PaymentIntentRef::Expanded(intent)) = &self.payment_intent {
            return intent.status.clone();
        }
        match self.status {
            InvoiceStatus::Draft | InvoiceStatus::Open => PaymentIntentStatus::Processing,
            _ => PaymentIntentStatus::Succeeded,
        }
    }

    pub fn payment_intent_id(&self) -> Option<&str> {
        self.payment_intent.as_ref().map(PaymentIntentRef::id)
    }

    pub fn client_secret(&self) -> Option<&str> {
        match &self.payment_intent {
            Some(PaymentIntentRef::Expanded(intent)) => intent.client_secret.as_deref(),
            _ => None,
        }
    }
}

/// A payment intent reference that may or may not have been expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PaymentIntentRef {
    Id(String),
    Expanded(Box<GatewayPaymentIntent>),
}

impl PaymentIntentRef {
    pub fn id(&self) -> &str {
        match self {
            PaymentIntentRef::Id(id) => id,
            PaymentIntentRef::Expanded(intent) => &intent.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    Succeeded,
    Processing,
    RequiresAction,
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresCapture,
    Canceled,
    Other(String),
}

impl PaymentIntentStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "succeeded" => Self::Succeeded,
            "processing" => Self::Processing,
            "requires_action" => Self::RequiresAction,
            "requires_payment_method" => Self::RequiresPaymentMethod,
            "requires_confirmation" => Self::RequiresConfirmation,
            "requires_capture" => Self::RequiresCapture,
            "canceled" => Self::Canceled,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Processing => "processing",
            Self::RequiresAction => "requires_action",
            Self::RequiresPaymentMethod => "requires_payment_method",
            Self::RequiresConfirmation => "requires_confirmation",
            Self::RequiresCapture => "requires_capture",
            Self::Canceled => "canceled",
            Self::Other(s) => s,
        }
    }

    /// The customer has to do something before the charge can settle.
    pub fn requires_action(&self) -> bool {
        matches!(self, Self::RequiresAction | Self::RequiresPaymentMethod)
    }

    pub fn is_succeeded(&self) -> bool {
        *self == Self::Succeeded
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayPaymentIntent {
    pub id: String,
    pub status: PaymentIntentStatus,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
    pub client_secret: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

// ════════════════════════════════════════════════════════════════════════════
// Webhooks
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    /// Unix seconds.
    pub created: i64,
    pub kind: WebhookEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookEventKind {
    CheckoutCompleted(CompletedCheckout),
    InvoicePaid(GatewayInvoice),
    SubscriptionUpdated(GatewaySubscription),
    SubscriptionDeleted(GatewaySubscription),
    Other { event_type: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedCheckout {
    pub session_id: String,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

// ════════════════════════════════════════════════════════════════════════════
// Errors
// ════════════════════════════════════════════════════════════════════════════

/// Errors from gateway operations.
///
/// `message` may include provider detail and is meant for logs; conversion
/// into [`BillingError`] keeps only a short user-safe description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
    /// Provider's error code (if available).
    pub provider_code: Option<String>,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider_code: None,
        }
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Network, message)
    }

    pub fn card_declined(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::CardDeclined, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::InvalidRequest, message)
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(GatewayErrorKind::NotFound, format!("{} not found", resource))
    }

    pub fn invalid_webhook(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::InvalidWebhook, message)
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Provider, message)
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for GatewayError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorKind {
    Network,
    Authentication,
    CardDeclined,
    InvalidRequest,
    NotFound,
    RateLimited,
    InvalidWebhook,
    Provider,
}

impl std::fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GatewayErrorKind::Network => "network_error",
            GatewayErrorKind::Authentication => "authentication_error",
            GatewayErrorKind::CardDeclined => "card_declined",
            GatewayErrorKind::InvalidRequest => "invalid_request",
            GatewayErrorKind::NotFound => "not_found",
            GatewayErrorKind::RateLimited => "rate_limited",
            GatewayErrorKind::InvalidWebhook => "invalid_webhook",
            GatewayErrorKind::Provider => "provider_error",
        };
        write!(f, "{}", s)
    }
}

impl From<GatewayError> for BillingError {
    fn from(err: GatewayError) -> Self {
        match err.kind {
            // Card decline messages are written by the provider for end users.
            GatewayErrorKind::CardDeclined => BillingError::PaymentDeclined(err.message),
            GatewayErrorKind::InvalidRequest | GatewayErrorKind::NotFound => {
                BillingError::PaymentDeclined("The payment request was rejected".to_string())
            }
            GatewayErrorKind::InvalidWebhook => {
                BillingError::InvalidWebhook("signature verification failed".to_string())
            }
            GatewayErrorKind::Network
            | GatewayErrorKind::Authentication
            | GatewayErrorKind::RateLimited
            | GatewayErrorKind::Provider => {
                BillingError::GatewayUnavailable("please try again later".to_string())
            }
        }
    }
}
