//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! ## Storage Ports
//!
//! - `PlanRepository` - Plan catalog with recommendation exclusivity
//! - `SubscriptionRepository` - Subscription history and supersession
//! - `PaymentRepository` - Append-only payments, idempotent on intent id
//! - `CreditRepository` - Prepaid post credits
//!
//! ## Gateway Ports
//!
//! - `PaymentGateway` - External payment provider (Stripe)

mod credit_repository;
mod payment_gateway;
mod payment_repository;
mod plan_repository;
mod subscription_repository;

pub use credit_repository::CreditRepository;
pub use payment_gateway::{
    CheckoutLineItem, CheckoutMode, CheckoutSession, CompletedCheckout, CreateCheckoutRequest,
    CreateCustomerRequest, CreatePaymentIntentRequest, CreatePriceRequest,
    CreateSubscriptionRequest, GatewayCustomer, GatewayError, GatewayErrorKind, GatewayInvoice,
    GatewayPaymentIntent, GatewaySubscription, GatewaySubscriptionStatus, InvoiceRef,
    InvoiceStatus, PaymentGateway, PaymentIntentRef, PaymentIntentStatus, ProductRequest,
    RecurringInterval, WebhookEvent, WebhookEventKind,
};
pub use payment_repository::{PaymentRepository, SaveResult};
pub use plan_repository::{PlanDeletion, PlanRepository};
pub use subscription_repository::SubscriptionRepository;
