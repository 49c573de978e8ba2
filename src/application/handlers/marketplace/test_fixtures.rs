//! Shared setup for marketplace handler tests.

use std::sync::Arc;

use crate::adapters::memory::InMemoryBillingStore;
use crate::adapters::stripe::MockPaymentGateway;
use crate::domain::foundation::{BillingUser, Money, UserId};
use crate::domain::marketplace::{NewPlan, Plan, PlanSpec};
use crate::ports::{
    CreatePriceRequest, CreditRepository, PaymentGateway, PaymentRepository, PlanRepository,
    ProductRequest, RecurringInterval, SubscriptionRepository,
};

use super::shared::BillingSettings;

pub const POST_PRICE_CENTS: i64 = 500;

pub struct Fixture {
    pub store: Arc<InMemoryBillingStore>,
    pub gateway: Arc<MockPaymentGateway>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryBillingStore::new()),
            gateway: Arc::new(MockPaymentGateway::new()),
        }
    }

    pub fn plans(&self) -> Arc<dyn PlanRepository> {
        self.store.clone()
    }

    pub fn subscriptions(&self) -> Arc<dyn SubscriptionRepository> {
        self.store.clone()
    }

    pub fn payments(&self) -> Arc<dyn PaymentRepository> {
        self.store.clone()
    }

    pub fn credits(&self) -> Arc<dyn CreditRepository> {
        self.store.clone()
    }

    pub fn payment_gateway(&self) -> Arc<dyn PaymentGateway> {
        self.gateway.clone()
    }

    pub fn settings(&self) -> BillingSettings {
        BillingSettings::new("usd", Money::from_cents(POST_PRICE_CENTS).unwrap())
    }

    /// Persists a plan whose price is registered with the mock gateway.
    pub async fn seed_plan(&self, name: &str, price_cents: i64, posts: u32) -> Plan {
        let spec = spec(name, price_cents, posts);
        let (product, price) = if spec.is_paid() {
            let product = self
                .gateway
                .create_product(ProductRequest::for_plan(&spec.name, &spec.display_name))
                .await
                .unwrap();
            let price = self
                .gateway
                .create_price(CreatePriceRequest {
                    product_id: product.clone(),
                    unit_amount: spec.price,
                    currency: "usd".to_string(),
                    recurring: Some(RecurringInterval::Month),
                })
                .await
                .unwrap();
            (Some(product), Some(price))
        } else {
            (None, None)
        };
        PlanRepository::insert(
            self.store.as_ref(),
            NewPlan {
                spec,
                gateway_product_id: product,
                gateway_price_id: price,
            },
        )
        .await
        .unwrap()
    }
}

pub fn spec(name: &str, price_cents: i64, posts: u32) -> PlanSpec {
    PlanSpec {
        name: name.to_string(),
        display_name: capitalize(name),
        price: Money::from_cents(price_cents).unwrap(),
        posts_per_month: posts,
        is_active: true,
        is_recommended: false,
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn user_id(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

pub fn member(id: &str) -> BillingUser {
    BillingUser::member(user_id(id), format!("{}@example.com", id), id)
}

pub fn admin() -> BillingUser {
    BillingUser::admin(user_id("admin"), "admin@example.com", "admin")
}
