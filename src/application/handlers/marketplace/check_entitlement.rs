//! CheckEntitlementHandler - Query handler asking whether a user may post.
//!
//! Pure read: nothing is created or counted. Consuming the entitlement is a
//! separate command issued once the gated action has succeeded.

use std::sync::Arc;

use crate::domain::foundation::{Timestamp, UserId};
use crate::domain::marketplace::{credit, entitlement, BillingError, Entitlement, RemainingPosts};
use crate::ports::{CreditRepository, SubscriptionRepository};

use super::shared::peek_current;

#[derive(Debug, Clone)]
pub struct CheckEntitlementQuery {
    pub user_id: UserId,
}

#[derive(Debug, Clone)]
pub struct CheckEntitlementResult {
    pub entitlement: Entitlement,
    pub remaining_posts: RemainingPosts,
    pub credit_units: u32,
}

pub struct CheckEntitlementHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    credits: Arc<dyn CreditRepository>,
}

impl CheckEntitlementHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        credits: Arc<dyn CreditRepository>,
    ) -> Self {
        Self {
            subscriptions,
            credits,
        }
    }

    pub async fn handle(
        &self,
        query: CheckEntitlementQuery,
    ) -> Result<CheckEntitlementResult, BillingError> {
        let now = Timestamp::now();
        let subscription = peek_current(self.subscriptions.as_ref(), &query.user_id, now).await?;
        let credits = self.credits.list_for_user(&query.user_id).await?;
        let credit_units = credit::available_units(&credits, now);

        Ok(CheckEntitlementResult {
            entitlement: entitlement::evaluate(&subscription, credit_units),
            remaining_posts: subscription.remaining_posts(),
            credit_units,
        })
    }
}
