//! Read-only history queries: payments, credits and subscriptions.
//!
//! All three lists are newest first, as the repositories return them.

use std::sync::Arc;

use crate::domain::foundation::UserId;
use crate::domain::marketplace::{BillingError, Credit, Payment, Subscription};
use crate::ports::{CreditRepository, PaymentRepository, SubscriptionRepository};

#[derive(Debug, Clone)]
pub struct ListHistoryQuery {
    pub user_id: UserId,
}

// ════════════════════════════════════════════════════════════════════════════
// Payments
// ════════════════════════════════════════════════════════════════════════════

pub struct ListPaymentsHandler {
    payments: Arc<dyn PaymentRepository>,
}

impl ListPaymentsHandler {
    pub fn new(payments: Arc<dyn PaymentRepository>) -> Self {
        Self { payments }
    }

    pub async fn handle(&self, query: ListHistoryQuery) -> Result<Vec<Payment>, BillingError> {
        Ok(self.payments.list_for_user(&query.user_id).await?)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Credits
// ════════════════════════════════════════════════════════════════════════════

pub struct ListCreditsHandler {
    credits: Arc<dyn CreditRepository>,
}

impl ListCreditsHandler {
    pub fn new(credits: Arc<dyn CreditRepository>) -> Self {
        Self { credits }
    }

    pub async fn handle(&self, query: ListHistoryQuery) -> Result<Vec<Credit>, BillingError> {
        Ok(self.credits.list_for_user(&query.user_id).await?)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Subscriptions
// ════════════════════════════════════════════════════════════════════════════

/// Includes superseded and canceled records.
pub struct ListSubscriptionsHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
}

impl ListSubscriptionsHandler {
    pub fn new(subscriptions: Arc<dyn SubscriptionRepository>) -> Self {
        Self { subscriptions }
    }

    pub async fn handle(
        &self,
        query: ListHistoryQuery,
    ) -> Result<Vec<Subscription>, BillingError> {
        Ok(self.subscriptions.history_for_user(&query.user_id).await?)
    }
}
