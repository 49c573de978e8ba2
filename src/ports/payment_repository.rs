//! Payment repository port.
//!
//! Payments are append-only. A payment intent id, a gateway invoice id and a
//! period key each identify at most one payment, so webhook redelivery and
//! repeated confirmation calls resolve to [`SaveResult::AlreadyExists`]
//! instead of a second row.

use crate::domain::foundation::{DomainError, UserId};
use crate::domain::marketplace::{Credit, Payment};
use async_trait::async_trait;

/// Result of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    /// Row was newly written.
    Inserted,
    /// A payment with the same intent id, invoice id or period key already
    /// exists; nothing was written.
    AlreadyExists,
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Records a payment.
    async fn record(&self, payment: &Payment) -> Result<SaveResult, DomainError>;

    /// Records a payment and the credit it paid for in one transaction.
    ///
    /// When the payment already exists neither row is written.
    async fn record_with_credit(
        &self,
        payment: &Payment,
        credit: &Credit,
    ) -> Result<SaveResult, DomainError>;

    async fn find_by_intent_id(&self, intent_id: &str) -> Result<Option<Payment>, DomainError>;

    /// A user's payments, newest first.
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Payment>, DomainError>;
}
