//! Subscription repository port.
//!
//! Subscription rows are never rewritten to a different plan. A purchase
//! goes through [`SubscriptionRepository::supersede_active`], which completes
//! the user's active rows and inserts the new one in a single transaction.
//!
//! Loaded subscriptions carry the current terms of the plan they reference.

use crate::domain::foundation::{DomainError, SubscriptionId, Timestamp, UserId};
use crate::domain::marketplace::Subscription;
use async_trait::async_trait;

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// All of a user's subscriptions, newest first.
    async fn history_for_user(&self, user_id: &UserId) -> Result<Vec<Subscription>, DomainError>;

    async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError>;

    /// Finds the record linked to a gateway subscription.
    async fn find_by_gateway_subscription(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Inserts a new record.
    async fn insert(&self, subscription: &Subscription) -> Result<(), DomainError>;

    /// Persists changes to an existing record.
    ///
    /// # Errors
    ///
    /// - `SubscriptionNotFound` if the record doesn't exist
    /// - `DatabaseError` on persistence failure
    async fn update(&self, subscription: &Subscription) -> Result<(), DomainError>;

    /// Links a gateway customer to a record, touching no other column.
    ///
    /// # Errors
    ///
    /// - `SubscriptionNotFound` if the record doesn't exist
    async fn set_customer_id(
        &self,
        id: SubscriptionId,
        customer_id: &str,
        now: Timestamp,
    ) -> Result<(), DomainError>;

    /// Completes every active record of the subscription's user and inserts
    /// `subscription`, atomically. Returns the ids that were completed.
    async fn supersede_active(
        &self,
        subscription: &Subscription,
    ) -> Result<Vec<SubscriptionId>, DomainError>;
}
