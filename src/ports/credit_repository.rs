//! Credit repository port.

use crate::domain::foundation::{DomainError, Timestamp, UserId};
use crate::domain::marketplace::Credit;
use async_trait::async_trait;

#[async_trait]
pub trait CreditRepository: Send + Sync {
    /// A user's credits, newest first.
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Credit>, DomainError>;

    /// Spends one unit from the user's next usable credit
    /// (soonest expiry, then oldest), atomically.
    ///
    /// Returns the updated credit, or `None` when nothing is usable at `now`.
    async fn consume_one(&self, user_id: &UserId, now: Timestamp)
        -> Result<Option<Credit>, DomainError>;
}
