//! Plan repository port.
//!
//! Implementations must keep at most one plan flagged as recommended: any
//! write that sets `is_recommended` clears the flag on every other plan in
//! the same transaction.

use crate::domain::foundation::{DomainError, PlanId};
use crate::domain::marketplace::{NewPlan, Plan, PlanVisibility};
use async_trait::async_trait;

/// Outcome of a guarded plan deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanDeletion {
    /// Row removed; the plan as it was is returned for gateway cleanup.
    Deleted(Plan),

    /// Active subscriptions still reference the plan.
    Referenced { active_subscriptions: u64 },

    NotFound,
}

#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// Plans visible under `visibility`, ordered by price then id.
    async fn list(&self, visibility: PlanVisibility) -> Result<Vec<Plan>, DomainError>;

    async fn find_by_id(&self, id: PlanId) -> Result<Option<Plan>, DomainError>;

    /// Inserts a plan and returns it with its assigned id.
    async fn insert(&self, plan: NewPlan) -> Result<Plan, DomainError>;

    /// Overwrites a plan.
    ///
    /// # Errors
    ///
    /// - `PlanNotFound` if the plan doesn't exist
    /// - `DatabaseError` on persistence failure
    async fn update(&self, plan: &Plan) -> Result<(), DomainError>;

    /// Deletes the plan unless an active subscription references it.
    ///
    /// The reference check and the delete happen atomically.
    async fn delete_unreferenced(&self, id: PlanId) -> Result<PlanDeletion, DomainError>;
}
