//! ListPlansHandler - Query handler for the plan catalog.

use std::sync::Arc;

use crate::domain::foundation::BillingUser;
use crate::domain::marketplace::{BillingError, Plan, PlanVisibility};
use crate::ports::PlanRepository;

/// Query for the catalog as seen by `viewer`.
#[derive(Debug, Clone)]
pub struct ListPlansQuery {
    pub viewer: BillingUser,
}

#[derive(Debug, Clone)]
pub struct ListPlansResult {
    /// Ordered by price, then id.
    pub plans: Vec<Plan>,
}

/// Administrators see every plan, everyone else only active ones.
pub struct ListPlansHandler {
    plans: Arc<dyn PlanRepository>,
}

impl ListPlansHandler {
    pub fn new(plans: Arc<dyn PlanRepository>) -> Self {
        Self { plans }
    }

    pub async fn handle(&self, query: ListPlansQuery) -> Result<ListPlansResult, BillingError> {
        let visibility = if query.viewer.is_admin() {
            PlanVisibility::All
        } else {
            PlanVisibility::ActiveOnly
        };
        let plans = self.plans.list(visibility).await?;
        Ok(ListPlansResult { plans })
    }
}
