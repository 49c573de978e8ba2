//! TogglePlanHandler - Command handler that flips a plan's availability.

use std::sync::Arc;

use crate::domain::foundation::{BillingUser, PlanId, Timestamp};
use crate::domain::marketplace::{BillingError, Plan};
use crate::ports::PlanRepository;

use super::shared::require_admin;

#[derive(Debug, Clone)]
pub struct TogglePlanCommand {
    pub actor: BillingUser,
    pub plan_id: PlanId,
}

#[derive(Debug, Clone)]
pub struct TogglePlanResult {
    pub plan: Plan,
}

pub struct TogglePlanHandler {
    plans: Arc<dyn PlanRepository>,
}

impl TogglePlanHandler {
    pub fn new(plans: Arc<dyn PlanRepository>) -> Self {
        Self { plans }
    }

    pub async fn handle(&self, cmd: TogglePlanCommand) -> Result<TogglePlanResult, BillingError> {
        require_admin(&cmd.actor)?;

        let mut plan = self
            .plans
            .find_by_id(cmd.plan_id)
            .await?
            .ok_or_else(|| BillingError::plan_not_found(cmd.plan_id))?;

        plan.is_active = !plan.is_active;
        plan.updated_at = Timestamp::now();
        self.plans.update(&plan).await?;

        tracing::info!(plan_id = %plan.id, is_active = plan.is_active, "Plan availability toggled");
        Ok(TogglePlanResult { plan })
    }
}
