//! CreatePlanHandler - Command handler for adding a catalog plan.
//!
//! Paid plans are registered with the gateway as a product plus a monthly
//! recurring price before the row is written. If the row cannot be written
//! the product and price are archived again.

use std::sync::Arc;

use crate::domain::foundation::BillingUser;
use crate::domain::marketplace::{BillingError, NewPlan, Plan, PlanSpec};
use crate::ports::{
    CreatePriceRequest, PaymentGateway, PlanRepository, ProductRequest, RecurringInterval,
};

use super::shared::{gateway_failure, require_admin};

#[derive(Debug, Clone)]
pub struct CreatePlanCommand {
    pub actor: BillingUser,
    pub spec: PlanSpec,
}

#[derive(Debug, Clone)]
pub struct CreatePlanResult {
    pub plan: Plan,
}

pub struct CreatePlanHandler {
    plans: Arc<dyn PlanRepository>,
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
}

impl CreatePlanHandler {
    pub fn new(
        plans: Arc<dyn PlanRepository>,
        gateway: Arc<dyn PaymentGateway>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            plans,
            gateway,
            currency: currency.into(),
        }
    }

    pub async fn handle(&self, cmd: CreatePlanCommand) -> Result<CreatePlanResult, BillingError> {
        // 1. Authorize and validate before anything leaves the process
        require_admin(&cmd.actor)?;
        cmd.spec.validate()?;

        // 2. Register paid plans with the gateway
        let (product_id, price_id) = if cmd.spec.is_paid() {
            let product_id = self
                .gateway
                .create_product(ProductRequest::for_plan(
                    &cmd.spec.name,
                    &cmd.spec.display_name,
                ))
                .await
                .map_err(|e| gateway_failure("create_product", e))?;

            let price_id = match self
                .gateway
                .create_price(CreatePriceRequest {
                    product_id: product_id.clone(),
                    unit_amount: cmd.spec.price,
                    currency: self.currency.clone(),
                    recurring: Some(RecurringInterval::Month),
                })
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    self.archive(None, Some(&product_id)).await;
                    return Err(gateway_failure("create_price", e));
                }
            };
            (Some(product_id), Some(price_id))
        } else {
            (None, None)
        };

        // 3. Persist; undo the gateway registration if that fails
        let draft = NewPlan {
            spec: cmd.spec,
            gateway_product_id: product_id.clone(),
            gateway_price_id: price_id.clone(),
        };
        let plan = match self.plans.insert(draft).await {
            Ok(plan) => plan,
            Err(err) => {
                tracing::error!(error = %err, "Failed to persist plan");
                self.archive(price_id.as_deref(), product_id.as_deref()).await;
                return Err(err.into());
            }
        };

        tracing::info!(
            plan_id = %plan.id,
            name = %plan.name,
            price_cents = plan.price.cents(),
            "Plan created"
        );
        Ok(CreatePlanResult { plan })
    }

    /// Best-effort cleanup of gateway objects that have no local row.
    async fn archive(&self, price_id: Option<&str>, product_id: Option<&str>) {
        if let Some(price_id) = price_id {
            if let Err(e) = self.gateway.archive_price(price_id).await {
                tracing::warn!(price_id, error = %e, "Failed to archive orphaned price");
            }
        }
        if let Some(product_id) = product_id {
            if let Err(e) = self.gateway.archive_product(product_id).await {
                tracing::warn!(product_id, error = %e, "Failed to archive orphaned product");
            }
        }
    }
}
