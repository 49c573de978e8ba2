//! UpdatePlanHandler - Command handler for editing a catalog plan.
//!
//! Gateway prices are immutable. A changed price gets a new price object and
//! the old one is archived once the row points at the replacement.

use std::sync::Arc;

use crate::domain::foundation::{BillingUser, PlanId, Timestamp};
use crate::domain::marketplace::{BillingError, Plan, PlanSpec};
use crate::ports::{
    CreatePriceRequest, PaymentGateway, PlanRepository, ProductRequest, RecurringInterval,
};

use super::shared::{gateway_failure, require_admin};

#[derive(Debug, Clone)]
pub struct UpdatePlanCommand {
    pub actor: BillingUser,
    pub plan_id: PlanId,
    pub spec: PlanSpec,
}

#[derive(Debug, Clone)]
pub struct UpdatePlanResult {
    pub plan: Plan,
}

/// Gateway objects created during this update, undone if the write fails.
#[derive(Default)]
struct Created {
    product_id: Option<String>,
    price_id: Option<String>,
}

pub struct UpdatePlanHandler {
    plans: Arc<dyn PlanRepository>,
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
}

impl UpdatePlanHandler {
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

    pub async fn handle(&self, cmd: UpdatePlanCommand) -> Result<UpdatePlanResult, BillingError> {
        require_admin(&cmd.actor)?;
        cmd.spec.validate()?;

        let mut plan = self
            .plans
            .find_by_id(cmd.plan_id)
            .await?
            .ok_or_else(|| BillingError::plan_not_found(cmd.plan_id))?;

        let mut created = Created::default();
        let mut retired_price = None;

        if cmd.spec.is_paid() {
            let product = ProductRequest::for_plan(&cmd.spec.name, &cmd.spec.display_name);
            let product_id = match plan.gateway_product_id.clone() {
                Some(id) => {
                    self.gateway
                        .update_product(&id, product)
                        .await
                        .map_err(|e| gateway_failure("update_product", e))?;
                    id
                }
                None => {
                    let id = self
                        .gateway
                        .create_product(product)
                        .await
                        .map_err(|e| gateway_failure("create_product", e))?;
                    created.product_id = Some(id.clone());
                    id
                }
            };

            if plan.needs_new_price(&cmd.spec) {
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
                        self.undo(&created).await;
                        return Err(gateway_failure("create_price", e));
                    }
                };
                created.price_id = Some(price_id.clone());
                retired_price = plan.gateway_price_id.replace(price_id);
            }
            plan.gateway_product_id = Some(product_id);
        } else {
            // A free plan has nothing to sell at the gateway.
            retired_price = plan.gateway_price_id.take();
        }

        plan.apply(cmd.spec, Timestamp::now());

        if let Err(err) = self.plans.update(&plan).await {
            tracing::error!(plan_id = %plan.id, error = %err, "Failed to persist plan update");
            self.undo(&created).await;
            return Err(err.into());
        }

        if let Some(old_price) = retired_price {
            if let Err(e) = self.gateway.archive_price(&old_price).await {
                tracing::warn!(price_id = %old_price, error = %e, "Failed to archive replaced price");
            }
        }

        tracing::info!(plan_id = %plan.id, price_cents = plan.price.cents(), "Plan updated");
        Ok(UpdatePlanResult { plan })
    }

    async fn undo(&self, created: &Created) {
        if let Some(price_id) = &created.price_id {
            if let Err(e) = self.gateway.archive_price(price_id).await {
                tracing::warn!(price_id = %price_id, error = %e, "Failed to archive unused price");
            }
        }
        if let Some(product_id) = &created.product_id {
            if let Err(e) = self.gateway.archive_product(product_id).await {
                tracing::warn!(
                    product_id = %product_id,
                    error = %e,
                    "Failed to archive unused product"
                );
            }
        }
    }
}
