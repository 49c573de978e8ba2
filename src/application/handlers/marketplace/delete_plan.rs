//! DeletePlanHandler - Command handler for removing a catalog plan.
//!
//! The reference check and the delete are one repository call, so a plan
//! cannot be deleted out from under a subscription activated in between.
//! Gateway cleanup runs after the row is gone and never fails the command.

use std::sync::Arc;

use crate::domain::foundation::{BillingUser, PlanId};
use crate::domain::marketplace::{BillingError, Plan};
use crate::ports::{PaymentGateway, PlanDeletion, PlanRepository};

use super::shared::require_admin;

#[derive(Debug, Clone)]
pub struct DeletePlanCommand {
    pub actor: BillingUser,
    pub plan_id: PlanId,
}

#[derive(Debug, Clone)]
pub struct DeletePlanResult {
    pub deleted: Plan,
}

pub struct DeletePlanHandler {
    plans: Arc<dyn PlanRepository>,
    gateway: Arc<dyn PaymentGateway>,
}

impl DeletePlanHandler {
    pub fn new(plans: Arc<dyn PlanRepository>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { plans, gateway }
    }

    pub async fn handle(&self, cmd: DeletePlanCommand) -> Result<DeletePlanResult, BillingError> {
        require_admin(&cmd.actor)?;

        let plan = match self.plans.delete_unreferenced(cmd.plan_id).await? {
            PlanDeletion::Deleted(plan) => plan,
            PlanDeletion::NotFound => return Err(BillingError::plan_not_found(cmd.plan_id)),
            PlanDeletion::Referenced {
                active_subscriptions,
            } => {
                return Err(BillingError::conflict(format!(
                    "Cannot delete plan {}: {} active subscription(s) use it",
                    cmd.plan_id, active_subscriptions
                )));
            }
        };

        if let Some(price_id) = &plan.gateway_price_id {
            if let Err(e) = self.gateway.archive_price(price_id).await {
                tracing::warn!(
                    plan_id = %plan.id,
                    price_id = %price_id,
                    error = %e,
                    "Failed to archive price of deleted plan"
                );
            }
        }
        if let Some(product_id) = &plan.gateway_product_id {
            if let Err(e) = self.gateway.archive_product(product_id).await {
                tracing::warn!(
                    plan_id = %plan.id,
                    product_id = %product_id,
                    error = %e,
                    "Failed to archive product of deleted plan"
                );
            }
        }

        tracing::info!(plan_id = %plan.id, name = %plan.name, "Plan deleted");
        Ok(DeletePlanResult { deleted: plan })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_fixtures::*;
    use super::*;
    use crate::domain::foundation::{ErrorCode, Timestamp};
    use crate::domain::marketplace::{BillingPeriod, Subscription};
    use crate::ports::{GatewayError, SubscriptionRepository};

    fn command(plan_id: PlanId) -> DeletePlanCommand {
        DeletePlanCommand {
            actor: admin(),
            plan_id,
        }
    }

    #[tokio::test]
    async fn unreferenced_plan_is_deleted_and_archived() {
        let fx = Fixture::new();
        let plan = fx.seed_plan("premium", 1999, 20).await;
        let handler = DeletePlanHandler::new(fx.plans(), fx.payment_gateway());

        handler.handle(command(plan.id)).await.unwrap();

        assert!(PlanRepository::find_by_id(fx.store.as_ref(), plan.id)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            fx.gateway.archived(),
            vec![
                plan.gateway_price_id.clone().unwrap(),
                plan.gateway_product_id.clone().unwrap()
            ]
        );
    }

    #[tokio::test]
    async fn plan_with_active_subscription_is_kept() {
        let fx = Fixture::new();
        let plan = fx.seed_plan("premium", 1999, 20).await;
        let sub = Subscription::paid(
            user_id("alice"),
            plan.terms(),
            None,
            "sub_1",
            BillingPeriod::default(),
            Timestamp::now(),
        );
        SubscriptionRepository::insert(fx.store.as_ref(), &sub)
            .await
            .unwrap();
        let handler = DeletePlanHandler::new(fx.plans(), fx.payment_gateway());

        let err = handler.handle(command(plan.id)).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::Conflict);
        assert!(fx.gateway.archived().is_empty());
        assert!(PlanRepository::find_by_id(fx.store.as_ref(), plan.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn archive_failure_does_not_fail_delete() {
        let fx = Fixture::new();
        let plan = fx.seed_plan("premium", 1999, 20).await;
        fx.gateway
            .set_method_error("archive_price", GatewayError::network("timeout"));
        let handler = DeletePlanHandler::new(fx.plans(), fx.payment_gateway());

        let result = handler.handle(command(plan.id)).await.unwrap();

        assert_eq!(result.deleted.id, plan.id);
        assert!(fx.gateway.was_called("archive_product"));
    }

    #[tokio::test]
    async fn unknown_plan_is_not_found() {
        let fx = Fixture::new();
        let handler = DeletePlanHandler::new(fx.plans(), fx.payment_gateway());

        let err = handler.handle(command(PlanId::new(3))).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::PlanNotFound);
    }
}
