//! HTTP handlers for marketplace billing endpoints.
//!
//! These handlers connect Axum routes to application layer command/query handlers.

use std::sync::Arc;

use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::application::handlers::marketplace::{
    BillingSettings, CancelSubscriptionCommand, CancelSubscriptionHandler,
    CheckEntitlementHandler, CheckEntitlementQuery, ConfirmPostPaymentCommand,
    ConfirmPostPaymentHandler, ConfirmSubscriptionCommand, ConfirmSubscriptionHandler,
    ConsumeEntitlementCommand, ConsumeEntitlementHandler, CreatePlanCommand, CreatePlanHandler,
    DeletePlanCommand, DeletePlanHandler, GetUsageHandler, GetUsageQuery,
    HandleGatewayWebhookCommand, HandleGatewayWebhookHandler, ListCreditsHandler,
    ListHistoryQuery, ListPaymentsHandler, ListPlansHandler, ListPlansQuery,
    ListSubscriptionsHandler, StartPostCheckoutCommand, StartPostCheckoutHandler,
    StartSubscriptionCheckoutCommand, StartSubscriptionCheckoutHandler, TogglePlanCommand,
    TogglePlanHandler, UpdatePlanCommand, UpdatePlanHandler,
};
use crate::domain::foundation::{BillingUser, DomainError, PlanId, Role, UserId};
use crate::domain::marketplace::BillingError;
use crate::ports::{
    CreditRepository, PaymentGateway, PaymentRepository, PlanRepository, SubscriptionRepository,
};

use super::dto::{
    CancelSubscriptionResponse, CheckoutResponse, ConfirmPostPaymentRequest,
    ConfirmPostPaymentResponse, ConfirmSubscriptionRequest, ConfirmSubscriptionResponse,
    ConsumeResponse, CreditResponse, EntitlementResponse, ErrorResponse, PaymentResponse,
    PlanListResponse, PlanRequest, PlanResponse, PostCheckoutRequest, SubscriptionCheckoutRequest,
    SubscriptionResponse, UsageResponse, WebhookAck,
};

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared application state containing all dependencies.
///
/// Cloned per request; every dependency is behind an `Arc`.
#[derive(Clone)]
pub struct MarketplaceAppState {
    pub plans: Arc<dyn PlanRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub credits: Arc<dyn CreditRepository>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub settings: BillingSettings,
    /// Checkout return URLs used when the client sends none.
    pub success_url: String,
    pub cancel_url: String,
}

impl MarketplaceAppState {
    pub fn list_plans_handler(&self) -> ListPlansHandler {
        ListPlansHandler::new(self.plans.clone())
    }

    pub fn create_plan_handler(&self) -> CreatePlanHandler {
        CreatePlanHandler::new(
            self.plans.clone(),
            self.gateway.clone(),
            self.settings.currency.clone(),
        )
    }

    pub fn update_plan_handler(&self) -> UpdatePlanHandler {
        UpdatePlanHandler::new(
            self.plans.clone(),
            self.gateway.clone(),
            self.settings.currency.clone(),
        )
    }

    pub fn toggle_plan_handler(&self) -> TogglePlanHandler {
        TogglePlanHandler::new(self.plans.clone())
    }

    pub fn delete_plan_handler(&self) -> DeletePlanHandler {
        DeletePlanHandler::new(self.plans.clone(), self.gateway.clone())
    }

    pub fn usage_handler(&self) -> GetUsageHandler {
        GetUsageHandler::new(self.subscriptions.clone(), self.credits.clone())
    }

    pub fn check_entitlement_handler(&self) -> CheckEntitlementHandler {
        CheckEntitlementHandler::new(self.subscriptions.clone(), self.credits.clone())
    }

    pub fn consume_entitlement_handler(&self) -> ConsumeEntitlementHandler {
        ConsumeEntitlementHandler::new(self.subscriptions.clone(), self.credits.clone())
    }

    pub fn subscription_checkout_handler(&self) -> StartSubscriptionCheckoutHandler {
        StartSubscriptionCheckoutHandler::new(
            self.plans.clone(),
            self.subscriptions.clone(),
            self.gateway.clone(),
        )
    }

    pub fn post_checkout_handler(&self) -> StartPostCheckoutHandler {
        StartPostCheckoutHandler::new(
            self.subscriptions.clone(),
            self.gateway.clone(),
            self.settings.clone(),
        )
    }

    pub fn confirm_subscription_handler(&self) -> ConfirmSubscriptionHandler {
        ConfirmSubscriptionHandler::new(
            self.plans.clone(),
            self.subscriptions.clone(),
            self.payments.clone(),
            self.gateway.clone(),
            self.settings.currency.clone(),
        )
    }

    pub fn confirm_post_payment_handler(&self) -> ConfirmPostPaymentHandler {
        ConfirmPostPaymentHandler::new(
            self.subscriptions.clone(),
            self.payments.clone(),
            self.gateway.clone(),
            self.settings.clone(),
        )
    }

    pub fn cancel_subscription_handler(&self) -> CancelSubscriptionHandler {
        CancelSubscriptionHandler::new(self.subscriptions.clone(), self.gateway.clone())
    }

    pub fn webhook_handler(&self) -> HandleGatewayWebhookHandler {
        HandleGatewayWebhookHandler::new(
            self.plans.clone(),
            self.subscriptions.clone(),
            self.payments.clone(),
            self.gateway.clone(),
            self.settings.clone(),
        )
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// User Context
// ════════════════════════════════════════════════════════════════════════════════

/// Caller identity forwarded by the upstream identity service.
///
/// `X-User-Id` is required. `X-User-Role: admin` grants catalog access;
/// anything else is a member.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub BillingUser);

/// Rejection type for CurrentUser extraction.
pub struct AuthenticationRequired;

impl IntoResponse for AuthenticationRequired {
    fn into_response(self) -> axum::response::Response {
        let error = ErrorResponse::new("UNAUTHORIZED", "Authentication is required");
        (StatusCode::UNAUTHORIZED, Json(error)).into_response()
    }
}

fn header<'a>(parts: &'a axum::http::request::Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

impl<S> axum::extract::FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthenticationRequired;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut axum::http::request::Parts,
        _state: &'life1 S,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self, Self::Rejection>> + Send + 'async_trait>,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            let id = header(parts, "X-User-Id")
                .and_then(|s| UserId::new(s).ok())
                .ok_or(AuthenticationRequired)?;
            let role = match header(parts, "X-User-Role") {
                Some(role) if role.eq_ignore_ascii_case("admin") => Role::Admin,
                _ => Role::Member,
            };

            Ok(CurrentUser(BillingUser {
                id,
                email: header(parts, "X-User-Email").unwrap_or_default().to_string(),
                username: header(parts, "X-User-Name").unwrap_or_default().to_string(),
                role,
            }))
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Plan Catalog
// ════════════════════════════════════════════════════════════════════════════════

/// GET /api/marketplace/plans - Active plans; admins also see inactive ones
pub async fn list_plans(
    State(state): State<MarketplaceAppState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, MarketplaceApiError> {
    let result = state
        .list_plans_handler()
        .handle(ListPlansQuery { viewer: user })
        .await?;

    Ok(Json(PlanListResponse {
        plans: result.plans.into_iter().map(PlanResponse::from).collect(),
    }))
}

/// POST /api/marketplace/plans - Create a plan (admin)
pub async fn create_plan(
    State(state): State<MarketplaceAppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<PlanRequest>,
) -> Result<impl IntoResponse, MarketplaceApiError> {
    let spec = request.into_spec().map_err(BillingError::from)?;
    let result = state
        .create_plan_handler()
        .handle(CreatePlanCommand { actor: user, spec })
        .await?;

    Ok((StatusCode::CREATED, Json(PlanResponse::from(result.plan))))
}

/// PUT /api/marketplace/plans/:id - Replace a plan's fields (admin)
pub async fn update_plan(
    State(state): State<MarketplaceAppState>,
    CurrentUser(user): CurrentUser,
    Path(plan_id): Path<i64>,
    Json(request): Json<PlanRequest>,
) -> Result<impl IntoResponse, MarketplaceApiError> {
    let spec = request.into_spec().map_err(BillingError::from)?;
    let result = state
        .update_plan_handler()
        .handle(UpdatePlanCommand {
            actor: user,
            plan_id: PlanId::new(plan_id),
            spec,
        })
        .await?;

    Ok(Json(PlanResponse::from(result.plan)))
}

/// POST /api/marketplace/plans/:id/toggle - Flip availability (admin)
pub async fn toggle_plan(
    State(state): State<MarketplaceAppState>,
    CurrentUser(user): CurrentUser,
    Path(plan_id): Path<i64>,
) -> Result<impl IntoResponse, MarketplaceApiError> {
    let result = state
        .toggle_plan_handler()
        .handle(TogglePlanCommand {
            actor: user,
            plan_id: PlanId::new(plan_id),
        })
        .await?;

    Ok(Json(PlanResponse::from(result.plan)))
}

/// DELETE /api/marketplace/plans/:id - Delete an unreferenced plan (admin)
pub async fn delete_plan(
    State(state): State<MarketplaceAppState>,
    CurrentUser(user): CurrentUser,
    Path(plan_id): Path<i64>,
) -> Result<impl IntoResponse, MarketplaceApiError> {
    state
        .delete_plan_handler()
        .handle(DeletePlanCommand {
            actor: user,
            plan_id: PlanId::new(plan_id),
        })
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

// ════════════════════════════════════════════════════════════════════════════════
// Usage and Entitlement
// ════════════════════════════════════════════════════════════════════════════════

/// GET /api/marketplace/subscription/usage
pub async fn get_usage(
    State(state): State<MarketplaceAppState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, MarketplaceApiError> {
    let result = state
        .usage_handler()
        .handle(GetUsageQuery { user_id: user.id })
        .await?;

    Ok(Json(UsageResponse::from(result.usage)))
}

/// GET /api/marketplace/entitlement - Can the caller post right now
pub async fn check_entitlement(
    State(state): State<MarketplaceAppState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, MarketplaceApiError> {
    let result = state
        .check_entitlement_handler()
        .handle(CheckEntitlementQuery { user_id: user.id })
        .await?;

    Ok(Json(EntitlementResponse::from(result)))
}

/// POST /api/marketplace/entitlement/consume - Use one post
pub async fn consume_entitlement(
    State(state): State<MarketplaceAppState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, MarketplaceApiError> {
    let result = state
        .consume_entitlement_handler()
        .handle(ConsumeEntitlementCommand { user_id: user.id })
        .await?;

    Ok(Json(ConsumeResponse::from(result)))
}

// ════════════════════════════════════════════════════════════════════════════════
// Purchases
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/marketplace/subscription/checkout - Hosted checkout for a plan
pub async fn start_subscription_checkout(
    State(state): State<MarketplaceAppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<SubscriptionCheckoutRequest>,
) -> Result<impl IntoResponse, MarketplaceApiError> {
    let cmd = StartSubscriptionCheckoutCommand {
        user,
        plan_id: PlanId::new(request.plan_id),
        success_url: request.success_url.unwrap_or_else(|| state.success_url.clone()),
        cancel_url: request.cancel_url.unwrap_or_else(|| state.cancel_url.clone()),
    };
    let result = state.subscription_checkout_handler().handle(cmd).await?;

    Ok(Json(CheckoutResponse {
        session_id: result.session_id,
        checkout_url: result.checkout_url,
    }))
}

/// POST /api/marketplace/subscription/post-payment - Hosted checkout for one post
pub async fn start_post_checkout(
    State(state): State<MarketplaceAppState>,
    CurrentUser(user): CurrentUser,
    request: Option<Json<PostCheckoutRequest>>,
) -> Result<impl IntoResponse, MarketplaceApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let cmd = StartPostCheckoutCommand {
        user,
        success_url: request.success_url.unwrap_or_else(|| state.success_url.clone()),
        cancel_url: request.cancel_url.unwrap_or_else(|| state.cancel_url.clone()),
    };
    let result = state.post_checkout_handler().handle(cmd).await?;

    Ok(Json(CheckoutResponse {
        session_id: result.session_id,
        checkout_url: result.checkout_url,
    }))
}

/// POST /api/marketplace/subscription/confirm - Subscribe with a payment method
pub async fn confirm_subscription(
    State(state): State<MarketplaceAppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<ConfirmSubscriptionRequest>,
) -> Result<impl IntoResponse, MarketplaceApiError> {
    let result = state
        .confirm_subscription_handler()
        .handle(ConfirmSubscriptionCommand {
            user,
            plan_id: PlanId::new(request.plan_id),
            payment_method_id: request.payment_method_id,
        })
        .await?;

    Ok(Json(ConfirmSubscriptionResponse::from(result)))
}

/// POST /api/marketplace/subscription/confirm-post - Pay for one post
pub async fn confirm_post_payment(
    State(state): State<MarketplaceAppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<ConfirmPostPaymentRequest>,
) -> Result<impl IntoResponse, MarketplaceApiError> {
    let result = state
        .confirm_post_payment_handler()
        .handle(ConfirmPostPaymentCommand {
            user,
            payment_method_id: request.payment_method_id,
            return_url: request.return_url,
        })
        .await?;

    Ok(Json(ConfirmPostPaymentResponse::from(result)))
}

/// POST /api/marketplace/subscription/cancel - Cancel at period end
pub async fn cancel_subscription(
    State(state): State<MarketplaceAppState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, MarketplaceApiError> {
    let result = state
        .cancel_subscription_handler()
        .handle(CancelSubscriptionCommand { user_id: user.id })
        .await?;

    Ok(Json(CancelSubscriptionResponse {
        subscription_id: result.subscription_id.to_string(),
        cancel_at_period_end: true,
        period_end: result
            .period
            .end
            .map(|end| end.as_datetime().to_rfc3339()),
    }))
}

// ════════════════════════════════════════════════════════════════════════════════
// History
// ════════════════════════════════════════════════════════════════════════════════

/// GET /api/marketplace/subscriptions
pub async fn list_subscriptions(
    State(state): State<MarketplaceAppState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, MarketplaceApiError> {
    let history = ListSubscriptionsHandler::new(state.subscriptions.clone())
        .handle(ListHistoryQuery { user_id: user.id })
        .await?;

    Ok(Json(
        history
            .into_iter()
            .map(SubscriptionResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// GET /api/marketplace/payments
pub async fn list_payments(
    State(state): State<MarketplaceAppState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, MarketplaceApiError> {
    let payments = ListPaymentsHandler::new(state.payments.clone())
        .handle(ListHistoryQuery { user_id: user.id })
        .await?;

    Ok(Json(
        payments
            .into_iter()
            .map(PaymentResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// GET /api/marketplace/credits
pub async fn list_credits(
    State(state): State<MarketplaceAppState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, MarketplaceApiError> {
    let credits = ListCreditsHandler::new(state.credits.clone())
        .handle(ListHistoryQuery { user_id: user.id })
        .await?;

    Ok(Json(
        credits
            .into_iter()
            .map(CreditResponse::from)
            .collect::<Vec<_>>(),
    ))
}

// ════════════════════════════════════════════════════════════════════════════════
// Webhooks
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/webhooks/stripe - Handle Stripe webhook events
pub async fn handle_stripe_webhook(
    State(state): State<MarketplaceAppState>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, MarketplaceApiError> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| BillingError::InvalidWebhook("Missing Stripe-Signature header".into()))?;

    let result = state
        .webhook_handler()
        .handle(HandleGatewayWebhookCommand {
            payload: body.to_vec(),
            signature: signature.to_string(),
        })
        .await?;

    Ok(Json(WebhookAck {
        received: true,
        event_id: result.event_id,
    }))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts billing errors to HTTP responses.
#[derive(Debug)]
pub struct MarketplaceApiError(BillingError);

impl From<BillingError> for MarketplaceApiError {
    fn from(err: BillingError) -> Self {
        Self(err)
    }
}

impl From<DomainError> for MarketplaceApiError {
    fn from(err: DomainError) -> Self {
        Self(BillingError::from(err))
    }
}

impl MarketplaceApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BillingError::Validation(_)
            | BillingError::InvalidPlan { .. }
            | BillingError::InvalidWebhook(_) => StatusCode::BAD_REQUEST,
            BillingError::Forbidden => StatusCode::FORBIDDEN,
            BillingError::NotFound { .. } => StatusCode::NOT_FOUND,
            BillingError::Conflict(_) => StatusCode::CONFLICT,
            BillingError::PaymentDeclined(_) | BillingError::EntitlementExhausted(_) => {
                StatusCode::PAYMENT_REQUIRED
            }
            BillingError::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            BillingError::ReconciliationFailed { .. } | BillingError::Infrastructure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for MarketplaceApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let message = match &self.0 {
            BillingError::Infrastructure(detail) => {
                tracing::error!(error = %detail, "Request failed on storage");
                "An internal error occurred".to_string()
            }
            other => other.message(),
        };
        let body = ErrorResponse::new(self.0.code().to_string(), message);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::ValidationError;

    #[test]
    fn errors_map_to_documented_statuses() {
        let user = UserId::new("u1").unwrap();
        let cases = vec![
            (
                BillingError::from(ValidationError::empty_field("name")),
                StatusCode::BAD_REQUEST,
            ),
            (BillingError::Forbidden, StatusCode::FORBIDDEN),
            (
                BillingError::plan_not_found(PlanId::new(1)),
                StatusCode::NOT_FOUND,
            ),
            (BillingError::conflict("in use"), StatusCode::CONFLICT),
            (
                BillingError::PaymentDeclined("declined".into()),
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                BillingError::EntitlementExhausted(user.clone()),
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                BillingError::GatewayUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                BillingError::reconciliation_failed(user, "sub_1", "db"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(MarketplaceApiError::from(err).status(), expected);
        }
    }
}
