//! Billing error taxonomy.
//!
//! # HTTP Status Mapping
//!
//! | Error | HTTP Status |
//! |-------|-------------|
//! | Validation | 400 |
//! | InvalidPlan | 400 |
//! | InvalidWebhook | 400 |
//! | Forbidden | 403 |
//! | NotFound | 404 |
//! | Conflict | 409 |
//! | PaymentDeclined | 402 |
//! | EntitlementExhausted | 402 |
//! | GatewayUnavailable | 503 |
//! | ReconciliationFailed | 500 |
//! | Infrastructure | 500 |

use crate::domain::foundation::{DomainError, ErrorCode, PlanId, UserId, ValidationError};

/// Errors surfaced by billing operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingError {
    /// Input failed validation before any side effect.
    Validation(ValidationError),

    /// Plan missing, inactive or not registered with the gateway.
    InvalidPlan {
        plan_id: Option<PlanId>,
        reason: String,
    },

    /// Referenced record does not exist.
    NotFound {
        resource: &'static str,
        id: String,
    },

    /// Operation blocked by existing state.
    Conflict(String),

    /// Caller lacks the role for this operation.
    Forbidden,

    /// The gateway refused the payment or request.
    PaymentDeclined(String),

    /// The gateway could not be reached or failed internally.
    GatewayUnavailable(String),

    /// The gateway changed state but local state could not follow.
    ReconciliationFailed {
        user_id: UserId,
        gateway_reference: String,
        detail: String,
    },

    /// Neither subscription quota nor credits remain.
    EntitlementExhausted(UserId),

    /// Webhook payload or signature rejected.
    InvalidWebhook(String),

    /// Storage failure before any remote side effect.
    Infrastructure(String),
}

impl BillingError {
    pub fn invalid_plan(plan_id: Option<PlanId>, reason: impl Into<String>) -> Self {
        BillingError::InvalidPlan {
            plan_id,
            reason: reason.into(),
        }
    }

    pub fn plan_not_found(plan_id: PlanId) -> Self {
        BillingError::NotFound {
            resource: "plan",
            id: plan_id.to_string(),
        }
    }

    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        BillingError::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        BillingError::Conflict(message.into())
    }

    pub fn reconciliation_failed(
        user_id: UserId,
        gateway_reference: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        BillingError::ReconciliationFailed {
            user_id,
            gateway_reference: gateway_reference.into(),
            detail: detail.into(),
        }
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        BillingError::Infrastructure(message.into())
    }

    /// Returns the error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            BillingError::Validation(_) => ErrorCode::ValidationFailed,
            BillingError::InvalidPlan { .. } => ErrorCode::InvalidPlan,
            BillingError::NotFound { resource: "plan", .. } => ErrorCode::PlanNotFound,
            BillingError::NotFound {
                resource: "subscription",
                ..
            } => ErrorCode::SubscriptionNotFound,
            BillingError::NotFound { .. } => ErrorCode::NotFound,
            BillingError::Conflict(_) => ErrorCode::Conflict,
            BillingError::Forbidden => ErrorCode::Forbidden,
            BillingError::PaymentDeclined(_) => ErrorCode::PaymentDeclined,
            BillingError::GatewayUnavailable(_) => ErrorCode::GatewayUnavailable,
            BillingError::ReconciliationFailed { .. } => ErrorCode::ReconciliationFailed,
            BillingError::EntitlementExhausted(_) => ErrorCode::EntitlementExhausted,
            BillingError::InvalidWebhook(_) => ErrorCode::InvalidWebhook,
            BillingError::Infrastructure(_) => ErrorCode::DatabaseError,
        }
    }

    /// Returns a user-facing error message.
    pub fn message(&self) -> String {
        match self {
            BillingError::Validation(err) => err.to_string(),
            BillingError::InvalidPlan { plan_id, reason } => match plan_id {
                Some(id) => format!("Plan {} cannot be used: {}", id, reason),
                None => format!("Invalid plan: {}", reason),
            },
            BillingError::NotFound { resource, id } if id.is_empty() => {
                format!("No {} found", resource)
            }
            BillingError::NotFound { resource, id } => format!("{} not found: {}", resource, id),
            BillingError::Conflict(msg) => msg.clone(),
            BillingError::Forbidden => "Administrator role required".to_string(),
            BillingError::PaymentDeclined(msg) => format!("Payment declined: {}", msg),
            BillingError::GatewayUnavailable(msg) => {
                format!("Payment provider unavailable: {}", msg)
            }
            BillingError::ReconciliationFailed {
                gateway_reference, ..
            } => format!(
                "Payment provider state for {} could not be recorded; it has been reversed or will be retried",
                gateway_reference
            ),
            BillingError::EntitlementExhausted(_) => {
                "No posts remaining in your plan and no credits available".to_string()
            }
            BillingError::InvalidWebhook(msg) => format!("Invalid webhook: {}", msg),
            BillingError::Infrastructure(msg) => format!("Error: {}", msg),
        }
    }
}

impl std::fmt::Display for BillingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for BillingError {}

impl From<ValidationError> for BillingError {
    fn from(err: ValidationError) -> Self {
        BillingError::Validation(err)
    }
}

impl From<DomainError> for BillingError {
    fn from(err: DomainError) -> Self {
        let id = err.details.get("id").cloned().unwrap_or_default();
        match err.code {
            ErrorCode::PlanNotFound => BillingError::not_found("plan", id),
            ErrorCode::SubscriptionNotFound => BillingError::not_found("subscription", id),
            ErrorCode::ValidationFailed | ErrorCode::InvalidFormat => {
                let field = err
                    .details
                    .get("field")
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string());
                BillingError::Validation(ValidationError::invalid_format(field, err.message))
            }
            ErrorCode::InvalidStateTransition | ErrorCode::Conflict => {
                BillingError::Conflict(err.message)
            }
            _ => BillingError::Infrastructure(err.to_string()),
        }
    }
}

impl From<BillingError> for DomainError {
    fn from(err: BillingError) -> Self {
        DomainError::new(err.code(), err.message())
    }
}
