//! Payment records.
//!
//! Payments are immutable once written. A gateway payment intent id, when
//! present, identifies at most one payment.

use crate::domain::foundation::{
    Money, PaymentId, SubscriptionId, Timestamp, UserId, ValidationError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Metadata key holding the gateway invoice id of a subscription charge.
pub const META_INVOICE_ID: &str = "invoice_id";

/// Metadata key holding the gateway subscription id of a subscription charge.
pub const META_SUBSCRIPTION_ID: &str = "subscription_id";

/// Metadata key naming the flow that wrote the payment.
pub const META_CREATED_FROM: &str = "created_from";

/// Metadata key set when the amount did not come from the invoice.
pub const META_AMOUNT_SOURCE: &str = "amount_source";

/// Value of [`META_AMOUNT_SOURCE`] when the plan list price was used.
pub const AMOUNT_SOURCE_PLAN_PRICE: &str = "plan_list_price";

/// Metadata key identifying the billing period a charge without an invoice
/// covers, as `<gateway subscription id>:<period start seconds>`.
///
/// Like the invoice id, a period key identifies at most one payment.
pub const META_PERIOD_KEY: &str = "period_key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Subscription,
    OneTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Succeeded,
    Failed,
    Pending,
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::Subscription => "subscription",
            PaymentKind::OneTime => "one_time",
        }
    }
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for PaymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscription" => Ok(PaymentKind::Subscription),
            "one_time" => Ok(PaymentKind::OneTime),
            other => Err(ValidationError::invalid_format(
                "payment_type",
                format!("unknown payment type '{}'", other),
            )),
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            "pending" => Ok(PaymentStatus::Pending),
            other => Err(ValidationError::invalid_format(
                "status",
                format!("unknown payment status '{}'", other),
            )),
        }
    }
}

/// A recorded payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub user_id: UserId,
    pub subscription_id: Option<SubscriptionId>,
    pub kind: PaymentKind,
    pub amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    pub gateway_payment_intent_id: Option<String>,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
    pub created_at: Timestamp,
}

impl Payment {
    /// A succeeded charge for a subscription invoice.
    #[allow(clippy::too_many_arguments)]
    pub fn subscription_charge(
        user_id: UserId,
        subscription_id: SubscriptionId,
        plan_display_name: &str,
        amount: Money,
        currency: impl Into<String>,
        payment_intent_id: Option<String>,
        metadata: BTreeMap<String, String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            user_id,
            subscription_id: Some(subscription_id),
            kind: PaymentKind::Subscription,
            amount,
            currency: currency.into(),
            status: PaymentStatus::Succeeded,
            gateway_payment_intent_id: payment_intent_id,
            description: format!("Subscription to {}", plan_display_name),
            metadata,
            created_at: now,
        }
    }

    /// A succeeded charge for a single promotion post.
    pub fn one_time_post(
        user_id: UserId,
        amount: Money,
        currency: impl Into<String>,
        payment_intent_id: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            user_id,
            subscription_id: None,
            kind: PaymentKind::OneTime,
            amount,
            currency: currency.into(),
            status: PaymentStatus::Succeeded,
            gateway_payment_intent_id: Some(payment_intent_id.into()),
            description: "One-time payment for a single promotion post".to_string(),
            metadata: BTreeMap::new(),
            created_at: now,
        }
    }

    pub fn invoice_id(&self) -> Option<&str> {
        self.metadata.get(META_INVOICE_ID).map(String::as_str)
    }

    pub fn period_key(&self) -> Option<&str> {
        self.metadata.get(META_PERIOD_KEY).map(String::as_str)
    }

    /// True when the amount was taken from the plan instead of the invoice.
    pub fn amount_is_estimated(&self) -> bool {
        self.metadata.get(META_AMOUNT_SOURCE).map(String::as_str) == Some(AMOUNT_SOURCE_PLAN_PRICE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserId {
        UserId::new("user-1").unwrap()
    }

    #[test]
    fn subscription_charge_describes_plan() {
        let mut meta = BTreeMap::new();
        meta.insert(META_INVOICE_ID.to_string(), "in_1".to_string());
        let payment = Payment::subscription_charge(
            user(),
            SubscriptionId::new(),
            "Premium",
            Money::from_cents(999).unwrap(),
            "usd",
            Some("pi_1".to_string()),
            meta,
            Timestamp::now(),
        );
        assert_eq!(payment.description, "Subscription to Premium");
        assert_eq!(payment.kind, PaymentKind::Subscription);
        assert_eq!(payment.invoice_id(), Some("in_1"));
        assert!(!payment.amount_is_estimated());
    }

    #[test]
    fn one_time_post_has_intent_and_no_subscription() {
        let payment =
            Payment::one_time_post(user(), Money::from_cents(299).unwrap(), "usd", "pi_9", Timestamp::now());
        assert_eq!(payment.kind, PaymentKind::OneTime);
        assert!(payment.subscription_id.is_none());
        assert_eq!(payment.gateway_payment_intent_id.as_deref(), Some("pi_9"));
        assert_eq!(payment.status, PaymentStatus::Succeeded);
    }

    #[test]
    fn estimated_amount_is_flagged_in_metadata() {
        let mut meta = BTreeMap::new();
        meta.insert(META_AMOUNT_SOURCE.to_string(), AMOUNT_SOURCE_PLAN_PRICE.to_string());
        let payment = Payment::subscription_charge(
            user(),
            SubscriptionId::new(),
            "Basic",
            Money::from_cents(500).unwrap(),
            "usd",
            None,
            meta,
            Timestamp::now(),
        );
        assert!(payment.amount_is_estimated());
    }

    #[test]
    fn kind_and_status_parse_from_storage_strings() {
        assert_eq!("one_time".parse::<PaymentKind>().unwrap(), PaymentKind::OneTime);
        assert_eq!("pending".parse::<PaymentStatus>().unwrap(), PaymentStatus::Pending);
        assert!("refunded".parse::<PaymentStatus>().is_err());
    }
}
