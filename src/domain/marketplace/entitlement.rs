//! Entitlement evaluation.
//!
//! Pure composition of subscription quota and prepaid credits. Nothing here
//! touches storage; consuming an entitlement is a separate, explicit step.

use serde::{Deserialize, Serialize};

use super::Subscription;

/// What pays for the next gated action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementSource {
    Subscription,
    Credit,
}

/// Right to perform one gated action now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub allowed: bool,
    /// `None` when not allowed.
    pub source: Option<EntitlementSource>,
}

impl Entitlement {
    pub fn denied() -> Self {
        Self {
            allowed: false,
            source: None,
        }
    }

    fn granted(source: EntitlementSource) -> Self {
        Self {
            allowed: true,
            source: Some(source),
        }
    }
}

/// Subscription quota first, credits second.
pub fn evaluate(subscription: &Subscription, credit_units: u32) -> Entitlement {
    if subscription.can_post() {
        Entitlement::granted(EntitlementSource::Subscription)
    } else if credit_units > 0 {
        Entitlement::granted(EntitlementSource::Credit)
    } else {
        Entitlement::denied()
    }
}
