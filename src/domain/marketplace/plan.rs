//! Plan catalog entities.
//!
//! A plan bundles a monthly price with a monthly quota of promotion posts.
//! A quota of zero means unlimited posting.

use crate::domain::foundation::{Money, PlanId, Timestamp, ValidationError};
use serde::{Deserialize, Serialize};

/// Posts per period granted to a user without a paid plan.
pub const FREE_TIER_POSTS: u32 = 1;

/// Plan name reported for users on the free tier.
pub const FREE_PLAN_NAME: &str = "free";

/// Display name reported for users on the free tier.
pub const FREE_PLAN_DISPLAY_NAME: &str = "Free";

/// Administrator input for creating or updating a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSpec {
    /// Machine slug, e.g. `premium`.
    pub name: String,
    pub display_name: String,
    pub price: Money,
    /// Zero means unlimited.
    pub posts_per_month: u32,
    pub is_active: bool,
    pub is_recommended: bool,
}

impl PlanSpec {
    /// Validates the draft before anything leaves the process.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::empty_field("name"));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(ValidationError::invalid_format(
                "name",
                "only lowercase letters, digits, '-' and '_' are allowed",
            ));
        }
        if self.display_name.trim().is_empty() {
            return Err(ValidationError::empty_field("display_name"));
        }
        Ok(())
    }

    /// A plan with a zero price never touches the gateway.
    pub fn is_paid(&self) -> bool {
        !self.price.is_zero()
    }
}

/// A plan ready to be persisted; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPlan {
    pub spec: PlanSpec,
    pub gateway_product_id: Option<String>,
    pub gateway_price_id: Option<String>,
}

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub display_name: String,
    pub price: Money,
    pub posts_per_month: u32,
    pub is_active: bool,
    pub is_recommended: bool,
    pub gateway_product_id: Option<String>,
    pub gateway_price_id: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Plan {
    /// Materializes a persisted plan from a draft.
    pub fn from_new(id: PlanId, draft: NewPlan, now: Timestamp) -> Self {
        let NewPlan {
            spec,
            gateway_product_id,
            gateway_price_id,
        } = draft;
        Self {
            id,
            name: spec.name,
            display_name: spec.display_name,
            price: spec.price,
            posts_per_month: spec.posts_per_month,
            is_active: spec.is_active,
            is_recommended: spec.is_recommended,
            gateway_product_id,
            gateway_price_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.posts_per_month == 0
    }

    /// Active, priced and registered with the gateway.
    pub fn is_purchasable(&self) -> bool {
        self.is_active && !self.price.is_zero() && self.gateway_price_id.is_some()
    }

    /// Whether moving to `spec` needs a fresh gateway price.
    pub fn needs_new_price(&self, spec: &PlanSpec) -> bool {
        spec.is_paid() && (self.price != spec.price || self.gateway_price_id.is_none())
    }

    /// Overwrites the editable fields. Gateway references are handled separately.
    pub fn apply(&mut self, spec: PlanSpec, now: Timestamp) {
        self.name = spec.name;
        self.display_name = spec.display_name;
        self.price = spec.price;
        self.posts_per_month = spec.posts_per_month;
        self.is_active = spec.is_active;
        self.is_recommended = spec.is_recommended;
        self.updated_at = now;
    }

    pub fn terms(&self) -> PlanTerms {
        PlanTerms {
            plan_id: self.id,
            name: self.name.clone(),
            display_name: self.display_name.clone(),
            posts_per_month: self.posts_per_month,
        }
    }
}

/// The parts of a plan a subscription needs to evaluate its quota.
///
/// Loaded alongside the subscription from the plan it references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTerms {
    pub plan_id: PlanId,
    pub name: String,
    pub display_name: String,
    pub posts_per_month: u32,
}

/// Which plans a viewer may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanVisibility {
    All,
    ActiveOnly,
}

impl PlanVisibility {
    pub fn admits(&self, plan: &Plan) -> bool {
        match self {
            PlanVisibility::All => true,
            PlanVisibility::ActiveOnly => plan.is_active,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn spec(name: &str, price_cents: i64, posts: u32) -> PlanSpec {
        PlanSpec {
            name: name.to_string(),
            display_name: name.to_uppercase(),
            price: Money::from_cents(price_cents).unwrap(),
            posts_per_month: posts,
            is_active: true,
            is_recommended: false,
        }
    }

    pub fn plan(id: i64, price_cents: i64, posts: u32) -> Plan {
        Plan::from_new(
            PlanId::new(id),
            NewPlan {
                spec: spec(&format!("plan-{}", id), price_cents, posts),
                gateway_product_id: Some(format!("prod_{}", id)),
                gateway_price_id: Some(format!("price_{}", id)),
            },
            Timestamp::now(),
        )
    }
}
