//! Authentication types for the domain layer.
//!
//! Identity is owned by an external collaborator. By the time a request
//! reaches the billing core it has already been authenticated, and the
//! caller hands us a `BillingUser` describing who is acting.

use serde::{Deserialize, Serialize};

use super::UserId;

/// Role of the acting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Member,
    Admin,
}

/// Already-authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingUser {
    /// The unique user identifier from the identity provider.
    pub id: UserId,

    /// Email used when registering a gateway customer.
    pub email: String,

    /// Username, forwarded to the gateway as the customer name.
    pub username: String,

    pub role: Role,
}

impl BillingUser {
    /// Creates a member (non-admin) user.
    pub fn member(id: UserId, email: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            username: username.into(),
            role: Role::Member,
        }
    }

    /// Creates an administrator.
    pub fn admin(id: UserId, email: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            role: Role::Admin,
            ..Self::member(id, email, username)
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_is_not_admin() {
        let user = BillingUser::member(UserId::new("u1").unwrap(), "a@b.c", "alice");
        assert!(!user.is_admin());
        assert_eq!(user.username, "alice");
    }

    #[test]
    fn admin_is_admin() {
        let user = BillingUser::admin(UserId::new("u1").unwrap(), "a@b.c", "root");
        assert!(user.is_admin());
    }

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
    }
}
