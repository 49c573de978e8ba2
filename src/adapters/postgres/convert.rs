//! Column conversions shared by the billing repositories.

use crate::domain::foundation::{DomainError, ErrorCode, Money, UserId};

/// Wraps a driver error with what was being attempted.
pub(super) fn query_failed(action: &str, err: sqlx::Error) -> DomainError {
    DomainError::new(ErrorCode::DatabaseError, format!("Failed to {}: {}", action, err))
}

/// True when `err` violated the named constraint.
pub(super) fn violates(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint() == Some(constraint),
        _ => false,
    }
}

pub(super) fn corrupt(column: &str, reason: impl std::fmt::Display) -> DomainError {
    DomainError::new(
        ErrorCode::DatabaseError,
        format!("Invalid {} value: {}", column, reason),
    )
}

pub(super) fn user_id(raw: String) -> Result<UserId, DomainError> {
    UserId::new(raw).map_err(|e| corrupt("user_id", e))
}

pub(super) fn money(column: &str, cents: i64) -> Result<Money, DomainError> {
    Money::from_cents(cents).map_err(|e| corrupt(column, e))
}

pub(super) fn count(column: &str, value: i32) -> Result<u32, DomainError> {
    u32::try_from(value).map_err(|_| corrupt(column, value))
}

pub(super) fn column_int(column: &str, value: u32) -> Result<i32, DomainError> {
    i32::try_from(value).map_err(|_| {
        DomainError::new(
            ErrorCode::ValidationFailed,
            format!("{} {} does not fit the column", column, value),
        )
    })
}
