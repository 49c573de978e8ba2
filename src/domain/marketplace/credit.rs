//! Credit ledger entries.
//!
//! A credit is a prepaid allowance for gated actions that works regardless
//! of subscription status. One-time purchases issue credits of amount 1.

use crate::domain::foundation::{CreditId, DomainError, ErrorCode, PaymentId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// Prepaid post allowance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    pub id: CreditId,
    pub user_id: UserId,
    pub amount: u32,
    pub used: u32,
    pub expires_at: Option<Timestamp>,
    pub payment_id: Option<PaymentId>,
    pub created_at: Timestamp,
}

impl Credit {
    /// Issues a fresh, non-expiring credit paid for by `payment_id`.
    pub fn issue(user_id: UserId, amount: u32, payment_id: Option<PaymentId>, now: Timestamp) -> Self {
        Self {
            id: CreditId::new(),
            user_id,
            amount,
            used: 0,
            expires_at: None,
            payment_id,
            created_at: now,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.map_or(false, |exp| !now.is_before(&exp))
    }

    /// Has units left and has not expired.
    pub fn is_usable(&self, now: Timestamp) -> bool {
        self.used < self.amount && !self.is_expired(now)
    }

    pub fn remaining(&self) -> u32 {
        self.amount.saturating_sub(self.used)
    }

    /// Spends one unit.
    pub fn consume_one(&mut self, now: Timestamp) -> Result<(), DomainError> {
        if !self.is_usable(now) {
            return Err(DomainError::new(
                ErrorCode::EntitlementExhausted,
                format!("Credit {} has no usable units", self.id),
            ));
        }
        self.used += 1;
        Ok(())
    }
}

/// Units available across usable credits.
pub fn available_units(credits: &[Credit], now: Timestamp) -> u32 {
    credits
        .iter()
        .filter(|c| c.is_usable(now))
        .fold(0u32, |acc, c| acc.saturating_add(c.remaining()))
}

/// Credit to draw from next: soonest expiry first, then oldest.
pub fn next_to_consume(credits: &[Credit], now: Timestamp) -> Option<&Credit> {
    credits
        .iter()
        .filter(|c| c.is_usable(now))
        .min_by_key(|c| (c.expires_at.is_none(), c.expires_at, c.created_at))
}
