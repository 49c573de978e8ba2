//! Current-subscription resolution over a user's history.

use super::Subscription;

/// Picks the subscription that governs the user right now.
///
/// Most recent active record, else the most recent record of any status.
/// `None` means the user has no history and the caller should create a
/// free-tier record.
pub fn resolve_current(history: &[Subscription]) -> Option<&Subscription> {
    history
        .iter()
        .filter(|s| s.status.is_active())
        .max_by_key(|s| s.created_at)
        .or_else(|| latest(history))
}

/// Most recent record regardless of status.
pub fn latest(history: &[Subscription]) -> Option<&Subscription> {
    history.iter().max_by_key(|s| s.created_at)
}

/// Most recent active record that is linked to a gateway subscription.
pub fn cancellable(history: &[Subscription]) -> Option<&Subscription> {
    history
        .iter()
        .filter(|s| s.status.is_active() && s.gateway_subscription_id.is_some())
        .max_by_key(|s| s.created_at)
}
