//! Axum router configuration for marketplace billing endpoints.

use axum::{
    routing::{get, post, put},
    Router,
};

use super::handlers::{
    cancel_subscription, check_entitlement, confirm_post_payment, confirm_subscription,
    consume_entitlement, create_plan, delete_plan, get_usage, handle_stripe_webhook,
    list_credits, list_payments, list_plans, list_subscriptions, start_post_checkout,
    start_subscription_checkout, toggle_plan, update_plan, MarketplaceAppState,
};

/// Create the marketplace API router.
///
/// # Routes
///
/// ## Catalog (mutations require the admin role)
/// - `GET /plans`, `POST /plans`
/// - `PUT /plans/:id`, `DELETE /plans/:id`
/// - `POST /plans/:id/toggle`
///
/// ## Subscription
/// - `GET /subscription/usage`
/// - `POST /subscription/checkout` - hosted checkout for a plan
/// - `POST /subscription/post-payment` - hosted checkout for one post
/// - `POST /subscription/confirm` - embedded plan purchase
/// - `POST /subscription/confirm-post` - embedded post purchase
/// - `POST /subscription/cancel`
///
/// ## Entitlement and history
/// - `GET /entitlement`, `POST /entitlement/consume`
/// - `GET /subscriptions`, `GET /payments`, `GET /credits`
pub fn marketplace_routes() -> Router<MarketplaceAppState> {
    Router::new()
        // Catalog
        .route("/plans", get(list_plans).post(create_plan))
        .route("/plans/:id", put(update_plan).delete(delete_plan))
        .route("/plans/:id/toggle", post(toggle_plan))
        // Subscription
        .route("/subscription/usage", get(get_usage))
        .route("/subscription/checkout", post(start_subscription_checkout))
        .route("/subscription/post-payment", post(start_post_checkout))
        .route("/subscription/confirm", post(confirm_subscription))
        .route("/subscription/confirm-post", post(confirm_post_payment))
        .route("/subscription/cancel", post(cancel_subscription))
        // Entitlement
        .route("/entitlement", get(check_entitlement))
        .route("/entitlement/consume", post(consume_entitlement))
        // History
        .route("/subscriptions", get(list_subscriptions))
        .route("/payments", get(list_payments))
        .route("/credits", get(list_credits))
}

/// Webhook routes carry no user identity; the payload signature is checked
/// by the gateway adapter instead.
pub fn webhook_routes() -> Router<MarketplaceAppState> {
    Router::new().route("/stripe", post(handle_stripe_webhook))
}

/// Mounts both routers under `/marketplace` and `/webhooks`.
///
/// ```ignore
/// let app = Router::new()
///     .nest("/api", marketplace_router())
///     .with_state(state);
/// ```
pub fn marketplace_router() -> Router<MarketplaceAppState> {
    Router::new()
        .nest("/marketplace", marketplace_routes())
        .nest("/webhooks", webhook_routes())
}
