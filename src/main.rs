//! Marketplace Billing API
//!
//! ## REST Endpoints (under `/api/marketplace`)
//!
//! - `GET /plans`, `POST /plans`, `PUT|DELETE /plans/:id`, `POST /plans/:id/toggle`
//! - `GET /subscription/usage`, `POST /subscription/checkout`, `POST /subscription/post-payment`
//! - `POST /subscription/confirm`, `POST /subscription/confirm-post`, `POST /subscription/cancel`
//! - `GET /entitlement`, `POST /entitlement/consume`
//! - `GET /subscriptions`, `GET /payments`, `GET /credits`
//!
//! ## Webhooks
//!
//! - `POST /api/webhooks/stripe`
//!
//! ## Health
//!
//! - `GET /health`

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use marketplace_billing::adapters::http::{marketplace_router, MarketplaceAppState};
use marketplace_billing::adapters::postgres::{
    PostgresCreditRepository, PostgresPaymentRepository, PostgresPlanRepository,
    PostgresSubscriptionRepository,
};
use marketplace_billing::adapters::{StripeConfig, StripeGateway};
use marketplace_billing::application::BillingSettings;
use marketplace_billing::config::{AppConfig, ServerConfig};
use marketplace_billing::domain::foundation::Money;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.server);
    config.validate()?;

    tracing::info!(
        environment = %config.server.environment,
        port = config.server.port,
        "Starting marketplace billing"
    );

    let pool = config.database.connect_lazy()?;
    if config.database.run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Migrations applied");
    }

    let gateway = StripeGateway::new(StripeConfig::from_payment_config(&config.payment));
    let post_price = Money::from_cents(config.payment.pay_per_post_price_cents)?;

    let state = MarketplaceAppState {
        plans: Arc::new(PostgresPlanRepository::new(pool.clone())),
        subscriptions: Arc::new(PostgresSubscriptionRepository::new(pool.clone())),
        payments: Arc::new(PostgresPaymentRepository::new(pool.clone())),
        credits: Arc::new(PostgresCreditRepository::new(pool)),
        gateway: Arc::new(gateway),
        settings: BillingSettings::new(config.payment.currency.clone(), post_price),
        success_url: config.payment.success_url.clone(),
        cancel_url: config.payment.cancel_url.clone(),
    };

    let app = build_router(state, &config.server);
    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// JSON lines in production, human-readable output elsewhere.
fn init_tracing(server: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(server.log_level.as_str()));

    if server.is_production() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn build_router(state: MarketplaceAppState, server: &ServerConfig) -> Router {
    let origins: Vec<HeaderValue> = server
        .cors_origins_list()
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = if origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    }
    .allow_methods(Any)
    .allow_headers(Any);

    Router::new()
        .nest("/api", marketplace_router())
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(server.request_timeout()))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(cors),
        )
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
