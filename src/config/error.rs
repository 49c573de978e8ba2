//! Startup configuration failures

use thiserror::Error;

/// Why `AppConfig::load` or `AppConfig::validate` refused to start the service.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// A value that parsed but is unusable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Carries the environment variable the operator should set.
    #[error("{0} must be set")]
    MissingRequired(&'static str),

    #[error("server port must be non-zero")]
    InvalidPort,

    #[error("timeout out of range")]
    InvalidTimeout,

    #[error("cannot bind to host {0:?}")]
    InvalidHost(String),

    #[error("database url must use the postgres:// or postgresql:// scheme")]
    InvalidDatabaseUrl,

    #[error("max_connections must be non-zero and at least min_connections")]
    InvalidPoolSize,

    #[error("max_connections may not exceed 100")]
    PoolSizeTooLarge,

    #[error("Stripe secret key must start with sk_")]
    InvalidStripeKey,

    #[error("Stripe webhook secret must start with whsec_")]
    InvalidStripeWebhookSecret,

    #[error("currency must be a three-letter ISO 4217 code")]
    InvalidCurrency,

    #[error("pay-per-post price must be at least one cent")]
    InvalidPostPrice,

    #[error("checkout success and cancel URLs must be absolute http(s) URLs")]
    InvalidReturnUrl,

    #[error("production requires a live Stripe secret key")]
    LiveKeyRequired,
}
