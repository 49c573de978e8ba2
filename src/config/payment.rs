//! Stripe credentials and marketplace pricing

use serde::Deserialize;

use super::error::ValidationError;
use super::server::Environment;

const DEFAULT_POST_PRICE_CENTS: i64 = 500;

/// How the service charges users.
///
/// The two Stripe secrets have no default; `validate` names whichever is missing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    /// `sk_test_...` or `sk_live_...`
    pub stripe_api_key: String,

    /// `whsec_...`, used to verify webhook signatures
    pub stripe_webhook_secret: String,

    /// Lowercase ISO 4217 code applied to every charge
    pub currency: String,

    /// Price of one promotion post bought outside a plan
    pub pay_per_post_price_cents: i64,

    /// Checkout return targets when the client supplies none
    pub success_url: String,
    pub cancel_url: String,

    /// Drop webhook events that Stripe sent in test mode
    pub require_livemode: bool,
}

impl PaymentConfig {
    pub fn is_test_mode(&self) -> bool {
        self.stripe_api_key.starts_with("sk_test_")
    }

    pub fn is_live_mode(&self) -> bool {
        self.stripe_api_key.starts_with("sk_live_")
    }

    pub fn validate(&self, environment: Environment) -> Result<(), ValidationError> {
        self.validate_stripe(environment)?;

        let currency_ok = self.currency.len() == 3
            && self.currency.bytes().all(|b| b.is_ascii_lowercase());
        if !currency_ok {
            return Err(ValidationError::InvalidCurrency);
        }
        if self.pay_per_post_price_cents < 1 {
            return Err(ValidationError::InvalidPostPrice);
        }
        let absolute = |url: &str| url.starts_with("https://") || url.starts_with("http://");
        if !absolute(&self.success_url) || !absolute(&self.cancel_url) {
            return Err(ValidationError::InvalidReturnUrl);
        }
        Ok(())
    }

    fn validate_stripe(&self, environment: Environment) -> Result<(), ValidationError> {
        match (self.stripe_api_key.as_str(), self.stripe_webhook_secret.as_str()) {
            ("", _) => Err(ValidationError::MissingRequired(
                "MARKETPLACE_BILLING__PAYMENT__STRIPE_API_KEY",
            )),
            (_, "") => Err(ValidationError::MissingRequired(
                "MARKETPLACE_BILLING__PAYMENT__STRIPE_WEBHOOK_SECRET",
            )),
            (key, _) if !key.starts_with("sk_") => Err(ValidationError::InvalidStripeKey),
            (_, secret) if !secret.starts_with("whsec_") => {
                Err(ValidationError::InvalidStripeWebhookSecret)
            }
            _ if environment == Environment::Production && !self.is_live_mode() => {
                Err(ValidationError::LiveKeyRequired)
            }
            _ => Ok(()),
        }
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            stripe_api_key: String::new(),
            stripe_webhook_secret: String::new(),
            currency: "usd".to_string(),
            pay_per_post_price_cents: DEFAULT_POST_PRICE_CENTS,
            success_url: "http://localhost:3000/billing/success".to_string(),
            cancel_url: "http://localhost:3000/billing/cancel".to_string(),
            require_livemode: false,
        }
    }
}
