//! Stripe wire types.
//!
//! These mirror Stripe JSON as returned by the REST API and delivered in
//! webhook payloads. Every type converts into the gateway port's records
//! before leaving this module; fields Stripe may send as either an id or an
//! expanded object are modeled with [`Expandable`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ports::{
    CompletedCheckout, GatewayError, GatewayErrorKind, GatewayInvoice, GatewayPaymentIntent,
    GatewaySubscription, GatewaySubscriptionStatus, InvoiceRef, InvoiceStatus, PaymentIntentRef,
    PaymentIntentStatus,
};

// ════════════════════════════════════════════════════════════════════════════════
// Signature Parsing
// ════════════════════════════════════════════════════════════════════════════════

/// Error parsing the Stripe-Signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureParseError {
    MissingHeader,
    MissingTimestamp,
    MissingV1Signature,
    InvalidTimestamp,
    /// Signature is not valid hex.
    InvalidSignatureFormat,
}

impl std::fmt::Display for SignatureParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingHeader => write!(f, "Missing Stripe-Signature header"),
            Self::MissingTimestamp => write!(f, "Missing timestamp (t=) in signature"),
            Self::MissingV1Signature => write!(f, "Missing v1 signature in header"),
            Self::InvalidTimestamp => write!(f, "Invalid timestamp format"),
            Self::InvalidSignatureFormat => write!(f, "Invalid signature format (not valid hex)"),
        }
    }
}

impl std::error::Error for SignatureParseError {}

/// Parsed `Stripe-Signature` header: `t=<timestamp>,v1=<hex>[,v1=<hex>...]`.
///
/// Stripe sends several `v1` entries while a signing secret is being rolled;
/// any one of them matching is enough.
#[derive(Debug, Clone)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, SignatureParseError> {
        if header.trim().is_empty() {
            return Err(SignatureParseError::MissingHeader);
        }

        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            match key.trim() {
                "t" => {
                    timestamp = Some(
                        value
                            .trim()
                            .parse()
                            .map_err(|_| SignatureParseError::InvalidTimestamp)?,
                    );
                }
                "v1" => v1_signatures.push(
                    hex_decode(value.trim()).ok_or(SignatureParseError::InvalidSignatureFormat)?,
                ),
                // v0 and unknown schemes are ignored.
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureParseError::MissingTimestamp)?;
        if v1_signatures.is_empty() {
            return Err(SignatureParseError::MissingV1Signature);
        }
        Ok(Self {
            timestamp,
            v1_signatures,
        })
    }
}

fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// ════════════════════════════════════════════════════════════════════════════════
// Envelope and Errors
// ════════════════════════════════════════════════════════════════════════════════

/// Webhook event envelope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created: i64,
    pub data: StripeEventData,
    #[serde(default)]
    pub livemode: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

/// Body of a non-2xx API response.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorEnvelope {
    pub error: StripeApiError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeApiError {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<String>,
    pub decline_code: Option<String>,
    pub message: Option<String>,
}

/// Maps an API failure onto the port's error kinds.
pub fn api_error(status: u16, body: &str) -> GatewayError {
    let parsed = serde_json::from_str::<StripeErrorEnvelope>(body).ok();
    let error_type = parsed
        .as_ref()
        .and_then(|e| e.error.error_type.as_deref())
        .unwrap_or("");

    let kind = match (status, error_type) {
        (_, "card_error") => GatewayErrorKind::CardDeclined,
        (401, _) | (_, "authentication_error") => GatewayErrorKind::Authentication,
        (404, _) => GatewayErrorKind::NotFound,
        (429, _) | (_, "rate_limit_error") => GatewayErrorKind::RateLimited,
        (_, "invalid_request_error") => GatewayErrorKind::InvalidRequest,
        _ => GatewayErrorKind::Provider,
    };

    let message = parsed
        .as_ref()
        .and_then(|e| e.error.message.clone())
        .unwrap_or_else(|| format!("Stripe API error (HTTP {})", status));

    let error = GatewayError::new(kind, message);
    match parsed.and_then(|e| e.error.decline_code.or(e.error.code)) {
        Some(code) => error.with_provider_code(code),
        None => error,
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Stripe Objects
// ════════════════════════════════════════════════════════════════════════════════

/// A field Stripe returns as an id unless the request expanded it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(Box<T>),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeObjectId {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeCustomer {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub payment_intent: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl From<StripeCheckoutSession> for CompletedCheckout {
    fn from(session: StripeCheckoutSession) -> Self {
        Self {
            session_id: session.id,
            customer_id: session.customer,
            subscription_id: session.subscription,
            payment_intent_id: session.payment_intent,
            amount_total: session.amount_total,
            currency: session.currency,
            metadata: session.metadata,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeList<T> {
    pub data: Vec<T>,
}

/// Newer API versions report billing periods on subscription items.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeSubscriptionItem {
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: Option<String>,
    pub status: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub latest_invoice: Option<Expandable<StripeInvoice>>,
    pub items: Option<StripeList<StripeSubscriptionItem>>,
}

impl From<StripeSubscription> for GatewaySubscription {
    fn from(sub: StripeSubscription) -> Self {
        let first_item = sub.items.as_ref().and_then(|list| list.data.first());
        Self {
            current_period_start: sub
                .current_period_start
                .or_else(|| first_item.and_then(|i| i.current_period_start)),
            current_period_end: sub
                .current_period_end
                .or_else(|| first_item.and_then(|i| i.current_period_end)),
            id: sub.id,
            customer_id: sub.customer,
            status: GatewaySubscriptionStatus::parse(&sub.status),
            cancel_at_period_end: sub.cancel_at_period_end,
            metadata: sub.metadata,
            latest_invoice: sub.latest_invoice.map(|invoice| match invoice {
                Expandable::Id(id) => InvoiceRef::Id(id),
                Expandable::Object(obj) => InvoiceRef::Expanded(Box::new((*obj).into())),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeInvoice {
    pub id: String,
    pub status: Option<String>,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub currency: String,
    pub subscription: Option<String>,
    pub payment_intent: Option<Expandable<StripePaymentIntent>>,
}

impl From<StripeInvoice> for GatewayInvoice {
    fn from(invoice: StripeInvoice) -> Self {
        Self {
            id: invoice.id,
            status: InvoiceStatus::parse(invoice.status.as_deref().unwrap_or("")),
            amount_paid: invoice.amount_paid,
            currency: invoice.currency,
            subscription_id: invoice.subscription,
            payment_intent: invoice.payment_intent.map(|intent| match intent {
                Expandable::Id(id) => PaymentIntentRef::Id(id),
                Expandable::Object(obj) => PaymentIntentRef::Expanded(Box::new((*obj).into())),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripePaymentIntent {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
    pub client_secret: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl From<StripePaymentIntent> for GatewayPaymentIntent {
    fn from(intent: StripePaymentIntent) -> Self {
        Self {
            id: intent.id,
            status: PaymentIntentStatus::parse(&intent.status),
            amount: intent.amount,
            currency: intent.currency,
            client_secret: intent.client_secret,
            metadata: intent.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ════════════════════════════════════════════════════════════════════════════
    // Signature Header
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn parses_timestamp_and_signature() {
        let header = SignatureHeader::parse("t=1704067200,v1=abcdef").unwrap();
        assert_eq!(header.timestamp, 1704067200);
        assert_eq!(header.v1_signatures, vec![vec![0xab, 0xcd, 0xef]]);
    }

    #[test]
    fn collects_multiple_v1_signatures() {
        let header = SignatureHeader::parse("t=1,v1=aa,v0=bb,v1=cc").unwrap();
        assert_eq!(header.v1_signatures.len(), 2);
    }

    #[test]
    fn rejects_empty_header() {
        assert_eq!(
            SignatureHeader::parse("").unwrap_err(),
            SignatureParseError::MissingHeader
        );
    }

    #[test]
    fn rejects_missing_v1() {
        assert_eq!(
            SignatureHeader::parse("t=1704067200").unwrap_err(),
            SignatureParseError::MissingV1Signature
        );
    }

    #[test]
    fn rejects_non_hex_signature() {
        assert_eq!(
            SignatureHeader::parse("t=1,v1=zz").unwrap_err(),
            SignatureParseError::InvalidSignatureFormat
        );
    }

    #[test]
    fn rejects_bad_timestamp() {
        assert_eq!(
            SignatureHeader::parse("t=yesterday,v1=aa").unwrap_err(),
            SignatureParseError::InvalidTimestamp
        );
    }

    #[test]
    fn hex_round_trip() {
        let bytes = vec![0x00, 0x7f, 0xff];
        assert_eq!(hex_decode(&hex_encode(&bytes)), Some(bytes));
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Object Conversion
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn subscription_with_expanded_invoice_and_intent() {
        let json = r#"{
            "id": "sub_1",
            "customer": "cus_1",
            "status": "active",
            "current_period_start": 1704067200,
            "current_period_end": 1706745600,
            "latest_invoice": {
                "id": "in_1",
                "status": "open",
                "amount_paid": 0,
                "currency": "usd",
                "payment_intent": {
                    "id": "pi_1",
                    "status": "requires_action",
                    "amount": 999,
                    "currency": "usd",
                    "client_secret": "pi_1_secret"
                }
            }
        }"#;
        let sub: GatewaySubscription = serde_json::from_str::<StripeSubscription>(json)
            .unwrap()
            .into();

        let invoice = match sub.latest_invoice {
            Some(InvoiceRef::Expanded(invoice)) => invoice,
            other => panic!("expected expanded invoice, got {:?}", other),
        };
        assert!(invoice.settlement_status().requires_action());
        assert_eq!(invoice.client_secret(), Some("pi_1_secret"));
    }

    #[test]
    fn subscription_with_invoice_id_only() {
        let json = r#"{"id": "sub_1", "status": "active", "latest_invoice": "in_9"}"#;
        let sub: GatewaySubscription = serde_json::from_str::<StripeSubscription>(json)
            .unwrap()
            .into();
        assert_eq!(sub.latest_invoice, Some(InvoiceRef::Id("in_9".to_string())));
        assert_eq!(sub.current_period_start, None);
    }

    #[test]
    fn subscription_periods_fall_back_to_first_item() {
        let json = r#"{
            "id": "sub_1",
            "status": "active",
            "items": {"data": [{"current_period_start": 10, "current_period_end": 20}]}
        }"#;
        let sub: GatewaySubscription = serde_json::from_str::<StripeSubscription>(json)
            .unwrap()
            .into();
        assert_eq!(sub.current_period_start, Some(10));
        assert_eq!(sub.current_period_end, Some(20));
    }

    #[test]
    fn card_error_maps_to_card_declined() {
        let body = r#"{"error": {"type": "card_error", "code": "card_declined",
            "decline_code": "insufficient_funds", "message": "Your card has insufficient funds."}}"#;
        let err = api_error(402, body);
        assert_eq!(err.kind, GatewayErrorKind::CardDeclined);
        assert_eq!(err.provider_code.as_deref(), Some("insufficient_funds"));
        assert_eq!(err.message, "Your card has insufficient funds.");
    }

    #[test]
    fn unparseable_5xx_maps_to_provider_error() {
        let err = api_error(502, "<html>bad gateway</html>");
        assert_eq!(err.kind, GatewayErrorKind::Provider);
        assert!(err.message.contains("502"));
    }

    #[test]
    fn missing_resource_maps_to_not_found() {
        let body = r#"{"error": {"type": "invalid_request_error", "message": "No such price"}}"#;
        assert_eq!(api_error(404, body).kind, GatewayErrorKind::NotFound);
        assert_eq!(api_error(400, body).kind, GatewayErrorKind::InvalidRequest);
    }
}
