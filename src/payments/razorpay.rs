use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};
use crate::models::Order;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_BASE_URL: &str = "https://api.razorpay.com/v1";

/// Outbound Razorpay API client. Also owns the webhook signing secret used
/// by the inbound signature check.
#[derive(Debug, Clone)]
pub struct RazorpayClient {
    client: Client,
    key_id: String,
    key_secret: String,
    webhook_secret: String,
    base_url: String,
}

impl RazorpayClient {
    pub fn new(key_id: &str, key_secret: &str, webhook_secret: &str) -> Self {
        Self {
            client: Client::new(),
            key_id: key_id.to_string(),
            key_secret: key_secret.to_string(),
            webhook_secret: webhook_secret.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the client at a different API base. Tests use this to
    /// substitute a fake gateway without touching production logic.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn live_mode(&self) -> bool {
        self.key_id.starts_with("rzp_live_")
    }

    /// Verify a webhook signature.
    ///
    /// Razorpay signs the exact raw body bytes with HMAC-SHA256 under the
    /// webhook secret and sends the hex digest in `X-Razorpay-Signature`
    /// (no timestamp component, unlike Stripe). The comparison is constant
    /// time; malformed input is simply "not verified", never an error.
    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        let mut mac = match HmacSha256::new_from_slice(self.webhook_secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());

        // Length check is not constant-time, but signature length is not
        // secret (always 64 hex chars for SHA-256).
        let expected_bytes = expected.as_bytes();
        let provided_bytes = signature.as_bytes();
        if expected_bytes.len() != provided_bytes.len() {
            return false;
        }

        expected_bytes.ct_eq(provided_bytes).into()
    }

    /// Create a payment link for an order so the customer can pay.
    pub async fn create_payment_link(
        &self,
        order: &Order,
        customer_email: Option<&str>,
        callback_url: &str,
    ) -> Result<PaymentLink> {
        let mut payload = serde_json::json!({
            "amount": order.amount,
            "currency": order.currency,
            "accept_partial": false,
            "reference_id": order.id,
            "description": format!("Payment for order {}", order.id),
            "notify": { "sms": true, "email": true },
            "reminder_enable": true,
            "callback_url": callback_url,
            "callback_method": "get",
            "notes": { "order_id": order.id },
        });
        if let Some(email) = customer_email {
            payload["customer"] = serde_json::json!({ "email": email });
        }

        let response = self
            .client
            .post(format!("{}/payment_links", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("payment link request failed: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!("payment link rejected: {}", error_text)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("invalid payment link response: {}", e)))
    }

    /// Issue a refund against a payment. `amount = None` requests a full
    /// refund. The resulting state change arrives later as a
    /// `refund.processed` webhook; this call only asks the gateway to act.
    pub async fn refund_payment(
        &self,
        payment_id: &str,
        amount: Option<i64>,
    ) -> Result<RefundEntity> {
        let mut payload = serde_json::json!({
            "notes": { "reason": "operator requested refund" },
        });
        if let Some(amount) = amount {
            payload["amount"] = serde_json::json!(amount);
        }

        let response = self
            .client
            .post(format!("{}/payments/{}/refund", self.base_url, payment_id))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("refund request failed: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!("refund rejected: {}", error_text)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("invalid refund response: {}", e)))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentLink {
    pub id: String,
    pub short_url: String,
    pub status: String,
}

// ============ Webhook envelope ============

/// Raw Razorpay webhook envelope. Entities arrive wrapped one level deep:
/// `{"payload": {"payment": {"entity": {...}}}}`.
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    /// Gateway event id (idempotency key). Razorpay also mirrors this in
    /// the `x-razorpay-event-id` header.
    #[serde(default)]
    pub id: Option<String>,
    pub event: String,
    /// Gateway-side event timestamp (unix seconds).
    pub created_at: i64,
    #[serde(default)]
    pub payload: EnvelopePayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct EnvelopePayload {
    pub payment: Option<Wrapped<PaymentEntity>>,
    pub order: Option<Wrapped<OrderEntity>>,
    pub refund: Option<Wrapped<RefundEntity>>,
    pub subscription: Option<Wrapped<SubscriptionEntity>>,
}

#[derive(Debug, Deserialize)]
pub struct Wrapped<T> {
    pub entity: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    pub order_id: Option<String>,
    /// Amount in minor units (paise).
    pub amount: i64,
    pub currency: String,
    pub status: Option<String>,
    pub error_code: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderEntity {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub receipt: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundEntity {
    pub id: String,
    pub payment_id: String,
    pub amount: i64,
    pub currency: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionEntity {
    pub id: String,
    pub plan_id: String,
    pub customer_id: Option<String>,
    pub status: Option<String>,
    /// Current billing-cycle boundaries (unix seconds).
    pub current_start: Option<i64>,
    pub current_end: Option<i64>,
}

// ============ Parsed inbound events ============

/// A verified, parsed webhook event ready for reconciliation.
#[derive(Debug)]
pub struct InboundEvent {
    pub event_id: String,
    pub event_type: String,
    /// Gateway timestamp used for conflict ordering.
    pub event_ts: i64,
    /// Raw body as received, persisted for audit and pending retries.
    pub raw: String,
    pub kind: EventKind,
}

/// Provider event types mapped to reconciliation actions.
#[derive(Debug)]
pub enum EventKind {
    PaymentAuthorized { payment: PaymentEntity },
    PaymentCaptured { payment: PaymentEntity },
    PaymentFailed { payment: PaymentEntity },
    RefundProcessed { refund: RefundEntity },
    SubscriptionActivated { subscription: SubscriptionEntity },
    SubscriptionCharged {
        subscription: SubscriptionEntity,
        payment: Option<PaymentEntity>,
    },
    SubscriptionPaused { subscription: SubscriptionEntity },
    SubscriptionResumed { subscription: SubscriptionEntity },
    SubscriptionCancelled { subscription: SubscriptionEntity },
    /// Event type not relevant to reconciliation; recorded and acknowledged.
    Ignored,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),
    #[error("missing event id")]
    MissingEventId,
    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),
}

/// Parse a raw webhook body into an [`InboundEvent`].
///
/// The event id comes from the envelope's `id` field, falling back to the
/// `x-razorpay-event-id` header value; without either the event cannot be
/// deduplicated and is rejected.
pub fn parse_webhook_event(
    body: &[u8],
    header_event_id: Option<&str>,
) -> std::result::Result<InboundEvent, ParseError> {
    let envelope: WebhookEnvelope =
        serde_json::from_slice(body).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    let event_id = envelope
        .id
        .filter(|id| !id.is_empty())
        .or_else(|| header_event_id.map(str::to_string))
        .ok_or(ParseError::MissingEventId)?;

    let payment = envelope.payload.payment.map(|w| w.entity);
    let subscription = envelope.payload.subscription.map(|w| w.entity);

    let kind = match envelope.event.as_str() {
        "payment.authorized" => EventKind::PaymentAuthorized {
            payment: payment.ok_or(ParseError::InvalidPayload("payment entity required"))?,
        },
        "payment.captured" => EventKind::PaymentCaptured {
            payment: payment.ok_or(ParseError::InvalidPayload("payment entity required"))?,
        },
        "payment.failed" => EventKind::PaymentFailed {
            payment: payment.ok_or(ParseError::InvalidPayload("payment entity required"))?,
        },
        "refund.processed" => EventKind::RefundProcessed {
            refund: envelope
                .payload
                .refund
                .map(|w| w.entity)
                .ok_or(ParseError::InvalidPayload("refund entity required"))?,
        },
        "subscription.activated" => EventKind::SubscriptionActivated {
            subscription: subscription
                .ok_or(ParseError::InvalidPayload("subscription entity required"))?,
        },
        "subscription.charged" => EventKind::SubscriptionCharged {
            subscription: subscription
                .ok_or(ParseError::InvalidPayload("subscription entity required"))?,
            payment,
        },
        "subscription.paused" => EventKind::SubscriptionPaused {
            subscription: subscription
                .ok_or(ParseError::InvalidPayload("subscription entity required"))?,
        },
        "subscription.resumed" => EventKind::SubscriptionResumed {
            subscription: subscription
                .ok_or(ParseError::InvalidPayload("subscription entity required"))?,
        },
        "subscription.cancelled" => EventKind::SubscriptionCancelled {
            subscription: subscription
                .ok_or(ParseError::InvalidPayload("subscription entity required"))?,
        },
        _ => EventKind::Ignored,
    };

    Ok(InboundEvent {
        event_id,
        event_type: envelope.event,
        event_ts: envelope.created_at,
        raw: String::from_utf8_lossy(body).into_owned(),
        kind,
    })
}
