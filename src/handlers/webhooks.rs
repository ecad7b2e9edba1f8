//! Inbound payment gateway webhook endpoint.
//!
//! The raw body bytes feed signature verification untouched - re-serialized
//! JSON would break the HMAC. Verification and idempotency failures are
//! handled here at the boundary; only verified, parseable events reach the
//! reconciliation engine.

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};

use crate::db::AppState;
use crate::notify::{spawn_order_notification, OrderNotification};
use crate::payments::{parse_webhook_event, ParseError};
use crate::reconcile::{self, ReconcileOutcome};

/// Result type for webhook operations.
pub type WebhookResult = (StatusCode, &'static str);

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/payment", post(handle_payment_webhook))
}

pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    let Some(signature) = headers
        .get("x-razorpay-signature")
        .and_then(|v| v.to_str().ok())
    else {
        tracing::warn!("webhook from {} missing signature header", addr.ip());
        return (StatusCode::BAD_REQUEST, "Missing signature header");
    };

    if !state.gateway.verify_webhook_signature(&body, signature) {
        tracing::warn!(
            source_ip = %addr.ip(),
            payload = %truncate_for_log(&body),
            "webhook signature verification failed"
        );
        return (StatusCode::UNAUTHORIZED, "Invalid signature");
    }

    let header_event_id = headers
        .get("x-razorpay-event-id")
        .and_then(|v| v.to_str().ok());

    let event = match parse_webhook_event(&body, header_event_id) {
        Ok(event) => event,
        Err(ParseError::MissingEventId) => {
            tracing::warn!("webhook from {} has no event id", addr.ip());
            return (StatusCode::BAD_REQUEST, "Missing event id");
        }
        Err(e) => {
            tracing::warn!("webhook from {} unparseable: {}", addr.ip(), e);
            return (StatusCode::BAD_REQUEST, "Invalid payload");
        }
    };

    let mut conn = match state.db.get() {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!("DB connection error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    match reconcile::apply_event(&mut conn, &event) {
        Ok(ReconcileOutcome::Applied { order_id, status }) => {
            // Post-commit, fire-and-forget; never inside the transaction.
            spawn_order_notification(
                state.http_client.clone(),
                state.notify_webhook_url.clone(),
                OrderNotification {
                    event: event.event_type.clone(),
                    order_id,
                    status: status.to_string(),
                    timestamp: chrono::Utc::now().timestamp(),
                },
            );
            (StatusCode::OK, "OK")
        }
        Ok(ReconcileOutcome::SubscriptionUpdated { .. }) => (StatusCode::OK, "OK"),
        Ok(ReconcileOutcome::Duplicate { .. }) => (StatusCode::OK, "Already processed"),
        Ok(ReconcileOutcome::Stale { .. }) => (StatusCode::OK, "Stale event ignored"),
        Ok(ReconcileOutcome::Pending { .. }) => (StatusCode::OK, "Recorded, awaiting order"),
        Ok(ReconcileOutcome::Anomaly { .. }) => (StatusCode::OK, "Anomaly recorded"),
        Ok(ReconcileOutcome::Ignored) => (StatusCode::OK, "Event ignored"),
        Err(e) => {
            // Transient persistence failure: 5xx makes the gateway retry,
            // which is safe because of the idempotency store.
            tracing::error!("reconciliation failed for event {}: {}", event.event_id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Processing failure")
        }
    }
}

/// Truncated payload preview for audit logs on rejected requests.
fn truncate_for_log(body: &[u8]) -> String {
    const MAX: usize = 256;
    let text = String::from_utf8_lossy(body);
    let mut preview: String = text.chars().take(MAX).collect();
    if text.chars().count() > MAX {
        preview.push_str("...");
    }
    preview
}
