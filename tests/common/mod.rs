//! Test utilities and fixtures for Payline integration tests

#![allow(dead_code)]

use rusqlite::Connection;
use uuid::Uuid;

pub use payline::db::{create_pool, create_read_pool, init_db, queries, AppState};
pub use payline::models::*;
pub use payline::payments::{parse_webhook_event, InboundEvent, RazorpayClient};
pub use payline::reconcile::{self, ReconcileOutcome};

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

/// Gateway client with a fixed test webhook secret
pub fn test_gateway() -> RazorpayClient {
    RazorpayClient::new("rzp_test_key", "test_key_secret", TEST_WEBHOOK_SECRET)
}

/// Compute the hex HMAC-SHA256 signature the gateway would send
pub fn sign_payload(payload: &[u8], secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Path for a throwaway file-backed database (pools need a shared file;
/// in-memory connections each see a private database)
pub fn temp_db_path(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("payline_test_{}_{}.db", tag, Uuid::new_v4().as_simple()))
}

/// Create a test order with default fields
pub fn create_test_order(conn: &Connection, id: &str, amount: i64) -> Order {
    queries::create_order(
        conn,
        &CreateOrder {
            id: Some(id.to_string()),
            amount,
            currency: "INR".to_string(),
            product_ref: Some("plan_pro".to_string()),
            receipt: Some(format!("rcpt_{}", id)),
        },
    )
    .expect("Failed to create test order")
}

// ============ Webhook payload builders ============

pub fn payment_event_body(
    event_id: &str,
    event_type: &str,
    payment_id: &str,
    order_id: &str,
    amount: i64,
    created_at: i64,
) -> String {
    serde_json::json!({
        "id": event_id,
        "entity": "event",
        "event": event_type,
        "created_at": created_at,
        "payload": {
            "payment": {
                "entity": {
                    "id": payment_id,
                    "order_id": order_id,
                    "amount": amount,
                    "currency": "INR",
                    "status": event_type.strip_prefix("payment.").unwrap_or("created"),
                }
            }
        }
    })
    .to_string()
}

pub fn refund_event_body(
    event_id: &str,
    refund_id: &str,
    payment_id: &str,
    amount: i64,
    created_at: i64,
) -> String {
    serde_json::json!({
        "id": event_id,
        "entity": "event",
        "event": "refund.processed",
        "created_at": created_at,
        "payload": {
            "refund": {
                "entity": {
                    "id": refund_id,
                    "payment_id": payment_id,
                    "amount": amount,
                    "currency": "INR",
                    "status": "processed",
                }
            }
        }
    })
    .to_string()
}

pub fn subscription_event_body(
    event_id: &str,
    event_type: &str,
    subscription_id: &str,
    cycle_start: i64,
    cycle_end: i64,
    created_at: i64,
) -> String {
    serde_json::json!({
        "id": event_id,
        "entity": "event",
        "event": event_type,
        "created_at": created_at,
        "payload": {
            "subscription": {
                "entity": {
                    "id": subscription_id,
                    "plan_id": "plan_pro",
                    "customer_id": "cust_1",
                    "status": event_type.strip_prefix("subscription.").unwrap_or("created"),
                    "current_start": cycle_start,
                    "current_end": cycle_end,
                }
            }
        }
    })
    .to_string()
}

/// subscription.charged carrying the gateway-side order's payment
pub fn subscription_charged_body(
    event_id: &str,
    subscription_id: &str,
    payment_id: &str,
    order_id: &str,
    amount: i64,
    cycle_start: i64,
    cycle_end: i64,
    created_at: i64,
) -> String {
    serde_json::json!({
        "id": event_id,
        "entity": "event",
        "event": "subscription.charged",
        "created_at": created_at,
        "payload": {
            "subscription": {
                "entity": {
                    "id": subscription_id,
                    "plan_id": "plan_pro",
                    "customer_id": "cust_1",
                    "status": "active",
                    "current_start": cycle_start,
                    "current_end": cycle_end,
                }
            },
            "payment": {
                "entity": {
                    "id": payment_id,
                    "order_id": order_id,
                    "amount": amount,
                    "currency": "INR",
                    "status": "captured",
                }
            }
        }
    })
    .to_string()
}

/// Parse a test payload into an inbound event
pub fn parse_event(body: &str) -> InboundEvent {
    parse_webhook_event(body.as_bytes(), None).expect("Failed to parse test event")
}

/// Parse and apply a test payload through the reconciliation engine
pub fn apply(conn: &mut Connection, body: &str) -> ReconcileOutcome {
    reconcile::apply_event(conn, &parse_event(body)).expect("Failed to apply event")
}
