use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::{AppError, Result};
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    query_all, query_one, ANOMALY_COLS, EVENT_COLS, ORDER_COLS, PAYMENT_COLS, REFUND_COLS,
    SUBSCRIPTION_COLS,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Orders ============

pub fn create_order(conn: &Connection, input: &CreateOrder) -> Result<Order> {
    if input.amount <= 0 {
        return Err(AppError::BadRequest("amount must be positive".into()));
    }
    if input.currency.len() != 3 {
        return Err(AppError::BadRequest("currency must be a 3-letter code".into()));
    }

    let id = input
        .id
        .clone()
        .unwrap_or_else(|| EntityType::Order.gen_id());
    let created_at = now();

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO orders (id, amount, currency, product_ref, status, receipt, shadow, created_at, last_event_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, 0)",
        params![
            id,
            input.amount,
            input.currency.to_uppercase(),
            input.product_ref,
            OrderStatus::Created.as_str(),
            input.receipt,
            created_at,
        ],
    )?;
    if inserted == 0 {
        return Err(AppError::Conflict(format!("order already exists: {}", id)));
    }

    get_order(conn, &id)?.ok_or_else(|| AppError::Internal("order vanished after insert".into()))
}

/// Create a minimal shadow order for a gateway-initiated flow. The order is
/// born already settled (the gateway charged before we ever saw an intent).
pub fn create_shadow_order(
    conn: &Connection,
    id: &str,
    amount: i64,
    currency: &str,
    event_ts: i64,
) -> Result<Order> {
    conn.execute(
        "INSERT INTO orders (id, amount, currency, status, shadow, created_at, paid_at, last_event_at)
         VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5, ?6)",
        params![
            id,
            amount,
            currency.to_uppercase(),
            OrderStatus::Captured.as_str(),
            now(),
            event_ts,
        ],
    )?;

    get_order(conn, id)?.ok_or_else(|| AppError::Internal("order vanished after insert".into()))
}

pub fn get_order(conn: &Connection, id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
        &[&id],
    )
}

/// Apply a status transition. `paid_at` is set on capture and left alone
/// otherwise; `event_ts` advances the order's conflict-ordering watermark.
pub fn update_order_status(
    conn: &Connection,
    id: &str,
    status: OrderStatus,
    paid_at: Option<i64>,
    event_ts: i64,
) -> Result<()> {
    let affected = conn.execute(
        "UPDATE orders
         SET status = ?2,
             paid_at = COALESCE(?3, paid_at),
             last_event_at = MAX(last_event_at, ?4)
         WHERE id = ?1",
        params![id, status.as_str(), paid_at, event_ts],
    )?;
    if affected == 0 {
        return Err(AppError::NotFound(format!("order not found: {}", id)));
    }
    Ok(())
}

pub fn list_orders(conn: &Connection, status: Option<OrderStatus>, limit: i64) -> Result<Vec<Order>> {
    match status {
        Some(s) => query_all(
            conn,
            &format!(
                "SELECT {} FROM orders WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2",
                ORDER_COLS
            ),
            &[&s.as_str(), &limit],
        ),
        None => query_all(
            conn,
            &format!("SELECT {} FROM orders ORDER BY created_at DESC LIMIT ?1", ORDER_COLS),
            &[&limit],
        ),
    }
}

// ============ Payments ============

/// Insert a payment row, keyed by the gateway payment id. Returns false if
/// the row already existed (at most one row per gateway payment ID).
pub fn insert_payment(conn: &Connection, id: &str, order_id: &str, payload: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO payments (id, order_id, payload, received_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![id, order_id, payload, now()],
    )?;
    Ok(inserted > 0)
}

pub fn get_payment(conn: &Connection, id: &str) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payments WHERE id = ?1", PAYMENT_COLS),
        &[&id],
    )
}

pub fn payments_for_order(conn: &Connection, order_id: &str) -> Result<Vec<Payment>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE order_id = ?1 ORDER BY received_at",
            PAYMENT_COLS
        ),
        &[&order_id],
    )
}

/// Most recent payment for an order (used to route operator-initiated
/// refund requests to the gateway).
pub fn latest_payment_for_order(conn: &Connection, order_id: &str) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE order_id = ?1 ORDER BY received_at DESC LIMIT 1",
            PAYMENT_COLS
        ),
        &[&order_id],
    )
}

// ============ Webhook events (idempotency store) ============

/// Atomically record a webhook event. Returns `None` when this call won the
/// insert (first delivery), or the existing row when the event id was
/// already recorded. The unique constraint on the primary key is the sole
/// serialization point for concurrent duplicate deliveries.
pub fn try_record_webhook_event(
    conn: &Connection,
    id: &str,
    event_type: &str,
    payload: &str,
    event_ts: i64,
) -> Result<Option<EventRecord>> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (id, event_type, payload, received_at, event_ts, status, attempts)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0)",
        params![id, event_type, payload, now(), event_ts],
    )?;
    if inserted > 0 {
        return Ok(None);
    }
    get_webhook_event(conn, id)
}

pub fn get_webhook_event(conn: &Connection, id: &str) -> Result<Option<EventRecord>> {
    query_one(
        conn,
        &format!("SELECT {} FROM webhook_events WHERE id = ?1", EVENT_COLS),
        &[&id],
    )
}

pub fn mark_event_processed(
    conn: &Connection,
    id: &str,
    order_ref: Option<&str>,
    outcome: Option<OrderStatus>,
) -> Result<()> {
    conn.execute(
        "UPDATE webhook_events
         SET status = 'processed', order_ref = COALESCE(?2, order_ref),
             outcome = ?3, processed_at = ?4, last_error = NULL
         WHERE id = ?1",
        params![id, order_ref, outcome.map(|s| s.as_str()), now()],
    )?;
    Ok(())
}

/// Keep the event queued for retry, bumping the attempt counter.
pub fn mark_event_pending(
    conn: &Connection,
    id: &str,
    order_ref: Option<&str>,
    error: &str,
) -> Result<i64> {
    conn.execute(
        "UPDATE webhook_events
         SET status = 'pending', order_ref = COALESCE(?2, order_ref),
             attempts = attempts + 1, last_error = ?3
         WHERE id = ?1",
        params![id, order_ref, error],
    )?;
    conn.query_row(
        "SELECT attempts FROM webhook_events WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

pub fn mark_event_failed(
    conn: &Connection,
    id: &str,
    order_ref: Option<&str>,
    error: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE webhook_events
         SET status = 'failed', order_ref = COALESCE(?2, order_ref),
             last_error = ?3, processed_at = ?4
         WHERE id = ?1",
        params![id, order_ref, error, now()],
    )?;
    Ok(())
}

pub fn pending_events_for_order(conn: &Connection, order_ref: &str) -> Result<Vec<EventRecord>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM webhook_events WHERE status = 'pending' AND order_ref = ?1 ORDER BY event_ts",
            EVENT_COLS
        ),
        &[&order_ref],
    )
}

pub fn pending_events(conn: &Connection, limit: i64) -> Result<Vec<EventRecord>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM webhook_events WHERE status = 'pending' ORDER BY event_ts LIMIT ?1",
            EVENT_COLS
        ),
        &[&limit],
    )
}

/// Prune processed/failed webhook events past the redelivery retention
/// window. Pending events are kept regardless of age.
pub fn prune_webhook_events(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - retention_days * 86400;
    let deleted = conn.execute(
        "DELETE FROM webhook_events WHERE status != 'pending' AND received_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

// ============ Refunds ============

/// Insert a refund ledger row. Returns false if the gateway refund id was
/// already recorded.
pub fn insert_refund(
    conn: &Connection,
    id: &str,
    order_id: &str,
    payment_id: Option<&str>,
    amount: i64,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO refunds (id, order_id, payment_id, amount, received_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, order_id, payment_id, amount, now()],
    )?;
    Ok(inserted > 0)
}

pub fn total_refunded(conn: &Connection, order_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM refunds WHERE order_id = ?1",
        params![order_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

pub fn refunds_for_order(conn: &Connection, order_id: &str) -> Result<Vec<Refund>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM refunds WHERE order_id = ?1 ORDER BY received_at",
            REFUND_COLS
        ),
        &[&order_id],
    )
}

// ============ Subscriptions ============

pub fn get_subscription(conn: &Connection, id: &str) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!("SELECT {} FROM subscriptions WHERE id = ?1", SUBSCRIPTION_COLS),
        &[&id],
    )
}

/// Create a subscription row. Returns false if the id already exists.
pub fn insert_subscription(
    conn: &Connection,
    id: &str,
    customer_ref: Option<&str>,
    plan_id: &str,
    cycle_start: Option<i64>,
    cycle_end: Option<i64>,
) -> Result<bool> {
    let ts = now();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO subscriptions (id, customer_ref, plan_id, status, cycle_start, cycle_end, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            id,
            customer_ref,
            plan_id,
            SubscriptionStatus::Active.as_str(),
            cycle_start,
            cycle_end,
            ts,
        ],
    )?;
    Ok(inserted > 0)
}

pub fn update_subscription_status(
    conn: &Connection,
    id: &str,
    status: SubscriptionStatus,
) -> Result<()> {
    let affected = conn.execute(
        "UPDATE subscriptions SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, status.as_str(), now()],
    )?;
    if affected == 0 {
        return Err(AppError::NotFound(format!("subscription not found: {}", id)));
    }
    Ok(())
}

/// Advance the billing-cycle window. The old window is replaced wholesale,
/// keeping exactly one active window per subscription.
pub fn renew_subscription(
    conn: &Connection,
    id: &str,
    cycle_start: Option<i64>,
    cycle_end: Option<i64>,
) -> Result<()> {
    let affected = conn.execute(
        "UPDATE subscriptions SET cycle_start = ?2, cycle_end = ?3, updated_at = ?4 WHERE id = ?1",
        params![id, cycle_start, cycle_end, now()],
    )?;
    if affected == 0 {
        return Err(AppError::NotFound(format!("subscription not found: {}", id)));
    }
    Ok(())
}

pub fn list_subscriptions(
    conn: &Connection,
    status: Option<SubscriptionStatus>,
    limit: i64,
) -> Result<Vec<Subscription>> {
    match status {
        Some(s) => query_all(
            conn,
            &format!(
                "SELECT {} FROM subscriptions WHERE status = ?1 ORDER BY updated_at DESC LIMIT ?2",
                SUBSCRIPTION_COLS
            ),
            &[&s.as_str(), &limit],
        ),
        None => query_all(
            conn,
            &format!(
                "SELECT {} FROM subscriptions ORDER BY updated_at DESC LIMIT ?1",
                SUBSCRIPTION_COLS
            ),
            &[&limit],
        ),
    }
}

// ============ Anomalies ============

pub fn create_anomaly(
    conn: &Connection,
    kind: AnomalyKind,
    order_ref: Option<&str>,
    event_id: Option<&str>,
    detail: &str,
) -> Result<Anomaly> {
    let id = EntityType::Anomaly.gen_id();
    conn.execute(
        "INSERT INTO anomalies (id, order_ref, event_id, kind, detail, created_at, reviewed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
        params![id, order_ref, event_id, kind.as_str(), detail, now()],
    )?;

    tracing::warn!(
        kind = kind.as_str(),
        order_ref = order_ref.unwrap_or("-"),
        event_id = event_id.unwrap_or("-"),
        "anomaly recorded: {}",
        detail
    );

    query_one::<Anomaly>(
        conn,
        &format!("SELECT {} FROM anomalies WHERE id = ?1", ANOMALY_COLS),
        &[&id],
    )?
    .ok_or_else(|| AppError::Internal("anomaly vanished after insert".into()))
}

pub fn list_anomalies(conn: &Connection, include_reviewed: bool, limit: i64) -> Result<Vec<Anomaly>> {
    if include_reviewed {
        query_all(
            conn,
            &format!("SELECT {} FROM anomalies ORDER BY created_at DESC LIMIT ?1", ANOMALY_COLS),
            &[&limit],
        )
    } else {
        query_all(
            conn,
            &format!(
                "SELECT {} FROM anomalies WHERE reviewed = 0 ORDER BY created_at DESC LIMIT ?1",
                ANOMALY_COLS
            ),
            &[&limit],
        )
    }
}

// ============ Maintenance / integrity ============

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    // Table names cannot be bound parameters; restrict to known tables.
    const KNOWN: &[&str] = &[
        "orders",
        "payments",
        "webhook_events",
        "refunds",
        "subscriptions",
        "anomalies",
    ];
    if !KNOWN.contains(&table) {
        return Err(AppError::Internal(format!("unknown table: {}", table)));
    }
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        init_db(&conn).expect("init schema");
        conn
    }

    #[test]
    fn test_create_order_rejects_bad_input() {
        let conn = test_conn();
        let mut input = CreateOrder {
            id: None,
            amount: 0,
            currency: "INR".into(),
            product_ref: None,
            receipt: None,
        };
        assert!(create_order(&conn, &input).is_err());

        input.amount = 49900;
        input.currency = "RUPEES".into();
        assert!(create_order(&conn, &input).is_err());
    }

    #[test]
    fn test_create_order_duplicate_id_conflicts() {
        let conn = test_conn();
        let input = CreateOrder {
            id: Some("order_dup".into()),
            amount: 1000,
            currency: "INR".into(),
            product_ref: None,
            receipt: None,
        };
        create_order(&conn, &input).expect("first create");
        let err = create_order(&conn, &input).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_webhook_event_insert_is_idempotent() {
        let conn = test_conn();
        let first = try_record_webhook_event(&conn, "evt_1", "payment.captured", "{}", 100)
            .expect("record");
        assert!(first.is_none(), "first delivery wins the insert");

        let second = try_record_webhook_event(&conn, "evt_1", "payment.captured", "{}", 100)
            .expect("record");
        let record = second.expect("duplicate sees the stored row");
        assert_eq!(record.status, WebhookStatus::Pending);
    }

    #[test]
    fn test_payment_row_unique_per_gateway_id() {
        let conn = test_conn();
        let order = create_order(
            &conn,
            &CreateOrder {
                id: Some("order_1".into()),
                amount: 49900,
                currency: "INR".into(),
                product_ref: None,
                receipt: None,
            },
        )
        .expect("create order");

        assert!(insert_payment(&conn, "pay_1", &order.id, "{}").expect("insert"));
        assert!(!insert_payment(&conn, "pay_1", &order.id, "{}").expect("insert"));
        assert_eq!(payments_for_order(&conn, &order.id).expect("list").len(), 1);
    }

    #[test]
    fn test_refund_ledger_sums() {
        let conn = test_conn();
        create_order(
            &conn,
            &CreateOrder {
                id: Some("order_2".into()),
                amount: 49900,
                currency: "INR".into(),
                product_ref: None,
                receipt: None,
            },
        )
        .expect("create order");

        insert_refund(&conn, "rfnd_1", "order_2", Some("pay_1"), 10000).expect("refund");
        insert_refund(&conn, "rfnd_2", "order_2", Some("pay_1"), 5000).expect("refund");
        // Duplicate refund id is ignored
        assert!(!insert_refund(&conn, "rfnd_1", "order_2", None, 10000).expect("refund"));

        assert_eq!(total_refunded(&conn, "order_2").expect("sum"), 15000);
    }
}
