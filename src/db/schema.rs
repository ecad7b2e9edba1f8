use rusqlite::Connection;

/// Initialize the database schema.
///
/// WAL mode keeps reconciliation writes crash-safe while the read-only
/// reporting pool sees consistent snapshots.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;

        -- Orders (authoritative purchase lifecycle)
        -- Amount/currency immutable after creation; status driven only by
        -- verified events. Rows are never deleted.
        -- shadow = 1 marks orders created by the reconciler for
        -- gateway-initiated flows (subscription charges).
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            amount INTEGER NOT NULL,
            currency TEXT NOT NULL,
            product_ref TEXT,
            status TEXT NOT NULL CHECK (status IN ('created', 'authorized', 'captured', 'fulfilled', 'failed', 'refunded', 'cancelled')),
            receipt TEXT,
            shadow INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            paid_at INTEGER,
            last_event_at INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
        CREATE INDEX IF NOT EXISTS idx_orders_created ON orders(created_at DESC);

        -- Payments (one row per gateway payment id, immutable, raw payload
        -- kept for audit). The primary key is the idempotency guard against
        -- duplicate payment rows.
        CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES orders(id),
            payload TEXT NOT NULL,
            received_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_payments_order ON payments(order_id);

        -- Webhook events (idempotency store). The gateway event id is the
        -- primary key; the atomic insert on this table is the single
        -- serialization point for duplicate deliveries.
        CREATE TABLE IF NOT EXISTS webhook_events (
            id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            received_at INTEGER NOT NULL,
            event_ts INTEGER NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('pending', 'processed', 'failed')),
            order_ref TEXT,
            outcome TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            processed_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_events_pending ON webhook_events(order_ref) WHERE status = 'pending';
        CREATE INDEX IF NOT EXISTS idx_webhook_events_received ON webhook_events(received_at);

        -- Refund ledger (partial refunds accumulate without changing order
        -- status; full coverage flips the order to 'refunded').
        CREATE TABLE IF NOT EXISTS refunds (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES orders(id),
            payment_id TEXT,
            amount INTEGER NOT NULL,
            received_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_refunds_order ON refunds(order_id);

        -- Subscriptions (exactly one billing-cycle window at a time;
        -- cancellation terminal).
        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            customer_ref TEXT,
            plan_id TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('active', 'paused', 'cancelled')),
            cycle_start INTEGER,
            cycle_end INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_status ON subscriptions(status);

        -- Anomalies (operator review queue - illegal transitions, amount
        -- mismatches, orphaned events).
        CREATE TABLE IF NOT EXISTS anomalies (
            id TEXT PRIMARY KEY,
            order_ref TEXT,
            event_id TEXT,
            kind TEXT NOT NULL CHECK (kind IN ('illegal_transition', 'amount_mismatch', 'order_not_found', 'subscription_conflict')),
            detail TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            reviewed INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_anomalies_unreviewed ON anomalies(created_at DESC) WHERE reviewed = 0;
        "#,
    )?;
    Ok(())
}
