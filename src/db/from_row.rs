//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors instead of panicking on corrupted rows.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const ORDER_COLS: &str =
    "id, amount, currency, product_ref, status, receipt, shadow, created_at, paid_at, last_event_at";

pub const PAYMENT_COLS: &str = "id, order_id, payload, received_at";

pub const EVENT_COLS: &str = "id, event_type, payload, received_at, event_ts, status, order_ref, outcome, attempts, last_error, processed_at";

pub const REFUND_COLS: &str = "id, order_id, payment_id, amount, received_at";

pub const SUBSCRIPTION_COLS: &str =
    "id, customer_ref, plan_id, status, cycle_start, cycle_end, created_at, updated_at";

pub const ANOMALY_COLS: &str = "id, order_ref, event_id, kind, detail, created_at, reviewed";

// ============ FromRow Implementations ============

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get(0)?,
            amount: row.get(1)?,
            currency: row.get(2)?,
            product_ref: row.get(3)?,
            status: parse_enum(row, 4, "status")?,
            receipt: row.get(5)?,
            shadow: row.get::<_, i64>(6)? != 0,
            created_at: row.get(7)?,
            paid_at: row.get(8)?,
            last_event_at: row.get(9)?,
        })
    }
}

impl FromRow for Payment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Payment {
            id: row.get(0)?,
            order_id: row.get(1)?,
            payload: row.get(2)?,
            received_at: row.get(3)?,
        })
    }
}

impl FromRow for EventRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        // outcome is optional - parse it if present
        let outcome: Option<OrderStatus> = row
            .get::<_, Option<String>>(7)?
            .and_then(|s| s.parse().ok());
        Ok(EventRecord {
            id: row.get(0)?,
            event_type: row.get(1)?,
            payload: row.get(2)?,
            received_at: row.get(3)?,
            event_ts: row.get(4)?,
            status: parse_enum(row, 5, "status")?,
            order_ref: row.get(6)?,
            outcome,
            attempts: row.get(8)?,
            last_error: row.get(9)?,
            processed_at: row.get(10)?,
        })
    }
}

impl FromRow for Refund {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Refund {
            id: row.get(0)?,
            order_id: row.get(1)?,
            payment_id: row.get(2)?,
            amount: row.get(3)?,
            received_at: row.get(4)?,
        })
    }
}

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscription {
            id: row.get(0)?,
            customer_ref: row.get(1)?,
            plan_id: row.get(2)?,
            status: parse_enum(row, 3, "status")?,
            cycle_start: row.get(4)?,
            cycle_end: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

impl FromRow for Anomaly {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Anomaly {
            id: row.get(0)?,
            order_ref: row.get(1)?,
            event_id: row.get(2)?,
            kind: parse_enum(row, 3, "kind")?,
            detail: row.get(4)?,
            created_at: row.get(5)?,
            reviewed: row.get::<_, i64>(6)? != 0,
        })
    }
}
