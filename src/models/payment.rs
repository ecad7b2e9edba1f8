use serde::{Deserialize, Serialize};

/// A gateway payment notification, stored once per gateway payment ID.
///
/// The raw payload is kept as an opaque blob for audit; rows are immutable
/// after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    /// Gateway-assigned payment ID (e.g., "pay_...").
    pub id: String,
    pub order_id: String,
    /// Raw gateway payment entity as received (JSON).
    pub payload: String,
    pub received_at: i64,
}
