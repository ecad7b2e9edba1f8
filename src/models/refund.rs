use serde::{Deserialize, Serialize};

/// A refund ledger entry.
///
/// Partial refunds accumulate here without changing the order status; once
/// the cumulative refunded amount covers the order amount the order itself
/// flips to `Refunded`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    /// Gateway-assigned refund ID (e.g., "rfnd_...").
    pub id: String,
    pub order_id: String,
    /// Gateway payment the refund was issued against.
    pub payment_id: Option<String>,
    /// Refunded amount in minor units.
    pub amount: i64,
    pub received_at: i64,
}
