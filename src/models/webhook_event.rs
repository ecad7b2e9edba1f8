use serde::{Deserialize, Serialize};

use super::OrderStatus;

/// A received webhook event row. The gateway event ID is the primary key
/// and doubles as the idempotency key: re-delivery of an already-recorded
/// ID returns the stored outcome instead of re-applying side effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Gateway event ID (idempotency key).
    pub id: String,
    pub event_type: String,
    /// Raw webhook body as received.
    pub payload: String,
    pub received_at: i64,
    /// Gateway-supplied event timestamp, used for conflict ordering.
    pub event_ts: i64,
    pub status: WebhookStatus,
    /// Order the event resolved to (or references, while pending).
    pub order_ref: Option<String>,
    /// Order status after a successful application; replayed to duplicates.
    pub outcome: Option<OrderStatus>,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub processed_at: Option<i64>,
}

/// Processing state of a webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    /// Received but not yet applicable (e.g., order not created locally).
    Pending,
    Processed,
    Failed,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for WebhookStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
