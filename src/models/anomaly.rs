use serde::{Deserialize, Serialize};

/// A data-integrity anomaly flagged for manual review.
///
/// Anomalies are the operator queue: illegal transitions, capture amount
/// mismatches, and events whose order never materialized. The offending
/// event never mutates order state and is never silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: String,
    pub order_ref: Option<String>,
    pub event_id: Option<String>,
    pub kind: AnomalyKind,
    pub detail: String,
    pub created_at: i64,
    pub reviewed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    IllegalTransition,
    AmountMismatch,
    OrderNotFound,
    SubscriptionConflict,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IllegalTransition => "illegal_transition",
            Self::AmountMismatch => "amount_mismatch",
            Self::OrderNotFound => "order_not_found",
            Self::SubscriptionConflict => "subscription_conflict",
        }
    }
}

impl std::str::FromStr for AnomalyKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "illegal_transition" => Ok(Self::IllegalTransition),
            "amount_mismatch" => Ok(Self::AmountMismatch),
            "order_not_found" => Ok(Self::OrderNotFound),
            "subscription_conflict" => Ok(Self::SubscriptionConflict),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
