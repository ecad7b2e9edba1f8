use serde::{Deserialize, Serialize};

/// A recurring-billing subscription. Exactly one billing-cycle window is
/// active at a time; renewal replaces the window. Cancellation is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Gateway-assigned subscription ID (e.g., "sub_...").
    pub id: String,
    pub customer_ref: Option<String>,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    pub cycle_start: Option<i64>,
    pub cycle_end: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
