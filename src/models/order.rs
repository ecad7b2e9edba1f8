use serde::{Deserialize, Serialize};

/// A purchase intent and its authoritative lifecycle state.
///
/// Amount and currency are immutable after creation; status only moves
/// through the transitions defined in `reconcile::state_machine`. Orders are
/// never deleted, only status-transitioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    /// Amount in minor units (paise for INR).
    pub amount: i64,
    /// ISO 4217 currency code (uppercase, e.g., "INR").
    pub currency: String,
    /// Product or plan reference this order was created for.
    pub product_ref: Option<String>,
    pub status: OrderStatus,
    pub receipt: Option<String>,
    /// Shadow orders are created by the reconciler for gateway-initiated
    /// flows (e.g., subscription charges) that precede local order creation.
    pub shadow: bool,
    pub created_at: i64,
    pub paid_at: Option<i64>,
    /// Gateway timestamp of the last applied status-affecting event.
    /// Conflicting events older than this are stale no-ops.
    pub last_event_at: i64,
}

/// Data required to create a new order.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrder {
    /// Caller-supplied order ID (e.g., the gateway order id). Generated
    /// with a `pl_ord_` prefix when absent.
    pub id: Option<String>,
    pub amount: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub product_ref: Option<String>,
    pub receipt: Option<String>,
}

fn default_currency() -> String {
    "INR".to_string()
}

/// Order lifecycle states.
///
/// Forward path: Created -> Authorized -> Captured -> Fulfilled.
/// Terminal alternates: Failed, Refunded, Cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Authorized,
    Captured,
    Fulfilled,
    Failed,
    Refunded,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Authorized => "authorized",
            Self::Captured => "captured",
            Self::Fulfilled => "fulfilled",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether a successful capture has been applied (possibly since
    /// fulfilled or refunded). Captured orders cannot retroactively fail.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Captured | Self::Fulfilled | Self::Refunded)
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "authorized" => Ok(Self::Authorized),
            "captured" => Ok(Self::Captured),
            "fulfilled" => Ok(Self::Fulfilled),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
