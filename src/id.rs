//! Prefixed ID generation for Payline entities.
//!
//! Internal IDs use a `pl_` brand prefix to guarantee collision avoidance
//! with gateway-assigned IDs (Razorpay's `order_`, `pay_`, `rfnd_`, `sub_`).
//! Gateway IDs are stored verbatim and never re-generated locally.
//!
//! Format: `pl_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &["pl_ord_", "pl_anm_"];

/// Validate that a string is a valid Payline prefixed ID.
///
/// This is a cheap check to reject garbage before hitting the database.
/// Validates format: `pl_{entity}_{32_hex_chars}`
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entity types that have prefixed IDs in Payline.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Order,
    Anomaly,
}

impl EntityType {
    /// Returns the prefix for this entity type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Order => "pl_ord",
            Self::Anomaly => "pl_anm",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
