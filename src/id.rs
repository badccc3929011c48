//! Prefixed ID generation for billhook entities.
//!
//! All IDs use a `bh_` brand prefix to guarantee collision avoidance with
//! gateway-issued IDs (PayPal's `I-...` billing agreements, transaction ids).
//!
//! Format: `bh_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &[
    "bh_cus_",
    "bh_prod_",
    "bh_sub_",
    "bh_pay_",
    "bh_lic_",
    "bh_meta_",
    "bh_act_",
    "bh_key_",
];

/// Validate that a string is a valid billhook prefixed ID.
///
/// This is a cheap check to reject garbage before hitting the database.
/// Validates format: `bh_{entity}_{32_hex_chars}`
pub fn is_valid_prefixed_id(s: &str) -> bool {
    // Must start with a known prefix
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    // Get the hex part after the prefix
    let hex_part = &s[prefix.len()..];

    // Must be exactly 32 hex characters
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entity types that have prefixed IDs in billhook.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Customer,
    Product,
    Subscription,
    Payment,
    License,
    LicenseMeta,
    Activation,
    ApiKey,
}

impl EntityType {
    /// Returns the prefix for this entity type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Customer => "bh_cus",
            Self::Product => "bh_prod",
            Self::Subscription => "bh_sub",
            Self::Payment => "bh_pay",
            Self::License => "bh_lic",
            Self::LicenseMeta => "bh_meta",
            Self::Activation => "bh_act",
            Self::ApiKey => "bh_key",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
