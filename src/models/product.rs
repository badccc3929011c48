use serde::{Deserialize, Serialize};

use super::{BillingPeriod, double_option};

/// A purchasable digital product. Billing fields only apply when
/// `billing_period` is set; licensing fields only when `licensing_enabled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub slug: String,
    /// Latest released version, served by the update manifest endpoint.
    pub version: String,
    pub price_cents: i64,
    pub currency: String,
    /// One-time fee added to the first payment of a subscription.
    pub signup_fee_cents: i64,
    /// Free trial length in days (0 = no trial).
    pub trial_days: i64,
    /// None = one-time purchase, no recurring billing.
    pub billing_period: Option<BillingPeriod>,
    /// Total number of payments before the subscription completes
    /// (0 = renew until cancelled).
    pub bill_times: i64,
    pub licensing_enabled: bool,
    /// Default activation limit for new licenses (0 = unlimited).
    pub activation_limit: i64,
    /// License term in days (None = lifetime).
    pub license_length_days: Option<i64>,
    pub changelog: Option<String>,
    /// Download URL handed to clients with a valid license.
    pub package_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateProduct {
    pub name: String,
    /// Defaults to a slugified form of the name.
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    pub price_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub signup_fee_cents: i64,
    #[serde(default)]
    pub trial_days: i64,
    #[serde(default)]
    pub billing_period: Option<BillingPeriod>,
    #[serde(default)]
    pub bill_times: i64,
    #[serde(default)]
    pub licensing_enabled: bool,
    #[serde(default)]
    pub activation_limit: i64,
    #[serde(default)]
    pub license_length_days: Option<i64>,
    #[serde(default)]
    pub changelog: Option<String>,
    #[serde(default)]
    pub package_url: Option<String>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_currency() -> String {
    "usd".to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProduct {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub price_cents: Option<i64>,
    #[serde(default)]
    pub signup_fee_cents: Option<i64>,
    #[serde(default)]
    pub trial_days: Option<i64>,
    #[serde(default)]
    pub bill_times: Option<i64>,
    #[serde(default)]
    pub licensing_enabled: Option<bool>,
    #[serde(default)]
    pub activation_limit: Option<i64>,
    /// `null` switches the product to lifetime licenses.
    #[serde(default, deserialize_with = "double_option")]
    pub license_length_days: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub changelog: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub package_url: Option<Option<String>>,
}
