use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::{Activation, Product, double_option};

/// License states as stored. `inactive` means no site is activated yet;
/// the first activation flips it to `active`. `expired` is set lazily on
/// read and persistently by the maintenance sweep. `disabled` is the admin
/// kill-switch and wins over everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LicenseStatus {
    Inactive,
    Active,
    Expired,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    /// The key itself is the credential installs present; it is shown in
    /// receipts and the admin API, so it is stored as-is.
    pub key: String,
    pub customer_id: String,
    pub product_id: String,
    /// Set when the license was issued by a subscription; renewals extend it.
    pub subscription_id: Option<String>,
    pub status: LicenseStatus,
    /// Per-license override (None = inherit product, 0 = unlimited).
    pub activation_limit: Option<i64>,
    /// None = lifetime.
    pub expiration: Option<i64>,
    /// Timestamped history of license events, newest last.
    pub notes: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl License {
    /// Whether the license term has lapsed, regardless of stored status.
    pub fn is_expired(&self, now: i64) -> bool {
        self.status == LicenseStatus::Expired
            || self.expiration.is_some_and(|exp| exp < now)
    }

    /// Activation limit after applying the per-license override
    /// (0 = unlimited).
    pub fn effective_activation_limit(&self, product: &Product) -> i64 {
        self.activation_limit.unwrap_or(product.activation_limit)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LicenseWithProduct {
    #[serde(flatten)]
    pub license: License,
    pub product_name: String,
}

/// Full admin view of a license.
#[derive(Debug, Serialize)]
pub struct LicenseDetail {
    #[serde(flatten)]
    pub license: License,
    pub product_name: String,
    pub activations: Vec<Activation>,
    /// Counted activations (local sites excluded).
    pub site_count: i64,
    pub meta: Vec<LicenseMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseMeta {
    pub id: String,
    pub license_id: String,
    pub meta_key: String,
    pub meta_value: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateLicense {
    pub customer_id: String,
    pub product_id: String,
    #[serde(default)]
    pub subscription_id: Option<String>,
    /// Override the product's activation limit (0 = unlimited).
    #[serde(default)]
    pub activation_limit: Option<i64>,
    /// Override expiration (unix seconds, null = lifetime). Defaults to
    /// the product's license_length_days from now.
    #[serde(default, deserialize_with = "double_option")]
    pub expiration: Option<Option<i64>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateLicense {
    /// `null` removes the override and re-inherits the product limit.
    #[serde(default, deserialize_with = "double_option")]
    pub activation_limit: Option<Option<i64>>,
    /// `null` makes the license lifetime.
    #[serde(default, deserialize_with = "double_option")]
    pub expiration: Option<Option<i64>>,
}
