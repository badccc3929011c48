//! Shared plumbing for the public license API.
//!
//! All four operations resolve a `(key, product_id)` claim the same way and
//! answer with the same envelope. Failures stay inside the envelope with
//! `success: false`; HTTP errors are reserved for transport problems, so an
//! installed client can always parse the body.

use rusqlite::Connection;
use serde::Serialize;

use crate::db::cache::LicenseCache;
use crate::db::queries;
use crate::error::{OptionExt, Result, msg};
use crate::licensing;
use crate::models::{License, Product};

/// Response envelope for activate, deactivate, and check. Absent fields are
/// skipped so failure bodies stay terse.
#[derive(Debug, Serialize)]
pub struct LicenseApiResponse {
    pub success: bool,
    /// License state string (`valid`, `deactivated`, `expired`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<&'static str>,
    /// Failure code (`missing`, `no_activations_left`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    /// Unix expiration; absent means the license never expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_count: Option<i64>,
    /// 0 = unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_limit: Option<i64>,
    /// Absent when the limit is unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activations_left: Option<i64>,
}

impl LicenseApiResponse {
    pub fn failure(error: &'static str) -> Self {
        Self {
            success: false,
            license: None,
            error: Some(error),
            expires: None,
            site_count: None,
            activation_limit: None,
            activations_left: None,
        }
    }

    /// `expired` failures carry the lapsed date so the client can show it.
    pub fn expired(expires: Option<i64>) -> Self {
        Self {
            expires,
            ..Self::failure("expired")
        }
    }

    /// Unknown key or wrong product on /check.
    pub fn invalid() -> Self {
        Self {
            success: false,
            license: Some("invalid"),
            error: None,
            expires: None,
            site_count: None,
            activation_limit: None,
            activations_left: None,
        }
    }

    /// Successful answer carrying the license state plus activation
    /// accounting.
    pub fn status(
        conn: &Connection,
        license: &License,
        product: &Product,
        state: &'static str,
    ) -> Result<Self> {
        let site_count = queries::count_site_activations(conn, &license.id)?;
        let limit = license.effective_activation_limit(product);
        Ok(Self {
            success: true,
            license: Some(state),
            error: None,
            expires: license.expiration,
            site_count: Some(site_count),
            activation_limit: Some(limit),
            activations_left: (limit > 0).then(|| (limit - site_count).max(0)),
        })
    }
}

/// How a `(key, product_id)` claim resolved.
pub enum KeyLookup {
    /// Key exists and belongs to the claimed product.
    Match { license: License, product: Product },
    /// No such key.
    Unknown,
    /// Key exists but belongs to a different product.
    ProductMismatch,
}

pub fn resolve_key(
    conn: &Connection,
    cache: &LicenseCache,
    key: &str,
    product_id: &str,
) -> Result<KeyLookup> {
    let Some(license) = licensing::load_license_by_key(conn, cache, key.trim())? else {
        return Ok(KeyLookup::Unknown);
    };
    if license.product_id != product_id {
        return Ok(KeyLookup::ProductMismatch);
    }
    let product = queries::get_product_by_id(conn, &license.product_id)?
        .or_not_found(msg::PRODUCT_NOT_FOUND)?;
    Ok(KeyLookup::Match {
        license: (*license).clone(),
        product,
    })
}
