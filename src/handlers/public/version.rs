use axum::extract::State;
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::AppState;
use crate::db::cache::LicenseCache;
use crate::db::queries;
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Query};
use crate::id;
use crate::licensing;
use crate::models::{LicenseStatus, Product};

#[derive(Debug, Deserialize)]
pub struct VersionQuery {
    #[serde(default)]
    pub key: Option<String>,
    pub product_id: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Update manifest in the shape self-updating installs expect.
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub name: String,
    pub slug: String,
    pub new_version: String,
    pub last_updated: i64,
    pub sections: VersionSections,
    /// Download URL, only for callers holding a usable key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VersionSections {
    pub changelog: String,
}

pub async fn version(
    State(state): State<AppState>,
    Query(q): Query<VersionQuery>,
) -> Result<Json<VersionResponse>> {
    // Malformed ids never hit the database.
    if !id::is_valid_prefixed_id(&q.product_id) {
        return Err(AppError::NotFound(msg::PRODUCT_NOT_FOUND.into()));
    }

    let conn = state.db.get()?;
    let product = queries::get_product_by_id(&conn, &q.product_id)?
        .or_not_found(msg::PRODUCT_NOT_FOUND)?;

    let entitled = match q.key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        Some(key) => key_entitles(&conn, &state.cache, key, &product, q.url.as_deref())?,
        None => false,
    };

    Ok(Json(VersionResponse {
        package: entitled.then_some(product.package_url).flatten(),
        name: product.name,
        slug: product.slug,
        new_version: product.version,
        last_updated: product.updated_at,
        sections: VersionSections {
            changelog: product.changelog.unwrap_or_default(),
        },
    }))
}

/// A key entitles the caller to the package when it matches the product, is
/// not disabled, and has not lapsed. Checks in during the lookup when the
/// install's url matches an activation.
fn key_entitles(
    conn: &Connection,
    cache: &LicenseCache,
    key: &str,
    product: &Product,
    url: Option<&str>,
) -> Result<bool> {
    let Some(license) = licensing::load_license_by_key(conn, cache, key)? else {
        return Ok(false);
    };
    if license.product_id != product.id {
        return Ok(false);
    }
    let license = licensing::refresh_expiry(conn, cache, &license, Utc::now().timestamp())?;
    if matches!(
        license.status,
        LicenseStatus::Disabled | LicenseStatus::Expired
    ) {
        return Ok(false);
    }

    if let Some(normalized) = url.and_then(|u| licensing::normalize_site_url(u).ok())
        && let Some(activation) = queries::get_activation(conn, &license.id, &normalized)?
    {
        queries::touch_activation_last_seen(conn, &activation.id)?;
    }
    Ok(true)
}
