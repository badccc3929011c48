use axum::extract::State;
use chrono::Utc;
use rusqlite::Connection;
use serde::Deserialize;

use crate::db::AppState;
use crate::db::cache::LicenseCache;
use crate::error::Result;
use crate::extractors::Json;
use crate::handlers::public::common::{KeyLookup, LicenseApiResponse, resolve_key};
use crate::licensing::{self, DeactivationOutcome};
use crate::models::LicenseStatus;

#[derive(Debug, Deserialize)]
pub struct DeactivateRequest {
    pub key: String,
    pub product_id: String,
    #[serde(default)]
    pub url: Option<String>,
}

pub async fn deactivate(
    State(state): State<AppState>,
    Json(req): Json<DeactivateRequest>,
) -> Result<Json<LicenseApiResponse>> {
    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;
    let response = process_deactivation(&tx, &state.cache, &req)?;
    tx.commit()?;
    Ok(Json(response))
}

fn process_deactivation(
    conn: &Connection,
    cache: &LicenseCache,
    req: &DeactivateRequest,
) -> Result<LicenseApiResponse> {
    let Some(site_url) = req
        .url
        .as_deref()
        .and_then(|u| licensing::normalize_site_url(u).ok())
    else {
        return Ok(LicenseApiResponse::failure("missing_url"));
    };

    let (license, product) = match resolve_key(conn, cache, &req.key, &req.product_id)? {
        KeyLookup::Match { license, product } => (license, product),
        KeyLookup::Unknown => return Ok(LicenseApiResponse::failure("missing")),
        KeyLookup::ProductMismatch => {
            return Ok(LicenseApiResponse::failure("invalid_item_id"));
        }
    };

    let license = licensing::refresh_expiry(conn, cache, &license, Utc::now().timestamp())?;
    if license.status == LicenseStatus::Disabled {
        return Ok(LicenseApiResponse::failure("disabled"));
    }

    // Expired licenses may still release their sites.
    match licensing::deactivate_site(conn, cache, &license, &site_url)? {
        DeactivationOutcome::Deactivated => {
            LicenseApiResponse::status(conn, &license, &product, "deactivated")
        }
        DeactivationOutcome::NotActive => Ok(LicenseApiResponse::failure("site_inactive")),
    }
}
