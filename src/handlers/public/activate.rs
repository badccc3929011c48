use axum::extract::State;
use chrono::Utc;
use rusqlite::Connection;
use serde::Deserialize;

use crate::db::AppState;
use crate::db::cache::LicenseCache;
use crate::error::Result;
use crate::extractors::Json;
use crate::handlers::public::common::{KeyLookup, LicenseApiResponse, resolve_key};
use crate::licensing::{self, ActivationOutcome};
use crate::models::LicenseStatus;

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub key: String,
    pub product_id: String,
    #[serde(default)]
    pub url: Option<String>,
}

pub async fn activate(
    State(state): State<AppState>,
    Json(req): Json<ActivateRequest>,
) -> Result<Json<LicenseApiResponse>> {
    let mut conn = state.db.get()?;
    // One transaction so the lazy expiry flip, the activation row, and the
    // status change land together.
    let tx = conn.transaction()?;
    let response = process_activation(&tx, &state.cache, &req)?;
    tx.commit()?;
    Ok(Json(response))
}

fn process_activation(
    conn: &Connection,
    cache: &LicenseCache,
    req: &ActivateRequest,
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
    if license.status == LicenseStatus::Expired {
        return Ok(LicenseApiResponse::expired(license.expiration));
    }

    match licensing::activate_site(conn, cache, &license, &product, &site_url)? {
        ActivationOutcome::Activated(_) | ActivationOutcome::AlreadyActive(_) => {
            LicenseApiResponse::status(conn, &license, &product, "valid")
        }
        ActivationOutcome::LimitReached => {
            Ok(LicenseApiResponse::failure("no_activations_left"))
        }
    }
}
