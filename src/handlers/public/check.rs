use axum::extract::State;
use chrono::Utc;
use rusqlite::Connection;
use serde::Deserialize;

use crate::db::AppState;
use crate::db::cache::LicenseCache;
use crate::db::queries;
use crate::error::Result;
use crate::extractors::Json;
use crate::handlers::public::common::{KeyLookup, LicenseApiResponse, resolve_key};
use crate::licensing;
use crate::models::LicenseStatus;

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub key: String,
    pub product_id: String,
    /// Narrows the answer to one install (`valid` vs `site_inactive`).
    #[serde(default)]
    pub url: Option<String>,
}

pub async fn check(
    State(state): State<AppState>,
    Json(req): Json<CheckRequest>,
) -> Result<Json<LicenseApiResponse>> {
    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;
    let response = process_check(&tx, &state.cache, &req)?;
    tx.commit()?;
    Ok(Json(response))
}

fn process_check(
    conn: &Connection,
    cache: &LicenseCache,
    req: &CheckRequest,
) -> Result<LicenseApiResponse> {
    let (license, product) = match resolve_key(conn, cache, &req.key, &req.product_id)? {
        KeyLookup::Match { license, product } => (license, product),
        KeyLookup::Unknown | KeyLookup::ProductMismatch => {
            return Ok(LicenseApiResponse::invalid());
        }
    };

    let license = licensing::refresh_expiry(conn, cache, &license, Utc::now().timestamp())?;

    // None = no url supplied, Some(None) = url supplied but not activated
    // (unparseable urls count as not activated).
    let site_match = match req.url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(raw) => match licensing::normalize_site_url(raw) {
            Ok(normalized) => Some(queries::get_activation(conn, &license.id, &normalized)?),
            Err(_) => Some(None),
        },
        None => None,
    };
    if let Some(Some(activation)) = &site_match {
        queries::touch_activation_last_seen(conn, &activation.id)?;
    }

    let state = if license.status == LicenseStatus::Disabled {
        "disabled"
    } else if license.status == LicenseStatus::Expired {
        "expired"
    } else {
        match &site_match {
            Some(Some(_)) => "valid",
            Some(None) => "site_inactive",
            None if license.status == LicenseStatus::Active => "valid",
            None => "inactive",
        }
    };
    LicenseApiResponse::status(conn, &license, &product, state)
}
