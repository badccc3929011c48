//! Admin API-key authentication.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::db::{AppState, queries};
use crate::models::ApiKey;
use crate::util::extract_bearer_token;

/// The authenticated key record, attached to the request for handlers
/// that need it (key revocation guards itself against it).
#[derive(Clone)]
pub struct AdminContext {
    pub api_key: ApiKey,
}

/// Authenticate `Authorization: Bearer bh_key_...` against the hashed
/// key store. Keys are compared by salted SHA-256 hash, so the lookup
/// itself leaks nothing about how much of a guessed key matched.
pub async fn admin_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer_token(request.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    // The connection goes back to the pool before the handler runs.
    let api_key = {
        let conn = state
            .db
            .get()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let api_key = queries::get_api_key_by_hash(&conn, &queries::hash_api_key(token))
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        // Best-effort bookkeeping; never fails the request.
        if let Err(e) = queries::touch_api_key_last_used(&conn, &api_key.id) {
            tracing::warn!(error = %e, "Failed to update API key last_used_at");
        }
        api_key
    };

    request.extensions_mut().insert(AdminContext { api_key });
    Ok(next.run(request).await)
}
