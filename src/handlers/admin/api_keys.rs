use axum::extract::{Extension, State};

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path};
use crate::middleware::AdminContext;
use crate::models::{ApiKey, CreateApiKey, CreatedApiKey};

/// Mint a new admin key. The plaintext is in this response and nowhere
/// else; only the hash is stored.
pub async fn create_api_key(
    State(state): State<AppState>,
    Json(input): Json<CreateApiKey>,
) -> Result<Json<CreatedApiKey>> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name is required".into()));
    }

    let conn = state.db.get()?;
    let (api_key, key) = queries::create_api_key(&conn, name)?;
    Ok(Json(CreatedApiKey { api_key, key }))
}

pub async fn list_api_keys(State(state): State<AppState>) -> Result<Json<Vec<ApiKey>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::list_api_keys(&conn)?))
}

/// Revoke a key. Refused when it would leave the admin API with no active
/// keys at all.
pub async fn revoke_api_key(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    let target = queries::get_api_key_by_id(&conn, &id)?.or_not_found(msg::API_KEY_NOT_FOUND)?;
    if target.revoked_at.is_some() {
        return Err(AppError::BadRequest("API key is already revoked".into()));
    }
    if queries::count_active_api_keys(&conn)? <= 1 {
        return Err(AppError::BadRequest(
            "Cannot revoke the last active API key".into(),
        ));
    }

    queries::revoke_api_key(&conn, &id)?;
    tracing::info!(revoked = %id, by = %ctx.api_key.id, "API key revoked");
    Ok(Json(serde_json::json!({ "success": true })))
}
