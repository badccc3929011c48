use axum::extract::State;
use chrono::Utc;
use serde::Deserialize;

use crate::db::queries::LicenseFilters;
use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::licensing;
use crate::models::{
    CreateLicense, License, LicenseDetail, LicenseMeta, LicenseStatus, LicenseWithProduct,
    UpdateLicense,
};
use crate::pagination::Paginated;
use crate::util::SECONDS_PER_DAY;

/// Issue a license by hand (comps, migrated customers, support). Purchases
/// go through the billing engine instead.
pub async fn create_license(
    State(state): State<AppState>,
    Json(input): Json<CreateLicense>,
) -> Result<Json<License>> {
    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    let customer = queries::get_customer_by_id(&tx, &input.customer_id)?
        .or_not_found(msg::CUSTOMER_NOT_FOUND)?;
    let product = queries::get_product_by_id(&tx, &input.product_id)?
        .or_not_found(msg::PRODUCT_NOT_FOUND)?;
    if !product.licensing_enabled {
        return Err(AppError::BadRequest(
            "Product does not have licensing enabled".into(),
        ));
    }

    let subscription = match input.subscription_id {
        Some(ref sid) => {
            let sub = queries::get_subscription_by_id(&tx, sid)?
                .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?;
            if sub.customer_id != customer.id || sub.product_id != product.id {
                return Err(AppError::BadRequest(
                    "Subscription belongs to a different customer or product".into(),
                ));
            }
            Some(sub)
        }
        None => None,
    };

    let expiration = match input.expiration {
        // Explicit override, `null` meaning lifetime.
        Some(exp) => exp,
        None => match subscription {
            Some(ref sub) => sub.expiration,
            None => product
                .license_length_days
                .map(|days| Utc::now().timestamp() + days * SECONDS_PER_DAY),
        },
    };

    let license = queries::create_license(
        &tx,
        &queries::NewLicense {
            key: queries::generate_license_key(),
            customer_id: customer.id.clone(),
            product_id: product.id.clone(),
            subscription_id: subscription.as_ref().map(|s| s.id.clone()),
            activation_limit: input.activation_limit,
            expiration,
        },
    )?;
    queries::add_license_note(&tx, &license.id, "License issued")?;
    tx.commit()?;
    Ok(Json(license))
}

#[derive(Debug, Deserialize)]
pub struct ListLicensesQuery {
    pub status: Option<LicenseStatus>,
    pub customer_id: Option<String>,
    pub product_id: Option<String>,
    /// Exact key lookup (support: customer pastes their key).
    pub key: Option<String>,
    /// Meta search; both must be supplied to take effect.
    pub meta_key: Option<String>,
    pub meta_value: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListLicensesQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 100)
    }

    fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

pub async fn list_licenses(
    State(state): State<AppState>,
    Query(query): Query<ListLicensesQuery>,
) -> Result<Json<Paginated<LicenseWithProduct>>> {
    let conn = state.db.get()?;
    let limit = query.limit();
    let offset = query.offset();

    let filters = LicenseFilters {
        status: query.status,
        customer_id: query.customer_id,
        product_id: query.product_id,
        key: query.key,
        meta: query.meta_key.zip(query.meta_value),
    };
    let (items, total) = queries::list_licenses_paginated(&conn, &filters, limit, offset)?;
    Ok(Json(Paginated::new(items, total, limit, offset)))
}

pub async fn get_license(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LicenseDetail>> {
    let conn = state.db.get()?;
    let license = queries::get_license_by_id(&conn, &id)?.or_not_found(msg::LICENSE_NOT_FOUND)?;
    let product = queries::get_product_by_id(&conn, &license.product_id)?
        .or_not_found(msg::PRODUCT_NOT_FOUND)?;
    let activations = queries::list_activations_for_license(&conn, &license.id)?;
    let site_count = queries::count_site_activations(&conn, &license.id)?;
    let meta = queries::list_license_meta(&conn, &license.id)?;

    Ok(Json(LicenseDetail {
        license,
        product_name: product.name,
        activations,
        site_count,
        meta,
    }))
}

/// Status values an admin can request directly. Everything else (`active`,
/// `inactive`, `expired`) is derived.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusAction {
    Disabled,
    Enabled,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLicenseBody {
    #[serde(flatten)]
    pub fields: UpdateLicense,
    #[serde(default)]
    pub status: Option<StatusAction>,
}

pub async fn update_license(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateLicenseBody>,
) -> Result<Json<License>> {
    if input
        .fields
        .activation_limit
        .is_some_and(|l| l.is_some_and(|v| v < 0))
    {
        return Err(AppError::BadRequest(
            "activation_limit must be non-negative".into(),
        ));
    }

    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;
    let existing = queries::get_license_by_id(&tx, &id)?.or_not_found(msg::LICENSE_NOT_FOUND)?;

    state.cache.invalidate_license(&existing.id);
    let mut license = match queries::update_license(&tx, &id, &input.fields)? {
        Some(license) => license,
        None => existing,
    };

    match input.status {
        Some(StatusAction::Disabled) => {
            license = licensing::disable_license(&tx, &state.cache, &license)?;
        }
        Some(StatusAction::Enabled) => {
            license = licensing::enable_license(&tx, &state.cache, &license)?;
        }
        None => {}
    }

    tx.commit()?;
    Ok(Json(license))
}

/// Extend the license by the product's term, from `max(expiration, now)`.
pub async fn renew_license(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<License>> {
    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    let license = queries::get_license_by_id(&tx, &id)?.or_not_found(msg::LICENSE_NOT_FOUND)?;
    let product = queries::get_product_by_id(&tx, &license.product_id)?
        .or_not_found(msg::PRODUCT_NOT_FOUND)?;
    let renewed = licensing::renew_license(&tx, &state.cache, &license, &product)?;
    tx.commit()?;
    Ok(Json(renewed))
}

pub async fn regenerate_license_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<License>> {
    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    let license = queries::get_license_by_id(&tx, &id)?.or_not_found(msg::LICENSE_NOT_FOUND)?;
    let updated = licensing::regenerate_key(&tx, &state.cache, &license)?;
    tx.commit()?;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct MetaPath {
    pub id: String,
    pub key: String,
}

pub async fn get_license_meta(
    State(state): State<AppState>,
    Path(path): Path<MetaPath>,
) -> Result<Json<LicenseMeta>> {
    let conn = state.db.get()?;
    queries::get_license_by_id(&conn, &path.id)?.or_not_found(msg::LICENSE_NOT_FOUND)?;
    let meta = queries::get_license_meta(&conn, &path.id, &path.key)?
        .or_not_found(msg::LICENSE_META_NOT_FOUND)?;
    Ok(Json(meta))
}

#[derive(Debug, Deserialize)]
pub struct SetMetaBody {
    pub value: String,
}

pub async fn set_license_meta(
    State(state): State<AppState>,
    Path(path): Path<MetaPath>,
    Json(input): Json<SetMetaBody>,
) -> Result<Json<LicenseMeta>> {
    let conn = state.db.get()?;
    queries::get_license_by_id(&conn, &path.id)?.or_not_found(msg::LICENSE_NOT_FOUND)?;

    state.cache.invalidate_license(&path.id);
    let meta = queries::upsert_license_meta(&conn, &path.id, &path.key, &input.value)?;
    Ok(Json(meta))
}

pub async fn delete_license_meta(
    State(state): State<AppState>,
    Path(path): Path<MetaPath>,
) -> Result<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    queries::get_license_by_id(&conn, &path.id)?.or_not_found(msg::LICENSE_NOT_FOUND)?;

    state.cache.invalidate_license(&path.id);
    if !queries::delete_license_meta(&conn, &path.id, &path.key)? {
        return Err(AppError::NotFound(msg::LICENSE_META_NOT_FOUND.into()));
    }
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct ActivationPath {
    pub id: String,
    pub activation_id: String,
}

/// Force-remove a site activation (customer lost access to the install).
pub async fn delete_activation(
    State(state): State<AppState>,
    Path(path): Path<ActivationPath>,
) -> Result<Json<serde_json::Value>> {
    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    let license =
        queries::get_license_by_id(&tx, &path.id)?.or_not_found(msg::LICENSE_NOT_FOUND)?;
    let activation = queries::get_activation_by_id(&tx, &path.activation_id)?
        .filter(|a| a.license_id == license.id)
        .or_not_found(msg::ACTIVATION_NOT_FOUND)?;

    licensing::remove_activation(&tx, &state.cache, &license, &activation)?;
    tx.commit()?;
    Ok(Json(serde_json::json!({ "success": true })))
}
