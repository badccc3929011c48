use axum::extract::State;

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::models::{CreateProduct, Product, UpdateProduct};
use crate::pagination::{Paginated, PaginationQuery};

pub async fn create_product(
    State(state): State<AppState>,
    Json(input): Json<CreateProduct>,
) -> Result<Json<Product>> {
    if input.price_cents < 0 {
        return Err(AppError::BadRequest("price_cents must be non-negative".into()));
    }

    let conn = state.db.get()?;
    if let Some(ref slug) = input.slug
        && queries::get_product_by_slug(&conn, slug)?.is_some()
    {
        return Err(AppError::Conflict(
            "A product with this slug already exists".into(),
        ));
    }
    Ok(Json(queries::create_product(&conn, &input)?))
}

pub async fn list_products(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<Paginated<Product>>> {
    let conn = state.db.get()?;
    let limit = pagination.limit();
    let offset = pagination.offset();
    let (items, total) = queries::list_products_paginated(&conn, limit, offset)?;
    Ok(Json(Paginated::new(items, total, limit, offset)))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Product>> {
    let conn = state.db.get()?;
    let product = queries::get_product_by_id(&conn, &id)?.or_not_found(msg::PRODUCT_NOT_FOUND)?;
    Ok(Json(product))
}

pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateProduct>,
) -> Result<Json<Product>> {
    if input.price_cents.is_some_and(|p| p < 0) {
        return Err(AppError::BadRequest("price_cents must be non-negative".into()));
    }

    let conn = state.db.get()?;
    match queries::update_product(&conn, &id, &input)? {
        Some(product) => Ok(Json(product)),
        None => Ok(Json(
            queries::get_product_by_id(&conn, &id)?.or_not_found(msg::PRODUCT_NOT_FOUND)?,
        )),
    }
}

/// Hard delete. Subscriptions and licenses referencing the product go with
/// it via the schema's cascades.
pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    if !queries::delete_product(&conn, &id)? {
        return Err(AppError::NotFound(msg::PRODUCT_NOT_FOUND.into()));
    }
    // Cached licenses for this product died with the cascade.
    state.cache.invalidate_all();
    Ok(Json(serde_json::json!({ "success": true })))
}
