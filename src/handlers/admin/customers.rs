use axum::extract::State;

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::models::{CreateCustomer, Customer, UpdateCustomer};
use crate::pagination::{Paginated, PaginationQuery};

pub async fn create_customer(
    State(state): State<AppState>,
    Json(input): Json<CreateCustomer>,
) -> Result<Json<Customer>> {
    let conn = state.db.get()?;
    if queries::get_customer_by_email(&conn, &input.email)?.is_some() {
        return Err(AppError::Conflict(
            "A customer with this email already exists".into(),
        ));
    }
    Ok(Json(queries::create_customer(&conn, &input)?))
}

pub async fn list_customers(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<Paginated<Customer>>> {
    let conn = state.db.get()?;
    let limit = pagination.limit();
    let offset = pagination.offset();
    let (items, total) = queries::list_customers_paginated(&conn, limit, offset)?;
    Ok(Json(Paginated::new(items, total, limit, offset)))
}

pub async fn get_customer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Customer>> {
    let conn = state.db.get()?;
    let customer =
        queries::get_customer_by_id(&conn, &id)?.or_not_found(msg::CUSTOMER_NOT_FOUND)?;
    Ok(Json(customer))
}

pub async fn update_customer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateCustomer>,
) -> Result<Json<Customer>> {
    let conn = state.db.get()?;
    if let Some(ref email) = input.email
        && let Some(existing) = queries::get_customer_by_email(&conn, email)?
        && existing.id != id
    {
        return Err(AppError::Conflict(
            "A customer with this email already exists".into(),
        ));
    }

    match queries::update_customer(&conn, &id, &input)? {
        Some(customer) => Ok(Json(customer)),
        // An empty patch writes nothing; answer with the row as-is.
        None => Ok(Json(
            queries::get_customer_by_id(&conn, &id)?.or_not_found(msg::CUSTOMER_NOT_FOUND)?,
        )),
    }
}
