use axum::extract::State;
use serde::Deserialize;

use crate::billing::{self, PaymentOutcome};
use crate::db::queries::SubscriptionFilters;
use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::gateways;
use crate::models::{
    CreateSubscription, PaymentType, RecordPayment, Subscription, SubscriptionStatus,
    SubscriptionWithPayments, UpdateSubscription,
};
use crate::pagination::Paginated;

pub async fn create_subscription(
    State(state): State<AppState>,
    Json(input): Json<CreateSubscription>,
) -> Result<Json<Subscription>> {
    let gateway = gateways::find(&input.gateway)
        .ok_or_else(|| AppError::BadRequest(msg::UNKNOWN_GATEWAY.into()))?;

    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    let customer = queries::get_customer_by_id(&tx, &input.customer_id)?
        .or_not_found(msg::CUSTOMER_NOT_FOUND)?;
    let product = queries::get_product_by_id(&tx, &input.product_id)?
        .or_not_found(msg::PRODUCT_NOT_FOUND)?;
    if let Some(ref profile_id) = input.profile_id
        && queries::get_subscription_by_profile(&tx, gateway.id(), profile_id)?.is_some()
    {
        return Err(AppError::Conflict(
            "profile_id already in use for this gateway".into(),
        ));
    }

    let subscription = billing::create_subscription(&tx, gateway, &customer, &product, &input)?;
    tx.commit()?;
    Ok(Json(subscription))
}

#[derive(Debug, Deserialize)]
pub struct ListSubscriptionsQuery {
    pub status: Option<SubscriptionStatus>,
    pub customer_id: Option<String>,
    pub product_id: Option<String>,
    pub gateway: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListSubscriptionsQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 100)
    }

    fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    Query(query): Query<ListSubscriptionsQuery>,
) -> Result<Json<Paginated<Subscription>>> {
    let conn = state.db.get()?;
    let limit = query.limit();
    let offset = query.offset();

    let filters = SubscriptionFilters {
        status: query.status,
        customer_id: query.customer_id,
        product_id: query.product_id,
        gateway: query.gateway,
    };
    let (items, total) = queries::list_subscriptions_paginated(&conn, &filters, limit, offset)?;
    Ok(Json(Paginated::new(items, total, limit, offset)))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SubscriptionWithPayments>> {
    let conn = state.db.get()?;
    let subscription = queries::get_subscription_by_id(&conn, &id)?
        .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?;
    let payments = queries::get_payments_for_subscription(&conn, &subscription.id)?;
    let lifetime_value_cents = queries::subscription_lifetime_value(&conn, &subscription.id)?;
    Ok(Json(SubscriptionWithPayments {
        subscription,
        payments,
        lifetime_value_cents,
    }))
}

pub async fn update_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateSubscription>,
) -> Result<Json<Subscription>> {
    if input.recurring_amount_cents.is_some_and(|a| a < 0) {
        return Err(AppError::BadRequest(
            "recurring_amount_cents must be non-negative".into(),
        ));
    }
    if input.bill_times.is_some_and(|b| b < 0) {
        return Err(AppError::BadRequest("bill_times must be non-negative".into()));
    }

    let conn = state.db.get()?;
    let existing = queries::get_subscription_by_id(&conn, &id)?
        .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?;
    if let Some(Some(ref profile_id)) = input.profile_id
        && let Some(other) = queries::get_subscription_by_profile(&conn, &existing.gateway, profile_id)?
        && other.id != existing.id
    {
        return Err(AppError::Conflict(
            "profile_id already in use for this gateway".into(),
        ));
    }

    match queries::update_subscription(&conn, &id, &input)? {
        Some(subscription) => Ok(Json(subscription)),
        None => Ok(Json(existing)),
    }
}

/// Record a payment by hand, for gateways without webhooks and for support
/// fixes. Initial payments activate; renewals extend.
pub async fn record_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<RecordPayment>,
) -> Result<Json<SubscriptionWithPayments>> {
    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    let outcome = match input.payment_type {
        PaymentType::Initial => billing::apply_initial_payment(
            &tx,
            &state.cache,
            &id,
            input.amount_cents,
            input.transaction_id.as_deref(),
        )?,
        PaymentType::Renewal => billing::apply_renewal_payment(
            &tx,
            &state.cache,
            &id,
            input.amount_cents,
            input.transaction_id.as_deref(),
        )?,
        PaymentType::Refund => {
            billing::record_refund(&tx, &id, input.amount_cents, input.transaction_id.as_deref())?
        }
    };
    let subscription = match outcome {
        PaymentOutcome::Applied(subscription) => subscription,
        PaymentOutcome::AlreadyProcessed => {
            return Err(AppError::Conflict("Transaction already recorded".into()));
        }
    };

    let payments = queries::get_payments_for_subscription(&tx, &subscription.id)?;
    let lifetime_value_cents = queries::subscription_lifetime_value(&tx, &subscription.id)?;
    tx.commit()?;

    Ok(Json(SubscriptionWithPayments {
        subscription,
        payments,
        lifetime_value_cents,
    }))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Subscription>> {
    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;
    let subscription = billing::cancel_subscription(&tx, &id)?;
    tx.commit()?;
    Ok(Json(subscription))
}

pub async fn delete_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    // The schema nulls out licenses.subscription_id; drop the cached view.
    let license = queries::get_license_for_subscription(&conn, &id)?;

    if !queries::delete_subscription(&conn, &id)? {
        return Err(AppError::NotFound(msg::SUBSCRIPTION_NOT_FOUND.into()));
    }
    if let Some(license) = license {
        state.cache.invalidate_license(&license.id);
    }
    Ok(Json(serde_json::json!({ "success": true })))
}
