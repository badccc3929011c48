//! Subscription lifecycle engine.
//!
//! Every state transition lives here so the admin API, the webhook
//! handlers, and the maintenance sweep drive subscriptions through the
//! same code paths. Functions take a plain `&Connection` and run several
//! statements; callers own the surrounding transaction.

use chrono::Utc;
use rusqlite::Connection;

use crate::db::cache::LicenseCache;
use crate::db::queries::{self, NewPayment, NewSubscription};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::gateways::Gateway;
use crate::licensing;
use crate::models::{
    CreateSubscription, Customer, PaymentType, Product, Subscription, SubscriptionStatus,
};
use crate::util::{SECONDS_PER_DAY, format_amount, format_date};

/// Result of recording a payment. `AlreadyProcessed` means the gateway
/// transaction id was seen before and nothing changed.
#[derive(Debug)]
pub enum PaymentOutcome {
    Applied(Subscription),
    AlreadyProcessed,
}

fn load(conn: &Connection, subscription_id: &str) -> Result<Subscription> {
    queries::get_subscription_by_id(conn, subscription_id)?
        .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)
}

/// Create a subscription after gateway-side validation. Trials start
/// `trialling` immediately, with the license issued up front; everything
/// else waits in `pending` for the initial payment.
pub fn create_subscription(
    conn: &Connection,
    gateway: &dyn Gateway,
    customer: &Customer,
    product: &Product,
    input: &CreateSubscription,
) -> Result<Subscription> {
    let period = input
        .period
        .or(product.billing_period)
        .ok_or_else(|| AppError::BadRequest("Product has no billing period".into()))?;
    if !gateway.supports_period(period) {
        return Err(AppError::BadRequest(format!(
            "Gateway {} does not support {} billing",
            gateway.id(),
            period.as_ref()
        )));
    }

    let initial_amount_cents = input
        .initial_amount_cents
        .unwrap_or(product.price_cents + product.signup_fee_cents);
    let recurring_amount_cents = input.recurring_amount_cents.unwrap_or(product.price_cents);
    let bill_times = input.bill_times.unwrap_or(product.bill_times);
    let trial_days = input.trial_days.unwrap_or(product.trial_days);
    if initial_amount_cents < 0 || recurring_amount_cents < 0 {
        return Err(AppError::BadRequest("Amounts must be non-negative".into()));
    }
    if bill_times < 0 || trial_days < 0 {
        return Err(AppError::BadRequest(
            "bill_times and trial_days must be non-negative".into(),
        ));
    }
    gateway.validate_signup(period, initial_amount_cents, recurring_amount_cents)?;

    let now = Utc::now().timestamp();
    let (status, expiration) = if trial_days > 0 {
        (
            SubscriptionStatus::Trialling,
            Some(now + trial_days * SECONDS_PER_DAY),
        )
    } else {
        (SubscriptionStatus::Pending, None)
    };

    let subscription = queries::create_subscription(
        conn,
        &NewSubscription {
            customer_id: customer.id.clone(),
            product_id: product.id.clone(),
            period,
            initial_amount_cents,
            recurring_amount_cents,
            currency: product.currency.clone(),
            bill_times,
            trial_days,
            gateway: gateway.id().to_string(),
            profile_id: input.profile_id.clone().or_else(|| gateway.default_profile_id()),
            status,
            expiration,
        },
    )?;

    match expiration {
        Some(trial_end) => {
            queries::add_subscription_note(
                conn,
                &subscription.id,
                &format!(
                    "Subscription created via {}, trial until {}",
                    gateway.id(),
                    format_date(trial_end)
                ),
            )?;
            // Trial access starts now, so the license does too.
            licensing::issue_license(conn, product, &customer.id, Some(&subscription))?;
        }
        None => {
            queries::add_subscription_note(
                conn,
                &subscription.id,
                &format!("Subscription created via {}", gateway.id()),
            )?;
        }
    }

    Ok(subscription)
}

/// Route a gateway payment by subscription state: `pending` and
/// `trialling` take it as the initial payment, everything else as a
/// renewal.
pub fn apply_gateway_payment(
    conn: &Connection,
    cache: &LicenseCache,
    subscription: &Subscription,
    amount_cents: Option<i64>,
    transaction_id: Option<&str>,
) -> Result<PaymentOutcome> {
    match subscription.status {
        SubscriptionStatus::Pending | SubscriptionStatus::Trialling => {
            apply_initial_payment(conn, cache, &subscription.id, amount_cents, transaction_id)
        }
        _ => apply_renewal_payment(conn, cache, &subscription.id, amount_cents, transaction_id),
    }
}

/// First real payment: records the `initial` payment row, opens the first
/// billing period, and issues the license when the product calls for one.
pub fn apply_initial_payment(
    conn: &Connection,
    cache: &LicenseCache,
    subscription_id: &str,
    amount_cents: Option<i64>,
    transaction_id: Option<&str>,
) -> Result<PaymentOutcome> {
    let sub = load(conn, subscription_id)?;
    if !matches!(
        sub.status,
        SubscriptionStatus::Pending | SubscriptionStatus::Trialling
    ) {
        return Err(AppError::BadRequest(format!(
            "Cannot record an initial payment on a {} subscription",
            sub.status.as_ref()
        )));
    }
    if let Some(txn) = transaction_id
        && queries::payment_exists(conn, &sub.gateway, txn)?
    {
        return Ok(PaymentOutcome::AlreadyProcessed);
    }

    let amount = amount_cents.unwrap_or(sub.initial_amount_cents);
    queries::create_payment(
        conn,
        &NewPayment {
            subscription_id: sub.id.clone(),
            amount_cents: amount,
            currency: sub.currency.clone(),
            gateway: sub.gateway.clone(),
            transaction_id: transaction_id.map(String::from),
            payment_type: PaymentType::Initial,
        },
    )?;

    let now = Utc::now().timestamp();
    let expiration = sub.period.advance(now);
    let times_billed = sub.times_billed + 1;
    let status = if sub.quota_met_after(times_billed) {
        SubscriptionStatus::Completed
    } else {
        SubscriptionStatus::Active
    };

    let updated = queries::apply_subscription_renewal(conn, &sub.id, status, expiration, times_billed)?
        .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?;
    queries::add_subscription_note(
        conn,
        &sub.id,
        &format!(
            "Initial payment of {} recorded, expires {}",
            format_amount(amount, &sub.currency),
            format_date(expiration)
        ),
    )?;

    // Trials already carry a license; align it with the paid period.
    if licensing::sync_license_to_subscription(conn, cache, &updated)?.is_none() {
        let product = queries::get_product_by_id(conn, &updated.product_id)?
            .or_not_found(msg::PRODUCT_NOT_FOUND)?;
        licensing::issue_license(conn, &product, &updated.customer_id, Some(&updated))?;
    }

    Ok(PaymentOutcome::Applied(updated))
}

/// Recurring payment: extends the access window from
/// `max(expiration, now)`, heals `failing`, and completes the
/// subscription once the bill-times quota is met.
pub fn apply_renewal_payment(
    conn: &Connection,
    cache: &LicenseCache,
    subscription_id: &str,
    amount_cents: Option<i64>,
    transaction_id: Option<&str>,
) -> Result<PaymentOutcome> {
    let sub = load(conn, subscription_id)?;
    if !sub.status.can_renew() {
        return Err(AppError::BadRequest(format!(
            "Cannot renew a {} subscription",
            sub.status.as_ref()
        )));
    }
    if let Some(txn) = transaction_id
        && queries::payment_exists(conn, &sub.gateway, txn)?
    {
        return Ok(PaymentOutcome::AlreadyProcessed);
    }

    let amount = amount_cents.unwrap_or(sub.recurring_amount_cents);
    queries::create_payment(
        conn,
        &NewPayment {
            subscription_id: sub.id.clone(),
            amount_cents: amount,
            currency: sub.currency.clone(),
            gateway: sub.gateway.clone(),
            transaction_id: transaction_id.map(String::from),
            payment_type: PaymentType::Renewal,
        },
    )?;

    let now = Utc::now().timestamp();
    let base = sub.expiration.map_or(now, |exp| exp.max(now));
    let expiration = sub.period.advance(base);
    let times_billed = sub.times_billed + 1;
    let status = if sub.quota_met_after(times_billed) {
        SubscriptionStatus::Completed
    } else {
        SubscriptionStatus::Active
    };

    let updated = queries::apply_subscription_renewal(conn, &sub.id, status, expiration, times_billed)?
        .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?;
    queries::add_subscription_note(
        conn,
        &sub.id,
        &format!(
            "Renewal payment of {} recorded, expires {}",
            format_amount(amount, &sub.currency),
            format_date(expiration)
        ),
    )?;
    if status == SubscriptionStatus::Completed {
        queries::add_subscription_note(conn, &sub.id, "Billing quota met, subscription completed")?;
    }

    licensing::sync_license_to_subscription(conn, cache, &updated)?;

    Ok(PaymentOutcome::Applied(updated))
}

/// Record a refund row. The subscription state is untouched; cancelling
/// or disabling in response is a separate admin decision.
pub fn record_refund(
    conn: &Connection,
    subscription_id: &str,
    amount_cents: Option<i64>,
    transaction_id: Option<&str>,
) -> Result<PaymentOutcome> {
    let sub = load(conn, subscription_id)?;
    if let Some(txn) = transaction_id
        && queries::payment_exists(conn, &sub.gateway, txn)?
    {
        return Ok(PaymentOutcome::AlreadyProcessed);
    }

    let amount = amount_cents.unwrap_or(sub.recurring_amount_cents);
    queries::create_payment(
        conn,
        &NewPayment {
            subscription_id: sub.id.clone(),
            amount_cents: amount,
            currency: sub.currency.clone(),
            gateway: sub.gateway.clone(),
            transaction_id: transaction_id.map(String::from),
            payment_type: PaymentType::Refund,
        },
    )?;
    queries::add_subscription_note(
        conn,
        &sub.id,
        &format!("Refund of {} recorded", format_amount(amount, &sub.currency)),
    )?;

    Ok(PaymentOutcome::Applied(load(conn, subscription_id)?))
}

/// Stop future billing. Access (and the license) runs until `expiration`,
/// which the maintenance sweep then turns into `expired`.
pub fn cancel_subscription(conn: &Connection, subscription_id: &str) -> Result<Subscription> {
    let sub = load(conn, subscription_id)?;
    if !sub.status.can_cancel() {
        return Err(AppError::BadRequest(format!(
            "Cannot cancel a {} subscription",
            sub.status.as_ref()
        )));
    }

    let updated = queries::set_subscription_status(
        conn,
        &sub.id,
        SubscriptionStatus::Cancelled,
        sub.expiration,
    )?
    .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?;
    queries::add_subscription_note(conn, &sub.id, "Subscription cancelled")?;
    Ok(updated)
}

/// Gateway reported a failed renewal charge. A later successful renewal
/// heals the subscription back to `active`.
pub fn fail_subscription(conn: &Connection, subscription_id: &str) -> Result<Subscription> {
    let sub = load(conn, subscription_id)?;
    if !matches!(
        sub.status,
        SubscriptionStatus::Active | SubscriptionStatus::Trialling
    ) {
        return Err(AppError::BadRequest(format!(
            "Cannot mark a {} subscription as failing",
            sub.status.as_ref()
        )));
    }

    let updated =
        queries::set_subscription_status(conn, &sub.id, SubscriptionStatus::Failing, sub.expiration)?
            .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?;
    queries::add_subscription_note(conn, &sub.id, "Renewal payment failed")?;
    Ok(updated)
}

/// Terminal access cutoff once `expiration` has passed. Driven by the
/// maintenance sweep and by gateway `Expired` events.
pub fn expire_subscription(conn: &Connection, subscription_id: &str) -> Result<Subscription> {
    let sub = load(conn, subscription_id)?;
    if !sub.status.expires_naturally() {
        return Err(AppError::BadRequest(format!(
            "Cannot expire a {} subscription",
            sub.status.as_ref()
        )));
    }

    let updated =
        queries::set_subscription_status(conn, &sub.id, SubscriptionStatus::Expired, sub.expiration)?
            .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?;
    queries::add_subscription_note(conn, &sub.id, "Subscription expired")?;
    Ok(updated)
}
