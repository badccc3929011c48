//! Reminder and maintenance sweeps.
//!
//! Both run on background intervals and are idempotent: the reminder sweep
//! deduplicates through `reminder_log`, the maintenance sweep only touches
//! rows whose expiration has already passed.

use chrono::Utc;

use crate::billing;
use crate::db::{AppState, queries};
use crate::email::{NoticeKind, ReminderEmail};
use crate::error::Result;
use crate::models::{LicenseStatus, SubscriptionStatus};
use crate::util::SECONDS_PER_DAY;

/// Whole UTC day containing `now + days_before` days.
fn day_window(now: i64, days_before: i64) -> (i64, i64) {
    let target = now + days_before * SECONDS_PER_DAY;
    let start = target - target.rem_euclid(SECONDS_PER_DAY);
    (start, start + SECONDS_PER_DAY)
}

/// A reminder selected by the sweep, resolved to everything the email
/// needs so the connection is not held per-send.
struct PendingReminder {
    object_type: &'static str,
    object_id: String,
    notice_key: String,
    kind: NoticeKind,
    to_email: String,
    customer_name: Option<String>,
    product_name: String,
    due_at: i64,
    amount_cents: Option<i64>,
    currency: String,
}

/// Auto-renewing subscriptions get renewal notices; subscriptions that
/// will lapse (cancelled, quota complete) and standalone licenses get
/// expiration notices. One email per (object, notice key), forever.
pub async fn run_reminder_sweep(state: &AppState) -> Result<u64> {
    if !state.reminders_enabled {
        return Ok(0);
    }

    let now = Utc::now().timestamp();
    let conn = state.db.get()?;
    let mut pending: Vec<PendingReminder> = Vec::new();

    for &days in &state.renewal_notice_days {
        let (start, end) = day_window(now, days);
        let subs = queries::list_subscriptions_expiring_between(
            &conn,
            start,
            end,
            &[SubscriptionStatus::Active, SubscriptionStatus::Trialling],
        )?;
        for sub in subs {
            let Some(customer) = queries::get_customer_by_id(&conn, &sub.customer_id)? else {
                continue;
            };
            let Some(product) = queries::get_product_by_id(&conn, &sub.product_id)? else {
                continue;
            };
            let Some(due_at) = sub.expiration else { continue };
            pending.push(PendingReminder {
                object_type: "subscription",
                object_id: sub.id,
                notice_key: format!("renewal-{}", days),
                kind: NoticeKind::Renewal,
                to_email: customer.email,
                customer_name: customer.name,
                product_name: product.name,
                due_at,
                amount_cents: Some(sub.recurring_amount_cents),
                currency: sub.currency,
            });
        }
    }

    for &days in &state.expiration_notice_days {
        let (start, end) = day_window(now, days);

        let subs = queries::list_subscriptions_expiring_between(
            &conn,
            start,
            end,
            &[SubscriptionStatus::Cancelled, SubscriptionStatus::Completed],
        )?;
        for sub in subs {
            let Some(customer) = queries::get_customer_by_id(&conn, &sub.customer_id)? else {
                continue;
            };
            let Some(product) = queries::get_product_by_id(&conn, &sub.product_id)? else {
                continue;
            };
            let Some(due_at) = sub.expiration else { continue };
            pending.push(PendingReminder {
                object_type: "subscription",
                object_id: sub.id,
                notice_key: format!("expiration-{}", days),
                kind: NoticeKind::Expiration,
                to_email: customer.email,
                customer_name: customer.name,
                product_name: product.name,
                due_at,
                amount_cents: None,
                currency: sub.currency,
            });
        }

        // Subscription-backed licenses are covered by the subscription
        // notices above; only standalone licenses are reminded here.
        let licenses = queries::list_licenses_expiring_between(&conn, start, end)?;
        for license in licenses {
            if license.subscription_id.is_some() {
                continue;
            }
            let Some(customer) = queries::get_customer_by_id(&conn, &license.customer_id)? else {
                continue;
            };
            let Some(product) = queries::get_product_by_id(&conn, &license.product_id)? else {
                continue;
            };
            let Some(due_at) = license.expiration else { continue };
            pending.push(PendingReminder {
                object_type: "license",
                object_id: license.id,
                notice_key: format!("expiration-{}", days),
                kind: NoticeKind::Expiration,
                to_email: customer.email,
                customer_name: customer.name,
                product_name: product.name,
                due_at,
                amount_cents: None,
                currency: product.currency,
            });
        }
    }

    let mut sent = 0u64;
    for reminder in pending {
        if queries::reminder_already_sent(
            &conn,
            reminder.object_type,
            &reminder.object_id,
            &reminder.notice_key,
        )? {
            continue;
        }

        let email = ReminderEmail {
            to_email: &reminder.to_email,
            customer_name: reminder.customer_name.as_deref(),
            product_name: &reminder.product_name,
            kind: reminder.kind,
            due_at: reminder.due_at,
            amount_cents: reminder.amount_cents,
            currency: &reminder.currency,
            object_type: reminder.object_type,
            object_id: &reminder.object_id,
            notice_key: &reminder.notice_key,
        };
        match state.email.send_reminder(&email).await {
            Ok(_) => {
                queries::try_record_reminder(
                    &conn,
                    reminder.object_type,
                    &reminder.object_id,
                    &reminder.notice_key,
                )?;
                let note = format!("Reminder sent ({})", reminder.notice_key);
                if reminder.object_type == "subscription" {
                    queries::add_subscription_note(&conn, &reminder.object_id, &note)?;
                } else {
                    queries::add_license_note(&conn, &reminder.object_id, &note)?;
                }
                sent += 1;
            }
            Err(e) => {
                // Left out of reminder_log so the next sweep retries.
                tracing::error!(
                    error = %e,
                    object_id = %reminder.object_id,
                    notice_key = %reminder.notice_key,
                    "Failed to deliver reminder"
                );
            }
        }
    }

    if sent > 0 {
        tracing::info!(sent, "Reminder sweep delivered notices");
    }
    Ok(sent)
}

/// Expire overdue subscriptions and licenses. Completed subscriptions and
/// disabled licenses are left alone.
pub fn run_maintenance_sweep(state: &AppState) -> Result<(u64, u64)> {
    let now = Utc::now().timestamp();
    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    let mut subs_expired = 0u64;
    for sub in queries::list_subscriptions_to_expire(&tx, now)? {
        billing::expire_subscription(&tx, &sub.id)?;
        subs_expired += 1;
    }

    let mut licenses_expired = 0u64;
    for license in queries::list_licenses_to_expire(&tx, now)? {
        state.cache.invalidate_license(&license.id);
        queries::set_license_status(&tx, &license.id, LicenseStatus::Expired)?;
        queries::add_license_note(&tx, &license.id, "License expired")?;
        licenses_expired += 1;
    }

    tx.commit()?;

    if subs_expired > 0 || licenses_expired > 0 {
        tracing::info!(
            subs_expired,
            licenses_expired,
            "Maintenance sweep expired overdue records"
        );
    }
    Ok((subs_expired, licenses_expired))
}
