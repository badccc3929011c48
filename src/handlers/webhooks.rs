//! Webhook ingestion for payment gateways.
//!
//! Deliveries that fail authentication get a 401. Everything after
//! authentication that cannot be processed (replays, unknown profiles,
//! transitions that no longer apply) is acknowledged with 200 so the
//! provider stops retrying; the note in the body shows up in the
//! provider's delivery log.

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
};
use rusqlite::Connection;

use crate::billing::{self, PaymentOutcome};
use crate::db::cache::LicenseCache;
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::gateways::{self, GatewayEvent, ParsedWebhook};
use crate::models::Subscription;

pub type WebhookResult = (StatusCode, &'static str);

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/{gateway}", post(handle_webhook))
}

async fn handle_webhook(
    State(state): State<AppState>,
    Path(gateway_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    let Some(gateway) = gateways::find(&gateway_id).filter(|g| g.has_webhook()) else {
        return (StatusCode::NOT_FOUND, "unknown gateway");
    };

    let Some(secret) = webhook_secret(&state, gateway.id()) else {
        tracing::warn!(gateway = gateway.id(), "webhook received but no secret configured");
        return (StatusCode::UNAUTHORIZED, "webhook secret not configured");
    };
    if gateway.verify_signature(&headers, &body, &secret).is_err() {
        tracing::warn!(gateway = gateway.id(), "webhook signature rejected");
        return (StatusCode::UNAUTHORIZED, "invalid signature");
    }

    let parsed = match gateway.parse_event(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(gateway = gateway.id(), error = %e, "unparseable webhook payload");
            return (StatusCode::OK, "unparseable payload ignored");
        }
    };

    match process_event(&state, gateway.id(), parsed) {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(gateway = gateway.id(), error = %e, "webhook processing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "processing failed")
        }
    }
}

fn webhook_secret(state: &AppState, gateway_id: &str) -> Option<String> {
    match gateway_id {
        "paypal" => state.paypal_webhook_secret.clone(),
        _ => None,
    }
}

fn process_event(
    state: &AppState,
    gateway_id: &str,
    parsed: ParsedWebhook,
) -> Result<WebhookResult> {
    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    if let Some(event_id) = parsed.event_id.as_deref()
        && !queries::try_record_webhook_event(&tx, gateway_id, event_id)?
    {
        tx.commit()?;
        return Ok((StatusCode::OK, "replay ignored"));
    }

    let note = match apply_event(&tx, &state.cache, gateway_id, &parsed.event) {
        Ok(note) => note,
        Err(AppError::BadRequest(reason)) => {
            // A renewal for a cancelled subscription, a second cancel, etc.
            // The delivery is genuine, the transition just no longer applies.
            tracing::info!(gateway = gateway_id, reason = %reason, "webhook transition skipped");
            "transition not applicable"
        }
        Err(e) => return Err(e),
    };

    // Commit even for skipped transitions so the replay guard keeps the
    // delivery id.
    tx.commit()?;
    Ok((StatusCode::OK, note))
}

fn apply_event(
    conn: &Connection,
    cache: &LicenseCache,
    gateway_id: &str,
    event: &GatewayEvent,
) -> Result<&'static str> {
    match event {
        GatewayEvent::Ignored => Ok("event ignored"),
        GatewayEvent::PaymentCompleted {
            profile_id,
            transaction_id,
            amount_cents,
            ..
        } => {
            let Some(sub) = lookup_profile(conn, gateway_id, profile_id)? else {
                return Ok("unknown profile ignored");
            };
            match billing::apply_gateway_payment(
                conn,
                cache,
                &sub,
                *amount_cents,
                transaction_id.as_deref(),
            )? {
                PaymentOutcome::Applied(updated) => {
                    tracing::info!(
                        subscription = %updated.id,
                        gateway = gateway_id,
                        "gateway payment recorded"
                    );
                    Ok("payment recorded")
                }
                PaymentOutcome::AlreadyProcessed => Ok("duplicate transaction ignored"),
            }
        }
        GatewayEvent::PaymentFailed { profile_id } => {
            let Some(sub) = lookup_profile(conn, gateway_id, profile_id)? else {
                return Ok("unknown profile ignored");
            };
            billing::fail_subscription(conn, &sub.id)?;
            Ok("subscription marked failing")
        }
        GatewayEvent::Cancelled { profile_id } => {
            let Some(sub) = lookup_profile(conn, gateway_id, profile_id)? else {
                return Ok("unknown profile ignored");
            };
            billing::cancel_subscription(conn, &sub.id)?;
            Ok("subscription cancelled")
        }
        GatewayEvent::Expired { profile_id } => {
            let Some(sub) = lookup_profile(conn, gateway_id, profile_id)? else {
                return Ok("unknown profile ignored");
            };
            billing::expire_subscription(conn, &sub.id)?;
            Ok("subscription expired")
        }
    }
}

fn lookup_profile(
    conn: &Connection,
    gateway_id: &str,
    profile_id: &str,
) -> Result<Option<Subscription>> {
    let sub = queries::get_subscription_by_profile(conn, gateway_id, profile_id)?;
    if sub.is_none() {
        tracing::info!(
            gateway = gateway_id,
            profile = profile_id,
            "webhook for unknown profile"
        );
    }
    Ok(sub)
}
