//! PayPal billing-agreement webhooks.
//!
//! Deliveries are authenticated with an HMAC-SHA256 shared secret over the
//! raw body (`paypal-transmission-sig` header, lowercase hex). Event types
//! map onto [`GatewayEvent`]s; sale events reference the subscription via
//! `billing_agreement_id`, subscription events via the resource id itself.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};
use crate::models::BillingPeriod;

use super::{Gateway, GatewayEvent, ParsedWebhook};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "paypal-transmission-sig";

pub struct PayPalGateway;

#[derive(Debug, Deserialize)]
struct PayPalWebhookEvent {
    id: Option<String>,
    event_type: String,
    resource: Option<PayPalResource>,
}

#[derive(Debug, Deserialize)]
struct PayPalResource {
    /// Transaction id on sale events, agreement id on subscription events.
    id: Option<String>,
    billing_agreement_id: Option<String>,
    amount: Option<PayPalAmount>,
}

#[derive(Debug, Deserialize)]
struct PayPalAmount {
    total: Option<String>,
    currency: Option<String>,
}

/// Parse a decimal money string ("12.99") into cents without going
/// through floats.
fn parse_amount_cents(s: &str) -> Option<i64> {
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    let whole: i64 = whole.parse().ok()?;
    if whole < 0 {
        return None;
    }
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        2 => frac.parse().ok()?,
        _ => return None,
    };
    Some(whole * 100 + frac)
}

impl Gateway for PayPalGateway {
    fn id(&self) -> &'static str {
        "paypal"
    }

    // Quarter and semi-year bill as 3- and 6-month cycles, so every
    // period maps onto a PayPal billing interval.
    fn supports_period(&self, _period: BillingPeriod) -> bool {
        true
    }

    fn validate_signup(
        &self,
        _period: BillingPeriod,
        _initial_amount_cents: i64,
        recurring_amount_cents: i64,
    ) -> Result<()> {
        if recurring_amount_cents == 0 {
            return Err(AppError::BadRequest(
                "PayPal subscriptions require a non-zero recurring amount".into(),
            ));
        }
        Ok(())
    }

    fn verify_signature(&self, headers: &HeaderMap, body: &[u8], secret: &str) -> Result<()> {
        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthorized)?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| AppError::Internal("Invalid webhook secret".into()))?;
        mac.update(body);
        let expected = hex::encode(mac.finalize().into_bytes());

        // Length is not secret (always 64 hex chars); the content compare
        // must be constant-time.
        if expected.len() != provided.len()
            || !bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
        {
            return Err(AppError::Unauthorized);
        }
        Ok(())
    }

    fn parse_event(&self, body: &[u8]) -> Result<ParsedWebhook> {
        let event: PayPalWebhookEvent = serde_json::from_slice(body)?;
        let resource = event.resource;

        let parsed = match event.event_type.as_str() {
            "PAYMENT.SALE.COMPLETED" => {
                let Some(resource) = resource else {
                    return Ok(ParsedWebhook {
                        event_id: event.id,
                        event: GatewayEvent::Ignored,
                    });
                };
                match resource.billing_agreement_id {
                    // Sales without an agreement are one-off payments,
                    // not subscription billing.
                    None => GatewayEvent::Ignored,
                    Some(profile_id) => GatewayEvent::PaymentCompleted {
                        profile_id,
                        transaction_id: resource.id,
                        amount_cents: resource
                            .amount
                            .as_ref()
                            .and_then(|a| a.total.as_deref())
                            .and_then(parse_amount_cents),
                        currency: resource
                            .amount
                            .and_then(|a| a.currency)
                            .map(|c| c.to_lowercase()),
                    },
                }
            }
            "BILLING.SUBSCRIPTION.PAYMENT.FAILED" | "BILLING.SUBSCRIPTION.SUSPENDED" => {
                match resource.and_then(|r| r.id) {
                    Some(profile_id) => GatewayEvent::PaymentFailed { profile_id },
                    None => GatewayEvent::Ignored,
                }
            }
            "BILLING.SUBSCRIPTION.CANCELLED" => match resource.and_then(|r| r.id) {
                Some(profile_id) => GatewayEvent::Cancelled { profile_id },
                None => GatewayEvent::Ignored,
            },
            "BILLING.SUBSCRIPTION.EXPIRED" => match resource.and_then(|r| r.id) {
                Some(profile_id) => GatewayEvent::Expired { profile_id },
                None => GatewayEvent::Ignored,
            },
            _ => GatewayEvent::Ignored,
        };

        Ok(ParsedWebhook {
            event_id: event.id,
            event: parsed,
        })
    }
}
