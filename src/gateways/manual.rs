//! Manual billing: payments are recorded by an operator through the admin
//! API instead of arriving over a webhook. Used for invoiced customers,
//! comps, and migrations from other systems.

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::BillingPeriod;

use super::{Gateway, GatewayEvent, ParsedWebhook};

pub struct ManualGateway;

impl Gateway for ManualGateway {
    fn id(&self) -> &'static str {
        "manual"
    }

    fn supports_period(&self, _period: BillingPeriod) -> bool {
        true
    }

    fn validate_signup(
        &self,
        _period: BillingPeriod,
        _initial_amount_cents: i64,
        _recurring_amount_cents: i64,
    ) -> Result<()> {
        Ok(())
    }

    fn default_profile_id(&self) -> Option<String> {
        Some(format!("man_{}", Uuid::new_v4().as_simple()))
    }

    fn has_webhook(&self) -> bool {
        false
    }

    fn verify_signature(&self, _headers: &HeaderMap, _body: &[u8], _secret: &str) -> Result<()> {
        Err(AppError::NotFound(
            "Manual gateway does not accept webhooks".into(),
        ))
    }

    fn parse_event(&self, _body: &[u8]) -> Result<ParsedWebhook> {
        Ok(ParsedWebhook {
            event_id: None,
            event: GatewayEvent::Ignored,
        })
    }
}
