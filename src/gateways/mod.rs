//! Payment gateway integrations.
//!
//! Each processor implements [`Gateway`]: checkout-side validation when a
//! subscription is created, webhook authentication, and translation of the
//! provider's payloads into provider-agnostic [`GatewayEvent`]s that the
//! billing engine consumes.

mod manual;
mod paypal;

pub use manual::ManualGateway;
pub use paypal::PayPalGateway;

use axum::http::HeaderMap;

use crate::error::Result;
use crate::models::BillingPeriod;

/// What a webhook delivery means, independent of the provider's schema.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// A charge settled. Initial or renewal is decided by the state of the
    /// subscription the profile resolves to.
    PaymentCompleted {
        profile_id: String,
        transaction_id: Option<String>,
        amount_cents: Option<i64>,
        currency: Option<String>,
    },
    PaymentFailed { profile_id: String },
    Cancelled { profile_id: String },
    Expired { profile_id: String },
    /// Authenticated but irrelevant; acknowledged without processing.
    Ignored,
}

/// A parsed delivery: the provider's delivery id (fed to the replay guard)
/// plus the event it carries.
#[derive(Debug, Clone)]
pub struct ParsedWebhook {
    pub event_id: Option<String>,
    pub event: GatewayEvent,
}

pub trait Gateway: Send + Sync {
    /// Registry key, stored on subscriptions and used in webhook routes.
    fn id(&self) -> &'static str;

    /// Whether the processor can bill on this cycle.
    fn supports_period(&self, period: BillingPeriod) -> bool;

    /// Processor-specific signup constraints, checked before a
    /// subscription row is created.
    fn validate_signup(
        &self,
        period: BillingPeriod,
        initial_amount_cents: i64,
        recurring_amount_cents: i64,
    ) -> Result<()>;

    /// Profile id to assign when the caller did not supply one. Gateways
    /// whose profiles are minted at checkout return None.
    fn default_profile_id(&self) -> Option<String> {
        None
    }

    /// Whether the processor delivers webhooks at all.
    fn has_webhook(&self) -> bool {
        true
    }

    /// Authenticate a delivery against the raw request body.
    fn verify_signature(&self, headers: &HeaderMap, body: &[u8], secret: &str) -> Result<()>;

    /// Translate a raw payload into a [`ParsedWebhook`].
    fn parse_event(&self, body: &[u8]) -> Result<ParsedWebhook>;
}

static PAYPAL: PayPalGateway = PayPalGateway;
static MANUAL: ManualGateway = ManualGateway;

/// Look up a gateway by registry id.
pub fn find(id: &str) -> Option<&'static dyn Gateway> {
    match id {
        "paypal" => Some(&PAYPAL),
        "manual" => Some(&MANUAL),
        _ => None,
    }
}
