use chrono::{DateTime, Duration, Months};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::{Payment, double_option};

/// Billing interval between subscription payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BillingPeriod {
    Day,
    Week,
    Month,
    Quarter,
    SemiYear,
    Year,
}

impl BillingPeriod {
    /// Advance a timestamp by one billing period. Month-based periods use
    /// calendar months so the 31st clamps to shorter months instead of
    /// drifting.
    pub fn advance(&self, from: i64) -> i64 {
        let Some(dt) = DateTime::from_timestamp(from, 0) else {
            return from;
        };
        let next = match self {
            Self::Day => dt + Duration::days(1),
            Self::Week => dt + Duration::weeks(1),
            Self::Month => dt
                .checked_add_months(Months::new(1))
                .unwrap_or(dt + Duration::days(30)),
            Self::Quarter => dt
                .checked_add_months(Months::new(3))
                .unwrap_or(dt + Duration::days(91)),
            Self::SemiYear => dt
                .checked_add_months(Months::new(6))
                .unwrap_or(dt + Duration::days(182)),
            Self::Year => dt
                .checked_add_months(Months::new(12))
                .unwrap_or(dt + Duration::days(365)),
        };
        next.timestamp()
    }
}

/// Subscription lifecycle states.
///
/// `pending` subscriptions are waiting for their first payment. Trials skip
/// straight to `trialling`. `failing` marks a missed renewal payment that the
/// gateway may still retry; a successful renewal recovers it to `active`.
/// `cancelled` keeps access until `expiration` passes, then the maintenance
/// sweep moves it to `expired`. `completed` means the bill-times quota was
/// met and no further billing happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Trialling,
    Active,
    Cancelled,
    Failing,
    Expired,
    Completed,
}

impl SubscriptionStatus {
    /// Whether a cancellation request is valid from this state.
    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Trialling | Self::Active | Self::Failing
        )
    }

    /// Whether a renewal payment can be applied in this state.
    pub fn can_renew(&self) -> bool {
        matches!(self, Self::Trialling | Self::Active | Self::Failing)
    }

    /// States the maintenance sweep expires once `expiration` has passed.
    pub fn expires_naturally(&self) -> bool {
        matches!(
            self,
            Self::Trialling | Self::Active | Self::Cancelled | Self::Failing
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub customer_id: String,
    pub product_id: String,
    pub period: BillingPeriod,
    /// First payment amount (price + signup fee, may be discounted).
    pub initial_amount_cents: i64,
    /// Amount charged on each renewal.
    pub recurring_amount_cents: i64,
    pub currency: String,
    /// Total payments before completion (0 = until cancelled).
    pub bill_times: i64,
    pub times_billed: i64,
    pub trial_days: i64,
    pub gateway: String,
    /// Gateway billing-profile reference (PayPal billing agreement id).
    pub profile_id: Option<String>,
    pub status: SubscriptionStatus,
    pub created_at: i64,
    /// Next renewal date, or end of access for non-renewing states.
    /// None until the subscription is activated.
    pub expiration: Option<i64>,
    /// Timestamped history of lifecycle events, newest last.
    pub notes: Option<String>,
    pub updated_at: i64,
}

impl Subscription {
    /// Whether recording one more payment satisfies the bill-times quota.
    pub fn quota_met_after(&self, times_billed: i64) -> bool {
        self.bill_times > 0 && times_billed >= self.bill_times
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSubscription {
    pub customer_id: String,
    pub product_id: String,
    pub gateway: String,
    /// Gateway billing-profile reference, when known at signup.
    #[serde(default)]
    pub profile_id: Option<String>,
    /// Overrides; default to the product's billing configuration.
    #[serde(default)]
    pub period: Option<BillingPeriod>,
    #[serde(default)]
    pub initial_amount_cents: Option<i64>,
    #[serde(default)]
    pub recurring_amount_cents: Option<i64>,
    #[serde(default)]
    pub bill_times: Option<i64>,
    #[serde(default)]
    pub trial_days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSubscription {
    /// `null` detaches the gateway billing profile.
    #[serde(default, deserialize_with = "double_option")]
    pub profile_id: Option<Option<String>>,
    #[serde(default)]
    pub expiration: Option<i64>,
    #[serde(default)]
    pub recurring_amount_cents: Option<i64>,
    #[serde(default)]
    pub bill_times: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionWithPayments {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub payments: Vec<Payment>,
    /// Sum of initial and renewal payments, minus refunds.
    pub lifetime_value_cents: i64,
}
