use serde::{Deserialize, Serialize};

/// A payment event recorded against a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub subscription_id: String,

    // Amounts (cents)
    pub amount_cents: i64,
    pub currency: String,

    // Gateway info
    pub gateway: String,
    /// Gateway-side transaction reference. Renewals are deduplicated on
    /// (gateway, transaction_id).
    pub transaction_id: Option<String>,

    pub payment_type: PaymentType,
    pub created_at: i64,
}

/// Type of payment recorded against a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Initial,
    Renewal,
    Refund,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Renewal => "renewal",
            Self::Refund => "refund",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "initial" => Some(Self::Initial),
            "renewal" => Some(Self::Renewal),
            "refund" => Some(Self::Refund),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request body for recording a payment against a subscription.
/// Initial payments activate pending subscriptions; renewals extend them.
#[derive(Debug, Deserialize)]
pub struct RecordPayment {
    pub payment_type: PaymentType,
    /// Defaults to the subscription's initial/recurring amount.
    #[serde(default)]
    pub amount_cents: Option<i64>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}
